use super::*;
use crate::utils::error::{BrokerError, FrameError};

fn request(opcode: u8, noack: bool, body: &[u8]) -> Vec<u8> {
    let mut out = Header::new(REQUEST_MAGIC, opcode, noack as u8, body.len() as u32)
        .encode()
        .to_vec();
    out.extend_from_slice(body);
    out
}

#[test]
fn test_header_layout_is_little_endian() {
    let raw = Header::new(REQUEST_MAGIC, 0x12, 1, 0x0102_0304).encode();
    assert_eq!(raw, [0xEA, 0x00, 0x12, 0x01, 0x04, 0x03, 0x02, 0x01]);
    assert_eq!(Header::decode(&raw[..7]), None);
}

#[test]
fn test_framer_waits_for_full_header() {
    let mut framer = RequestFramer::new(1024);
    let bytes = request(2, false, &[]);
    framer.feed(&bytes[..5]);
    assert_eq!(framer.next_frame(), Ok(None));
    framer.feed(&bytes[5..]);
    let frame = framer.next_frame().unwrap().unwrap();
    assert_eq!(frame.opcode, 2);
    assert!(frame.body.is_empty());
    assert!(framer.is_idle());
}

#[test]
fn test_framer_accumulates_split_body() {
    let mut framer = RequestFramer::new(1024);
    let bytes = request(7, true, b"hello world");
    framer.feed(&bytes[..11]);
    assert_eq!(framer.next_frame(), Ok(None));
    framer.feed(&bytes[11..15]);
    assert_eq!(framer.next_frame(), Ok(None));
    framer.feed(&bytes[15..]);

    let frame = framer.next_frame().unwrap().unwrap();
    assert_eq!(frame.opcode, 7);
    assert!(frame.noack);
    assert_eq!(&frame.body[..], b"hello world");
}

#[test]
fn test_framer_splits_pipelined_requests() {
    let mut framer = RequestFramer::new(1024);
    let mut bytes = request(1, false, b"abc");
    bytes.extend(request(2, false, b""));
    bytes.extend(request(3, false, b"xyz"));
    // third request arrives in two pieces
    let cut = bytes.len() - 2;
    framer.feed(&bytes[..cut]);

    assert_eq!(framer.next_frame().unwrap().unwrap().opcode, 1);
    assert_eq!(framer.next_frame().unwrap().unwrap().opcode, 2);
    assert_eq!(framer.next_frame(), Ok(None));

    framer.feed(&bytes[cut..]);
    let last = framer.next_frame().unwrap().unwrap();
    assert_eq!(last.opcode, 3);
    assert_eq!(&last.body[..], b"xyz");
    assert_eq!(framer.next_frame(), Ok(None));
}

#[test]
fn test_framer_keeps_remainder_after_accumulated_body() {
    let mut framer = RequestFramer::new(1024);
    let first = request(4, false, b"0123456789");
    let second = request(5, false, b"z");
    framer.feed(&first[..10]);
    assert_eq!(framer.next_frame(), Ok(None));

    let mut rest = first[10..].to_vec();
    rest.extend(&second);
    framer.feed(&rest);
    assert_eq!(&framer.next_frame().unwrap().unwrap().body[..], b"0123456789");
    assert_eq!(framer.next_frame().unwrap().unwrap().opcode, 5);
}

#[test]
fn test_framer_rejects_bad_magic_and_resets() {
    let mut framer = RequestFramer::new(1024);
    let mut bytes = Header::new(0x1234, 9, 0, 0).encode().to_vec();
    bytes.extend(request(2, false, &[]));
    framer.feed(&bytes);

    assert_eq!(
        framer.next_frame(),
        Err(FrameError::BadMagic {
            opcode: 9,
            noack: false,
            magic: 0x1234
        })
    );
    assert!(framer.is_idle());

    framer.feed(&request(2, false, &[]));
    assert_eq!(framer.next_frame().unwrap().unwrap().opcode, 2);
}

#[test]
fn test_framer_rejects_oversized_body() {
    let mut framer = RequestFramer::new(16);
    framer.feed(&Header::new(REQUEST_MAGIC, 3, 1, 17).encode());
    let err = framer.next_frame().unwrap_err();
    assert_eq!(
        err,
        FrameError::TooLarge {
            opcode: 3,
            noack: true,
            len: 17
        }
    );
    assert_eq!(err.opcode(), 3);
    assert!(err.noack());
}

#[test]
fn test_body_reader_fields() {
    let mut writer = BodyWriter::new();
    writer.name("jobs").topic("eu.created").u32(7).u64(99).bytes(b"data");
    let body = writer.finish();

    let mut reader = BodyReader::new(&body);
    assert_eq!(reader.name(), Ok("jobs"));
    assert_eq!(reader.topic(), Ok("eu.created"));
    assert_eq!(reader.u32(), Ok(7));
    assert_eq!(reader.u64(), Ok(99));
    assert_eq!(reader.payload(), Ok(&b"data"[..]));
    assert_eq!(reader.finish(), Ok(()));
}

#[test]
fn test_body_reader_errors() {
    let mut short = BodyReader::new(&[b'a', 0, 0]);
    assert_eq!(short.name(), Err(BrokerError::BadPacket));

    let mut writer = BodyWriter::new();
    writer.name("9lives");
    let body = writer.finish();
    assert_eq!(BodyReader::new(&body).name(), Err(BrokerError::BadValue));

    let mut empty = BodyReader::new(&[]);
    assert_eq!(empty.payload(), Err(BrokerError::BadPacket));

    assert_eq!(BodyReader::new(&[1]).finish(), Err(BrokerError::BadPacket));
}

#[test]
fn test_response_packets() {
    let ok = response::status(0x02, Status::Success);
    assert_eq!(&ok[..], &Header::new(RESPONSE_MAGIC, 2, 1, 0).encode());

    let payload = crate::broker::Object::copy_from_slice(b"hi");
    let head = response::payload_head(0x13, &7u64.to_le_bytes(), &payload);
    let header = Header::decode(&head).unwrap();
    assert_eq!(header.body_len, 10);
    assert_eq!(head.len(), HEADER_LEN + 8);

    let event = response::event_head(0x16, EventKind::Notify, b"q", None);
    let header = Header::decode(&event).unwrap();
    assert_eq!(header.magic, EVENT_MAGIC);
    assert_eq!(header.flag, EventKind::Notify as u8);
    assert_eq!(Status::try_from(9), Ok(Status::NoData));
    assert_eq!(Status::try_from(42), Err(42));
}
