//! Builders for outbound packets.
//!
//! Packets that carry a message payload are split in two objects: a head
//! object holding the header and fixed fields, and the payload object
//! itself, shared with the queue or with every other recipient.

use super::{EVENT_MAGIC, EventKind, HEADER_LEN, Header, RESPONSE_MAGIC, Status};
use crate::broker::Object;

fn packet(header: Header, prefix: &[u8]) -> Object {
    let mut buf = Vec::with_capacity(HEADER_LEN + prefix.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(prefix);
    Object::new(buf)
}

fn body_len(prefix: &[u8], payload: Option<&Object>) -> u32 {
    let total = prefix.len() + payload.map_or(0, |p| p.len());
    u32::try_from(total).unwrap_or(u32::MAX)
}

/// A body-less response carrying only `status`.
pub fn status(opcode: u8, status: Status) -> Object {
    packet(Header::new(RESPONSE_MAGIC, opcode, status as u8, 0), &[])
}

/// A successful response with an inline body.
pub fn data(opcode: u8, body: &[u8]) -> Object {
    packet(
        Header::new(RESPONSE_MAGIC, opcode, Status::Success as u8, body_len(body, None)),
        body,
    )
}

/// Head object of a successful response whose body ends with `payload`.
pub fn payload_head(opcode: u8, prefix: &[u8], payload: &Object) -> Object {
    packet(
        Header::new(
            RESPONSE_MAGIC,
            opcode,
            Status::Success as u8,
            body_len(prefix, Some(payload)),
        ),
        prefix,
    )
}

/// Head object of an event; when `payload` is given it must be sent right
/// after the head.
pub fn event_head(opcode: u8, kind: EventKind, prefix: &[u8], payload: Option<&Object>) -> Object {
    packet(
        Header::new(EVENT_MAGIC, opcode, kind as u8, body_len(prefix, payload)),
        prefix,
    )
}
