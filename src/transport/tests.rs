use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::{Outbound, serve_tcp};
use crate::broker::{Broker, BrokerOptions, Object, SharedBroker, lock_broker};
use crate::protocol::{
    BodyWriter, Command, EVENT_MAGIC, HEADER_LEN, Header, REQUEST_MAGIC, RESPONSE_MAGIC, Status,
};

const WAIT: Duration = Duration::from_secs(5);

async fn start(options: BrokerOptions) -> (SharedBroker, SocketAddr) {
    let broker = Broker::new(options).into_shared();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_tcp(listener, broker.clone(), 1024));
    (broker, addr)
}

fn request(command: Command, noack: bool, body: BodyWriter) -> Vec<u8> {
    let body = body.finish();
    let mut packet = Header::new(REQUEST_MAGIC, command as u8, noack as u8, body.len() as u32)
        .encode()
        .to_vec();
    packet.extend_from_slice(&body);
    packet
}

fn named(name: &str) -> BodyWriter {
    let mut b = BodyWriter::new();
    b.name(name);
    b
}

async fn read_packet(stream: &mut TcpStream) -> (Header, Vec<u8>) {
    let mut head = [0u8; HEADER_LEN];
    timeout(WAIT, stream.read_exact(&mut head)).await.unwrap().unwrap();
    let header = Header::decode(&head).unwrap();
    let mut body = vec![0u8; header.body_len as usize];
    timeout(WAIT, stream.read_exact(&mut body)).await.unwrap().unwrap();
    (header, body)
}

async fn call(stream: &mut TcpStream, command: Command, body: BodyWriter) -> (Status, Vec<u8>) {
    stream.write_all(&request(command, false, body)).await.unwrap();
    let (header, body) = read_packet(stream).await;
    assert_eq!(header.magic, RESPONSE_MAGIC);
    assert_eq!(header.opcode, command as u8);
    (Status::try_from(header.flag).unwrap(), body)
}

async fn login(addr: SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut auth = BodyWriter::new();
    auth.fixed("admin", 32).fixed("admin", 32);
    assert_eq!(call(&mut stream, Command::Auth, auth).await.0, Status::Success);
    stream
}

async fn wait_for_connections(broker: &SharedBroker, expected: usize) {
    timeout(WAIT, async {
        while lock_broker(broker).connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_ping_over_tcp() {
    let (_broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (status, body) = call(&mut stream, Command::Ping, BodyWriter::new()).await;
    assert_eq!(status, Status::Success);
    assert!(body.is_empty());
}

#[tokio::test]
async fn test_queue_round_trip_over_tcp() {
    let (_broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = login(addr).await;

    let mut create = named("jobs");
    create.u32(0).u32(0).u32(0);
    assert_eq!(call(&mut stream, Command::QueueCreate, create).await.0, Status::Success);
    assert_eq!(call(&mut stream, Command::QueueDeclare, named("jobs")).await.0, Status::Success);

    let mut push = named("jobs");
    push.u32(0).bytes(b"payload");
    assert_eq!(call(&mut stream, Command::QueuePush, push).await.0, Status::Success);

    let mut pop = named("jobs");
    pop.u32(1000);
    let (status, body) = call(&mut stream, Command::QueuePop, pop).await;
    assert_eq!(status, Status::Success);
    assert_eq!(&body[8..], b"payload");

    let mut confirm = named("jobs");
    confirm.bytes(&body[..8]);
    assert_eq!(call(&mut stream, Command::QueueConfirm, confirm).await.0, Status::Success);
}

#[tokio::test]
async fn test_pipelined_requests_in_one_write() {
    let (_broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut batch = Vec::new();
    for _ in 0..3 {
        batch.extend(request(Command::Ping, false, BodyWriter::new()));
    }
    batch.extend(request(Command::Stat, false, BodyWriter::new()));
    stream.write_all(&batch).await.unwrap();

    for _ in 0..3 {
        let (header, _) = read_packet(&mut stream).await;
        assert_eq!(header.opcode, Command::Ping as u8);
        assert_eq!(header.flag, Status::Success as u8);
    }
    let (header, _) = read_packet(&mut stream).await;
    assert_eq!(header.opcode, Command::Stat as u8);
    assert_eq!(header.flag, Status::AccessDenied as u8);
}

#[tokio::test]
async fn test_request_split_across_writes() {
    let (_broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let mut auth = BodyWriter::new();
    auth.fixed("admin", 32).fixed("admin", 32);
    let packet = request(Command::Auth, false, auth);
    for chunk in packet.chunks(5) {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let (header, _) = read_packet(&mut stream).await;
    assert_eq!(header.opcode, Command::Auth as u8);
    assert_eq!(header.flag, Status::Success as u8);
}

#[tokio::test]
async fn test_bad_magic_keeps_connection_usable() {
    let (_broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let bad = Header::new(0x1234, Command::Ping as u8, 0, 0).encode();
    stream.write_all(&bad).await.unwrap();
    let (header, _) = read_packet(&mut stream).await;
    assert_eq!(header.opcode, Command::Ping as u8);
    assert_eq!(header.flag, Status::BadPacket as u8);

    assert_eq!(call(&mut stream, Command::Ping, BodyWriter::new()).await.0, Status::Success);
}

#[tokio::test]
async fn test_oversized_request_is_rejected() {
    let (_broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let head = Header::new(REQUEST_MAGIC, Command::Ping as u8, 0, 4096).encode();
    stream.write_all(&head).await.unwrap();
    let (header, _) = read_packet(&mut stream).await;
    assert_eq!(header.flag, Status::BadPacket as u8);
}

#[tokio::test]
async fn test_disconnect_closes_stream() {
    let (broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    wait_for_connections(&broker, 1).await;

    stream
        .write_all(&request(Command::Disconnect, false, BodyWriter::new()))
        .await
        .unwrap();
    let mut buf = [0u8; 8];
    let read = timeout(WAIT, stream.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0)) || read.is_err());
    wait_for_connections(&broker, 0).await;
}

#[tokio::test]
async fn test_peer_close_tears_down_subscriptions() {
    let (broker, addr) = start(BrokerOptions::default()).await;
    let mut stream = login(addr).await;

    let mut create = named("tmp");
    create.u32(0).u32(0).u32(crate::broker::flags::AUTO_DELETE);
    assert_eq!(call(&mut stream, Command::QueueCreate, create).await.0, Status::Success);
    assert_eq!(call(&mut stream, Command::QueueDeclare, named("tmp")).await.0, Status::Success);

    drop(stream);
    wait_for_connections(&broker, 0).await;
    assert!(lock_broker(&broker).queue_id("tmp").is_none());
}

#[tokio::test]
async fn test_connections_over_limit_are_refused() {
    let options = BrokerOptions {
        max_clients: 1,
        ..BrokerOptions::default()
    };
    let (broker, addr) = start(options).await;
    let mut first = TcpStream::connect(addr).await.unwrap();
    wait_for_connections(&broker, 1).await;

    let mut second = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 8];
    let read = timeout(WAIT, second.read(&mut buf)).await.unwrap();
    assert!(matches!(read, Ok(0)) || read.is_err());

    assert_eq!(call(&mut first, Command::Ping, BodyWriter::new()).await.0, Status::Success);
}

#[tokio::test]
async fn test_channel_event_reaches_other_connection() {
    let (_broker, addr) = start(BrokerOptions::default()).await;
    let mut subscriber = login(addr).await;
    let mut publisher = login(addr).await;

    let mut create = named("news");
    create.u32(0);
    assert_eq!(call(&mut publisher, Command::ChannelCreate, create).await.0, Status::Success);

    let mut subscribe = named("news");
    subscribe.topic("sport");
    assert_eq!(
        call(&mut subscriber, Command::ChannelSubscribe, subscribe).await.0,
        Status::Success
    );

    let mut publish = named("news");
    publish.topic("sport").bytes(b"goal");
    assert_eq!(call(&mut publisher, Command::ChannelPublish, publish).await.0, Status::Success);

    let (header, body) = read_packet(&mut subscriber).await;
    assert_eq!(header.magic, EVENT_MAGIC);
    assert_eq!(header.opcode, Command::ChannelSubscribe as u8);
    assert_eq!(&body[..4], b"news");
    assert_eq!(&body[64..69], b"sport");
    assert_eq!(&body[96..], b"goal");
}

#[test]
fn test_outbound_resumes_partial_writes() {
    let mut outbound = Outbound::new();
    outbound.push(Object::new(b"hello".to_vec()));
    outbound.push(Object::new(b"world".to_vec()));
    assert_eq!(outbound.pending_bytes(), 10);

    let mut written = Vec::new();
    outbound
        .write_to(|buf| {
            let n = buf.len().min(3);
            if written.len() >= 7 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            written.extend_from_slice(&buf[..n]);
            Ok(n)
        })
        .unwrap();
    assert_eq!(written, b"helloworl"[..written.len()].to_vec());
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound.pending_bytes(), 10 - written.len());

    outbound
        .write_to(|buf| {
            written.extend_from_slice(buf);
            Ok(buf.len())
        })
        .unwrap();
    assert_eq!(written, b"helloworld");
    assert!(outbound.is_empty());
}

#[test]
fn test_outbound_write_zero_is_an_error() {
    let mut outbound = Outbound::new();
    outbound.push(Object::new(b"x".to_vec()));
    let err = outbound.write_to(|_| Ok(0)).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    assert_eq!(outbound.len(), 1);
}
