use std::fs;
use std::sync::Arc;

use tempfile::tempdir;
use tokio::sync::mpsc;

use super::snapshot::{self, MAGIC, VERSION};
use super::{SnapshotWorker, Snapshot, capture, load_into, read_snapshot, restore, write_snapshot};
use crate::broker::user::{Permissions, User};
use crate::broker::{Broker, BrokerOptions, Object, flags};
use crate::utils::clock::ManualClock;
use crate::utils::error::StorageError;

fn broker_at(start_ms: u64) -> (Broker, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    let broker = Broker::with_clock(BrokerOptions::default(), clock.clone());
    (broker, clock)
}

fn populated() -> Broker {
    let (mut broker, _) = broker_at(1_000);
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = broker.register_connection(tx);

    broker
        .users_mut()
        .insert(User::new("alice", "secret", Permissions(Permissions::QUEUE)))
        .unwrap();

    broker.create_queue("orders", 100, 0, flags::DURABLE).unwrap();
    broker.create_queue("scratch", 10, 0, 0).unwrap();
    broker.declare_queue(conn, "orders").unwrap();
    broker
        .push_queue(conn, "orders", Object::from(&b"first"[..]), 0)
        .unwrap();
    broker
        .push_queue(conn, "orders", Object::from(&b"second"[..]), 0)
        .unwrap();

    broker.create_route("events", flags::DURABLE).unwrap();
    broker.bind("events", "orders", "created").unwrap();
    broker.bind("events", "orders", "updated").unwrap();
    broker.create_route("transient", 0).unwrap();

    broker.create_channel("news", flags::DURABLE).unwrap();
    broker.create_channel("chatter", 0).unwrap();
    broker
}

#[test]
fn test_capture_keeps_only_durable_entities() {
    let snapshot = capture(&populated());

    assert_eq!(snapshot.users.len(), 1);
    assert_eq!(snapshot.users[0].name, "alice");

    let queues: Vec<&str> = snapshot.queues.iter().map(|q| q.name.as_str()).collect();
    assert_eq!(queues, vec!["orders"]);
    assert_eq!(snapshot.queues[0].messages.len(), 2);

    assert_eq!(snapshot.routes.len(), 1);
    assert_eq!(
        snapshot.routes[0].keys,
        vec![
            ("created".to_string(), vec!["orders".to_string()]),
            ("updated".to_string(), vec!["orders".to_string()]),
        ]
    );

    let channels: Vec<&str> = snapshot.channels.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(channels, vec!["news"]);
}

#[test]
fn test_capture_puts_in_flight_messages_first() {
    let (mut broker, _) = broker_at(1_000);
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = broker.register_connection(tx);
    broker.create_queue("jobs", 10, 0, flags::DURABLE).unwrap();
    broker.declare_queue(conn, "jobs").unwrap();
    for payload in [&b"a"[..], b"b", b"c"] {
        broker.push_queue(conn, "jobs", Object::from(payload), 0).unwrap();
    }
    let (_, popped) = broker.pop_queue(conn, "jobs", 5_000).unwrap();
    assert_eq!(popped.as_slice(), b"a");

    let snapshot = capture(&broker);
    let payloads: Vec<&[u8]> = snapshot.queues[0]
        .messages
        .iter()
        .map(|m| m.payload.as_slice())
        .collect();
    assert_eq!(payloads, vec![&b"a"[..], b"b", b"c"]);
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("talonmq.dat");

    let original = capture(&populated());
    write_snapshot(&path, &original).unwrap();
    assert_eq!(read_snapshot(&path).unwrap(), original);

    let (mut broker, _) = broker_at(2_000);
    assert!(load_into(&mut broker, &path).unwrap());

    assert!(broker.users().find("alice", Some("secret")).is_some());
    let orders = broker.queue_by_name("orders").unwrap();
    assert_eq!(orders.len(), 2);
    assert!(orders.is_durable());
    assert!(broker.queue_by_name("scratch").is_none());

    let route = broker.route_by_name("events").unwrap();
    assert_eq!(route.key_count(), 2);
    assert!(orders.has_binding(route.id, "created"));
    assert!(broker.channel_by_name("news").is_some());
    assert!(broker.channel_by_name("chatter").is_none());
}

#[test]
fn test_load_missing_file_starts_empty() {
    let dir = tempdir().unwrap();
    let (mut broker, _) = broker_at(0);
    assert!(!load_into(&mut broker, &dir.path().join("absent.dat")).unwrap());
    assert_eq!(broker.stats().queues, 0);
}

#[test]
fn test_restore_skips_expired_messages() {
    let (mut source, clock) = broker_at(10_000);
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = source.register_connection(tx);
    source.create_queue("ttl", 10, 0, flags::DURABLE).unwrap();
    source.declare_queue(conn, "ttl").unwrap();
    source
        .push_queue(conn, "ttl", Object::from(&b"short"[..]), 500)
        .unwrap();
    source
        .push_queue(conn, "ttl", Object::from(&b"long"[..]), 60_000)
        .unwrap();
    source
        .push_queue(conn, "ttl", Object::from(&b"forever"[..]), 0)
        .unwrap();
    let snapshot = capture(&source);
    assert_eq!(snapshot.queues[0].messages[0].expires_at, 10_500);

    clock.advance(1_000);
    let (mut target, _) = broker_at(11_000);
    restore(&mut target, snapshot).unwrap();
    assert_eq!(target.queue_by_name("ttl").unwrap().len(), 2);
}

#[test]
fn test_restore_keeps_existing_user_on_duplicate() {
    let (mut broker, _) = broker_at(0);
    let mut snapshot = Snapshot::default();
    snapshot.users.push(snapshot::UserRecord {
        name: "admin".to_string(),
        password: "hijacked".to_string(),
        perm: 0,
    });

    restore(&mut broker, snapshot).unwrap();
    assert!(broker.users().find("admin", Some("admin")).is_some());
    assert!(broker.users().find("admin", Some("hijacked")).is_none());
}

#[test]
fn test_restore_skips_bindings_to_missing_queues() {
    let (mut broker, _) = broker_at(0);
    let mut snapshot = Snapshot::default();
    snapshot.routes.push(snapshot::RouteRecord {
        name: "orphan".to_string(),
        flags: flags::DURABLE,
        keys: vec![("key".to_string(), vec!["missing".to_string()])],
    });

    restore(&mut broker, snapshot).unwrap();
    assert_eq!(broker.route_by_name("orphan").unwrap().key_count(), 0);
}

#[test]
fn test_decode_rejects_bad_magic() {
    let err = snapshot::decode(b"NOTMAGIC\x01\xFF").unwrap_err();
    assert!(matches!(err, StorageError::BadMagic));
}

#[test]
fn test_decode_rejects_other_versions() {
    let mut bytes = MAGIC.to_vec();
    bytes.push(VERSION + 1);
    bytes.push(0xFF);
    assert!(matches!(
        snapshot::decode(&bytes).unwrap_err(),
        StorageError::UnsupportedVersion(v) if v == VERSION + 1
    ));
}

#[test]
fn test_decode_rejects_truncated_file() {
    let mut bytes = Vec::new();
    snapshot::encode(&mut bytes, &capture(&populated())).unwrap();
    bytes.truncate(bytes.len() - 6);
    assert!(matches!(
        snapshot::decode(&bytes).unwrap_err(),
        StorageError::Truncated
    ));
}

#[test]
fn test_decode_rejects_trailing_bytes() {
    let mut bytes = Vec::new();
    snapshot::encode(&mut bytes, &Snapshot::default()).unwrap();
    bytes.push(0);
    assert!(matches!(
        snapshot::decode(&bytes).unwrap_err(),
        StorageError::Corrupt(_)
    ));
}

#[test]
fn test_large_payloads_are_compressed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("big.dat");

    let (mut broker, _) = broker_at(0);
    let (tx, _rx) = mpsc::unbounded_channel();
    let conn = broker.register_connection(tx);
    broker.create_queue("bulk", 10, 0, flags::DURABLE).unwrap();
    broker.declare_queue(conn, "bulk").unwrap();
    broker
        .push_queue(conn, "bulk", Object::new(vec![b'x'; 64 * 1024]), 0)
        .unwrap();

    let snapshot = capture(&broker);
    write_snapshot(&path, &snapshot).unwrap();
    assert!(fs::metadata(&path).unwrap().len() < 4 * 1024);
    assert_eq!(read_snapshot(&path).unwrap(), snapshot);
}

#[test]
fn test_write_replaces_previous_snapshot_without_leftovers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("talonmq.dat");

    write_snapshot(&path, &capture(&populated())).unwrap();
    write_snapshot(&path, &Snapshot::default()).unwrap();

    assert_eq!(read_snapshot(&path).unwrap(), Snapshot::default());
    let entries = fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 1);
}

#[tokio::test]
async fn test_worker_allows_one_save_at_a_time() {
    let dir = tempdir().unwrap();
    let mut worker = SnapshotWorker::default();

    worker
        .spawn(dir.path().join("a.dat"), Snapshot::default())
        .unwrap();
    assert!(worker.is_busy());
    assert!(matches!(
        worker.spawn(dir.path().join("b.dat"), Snapshot::default()),
        Err(StorageError::Busy)
    ));

    assert!(worker.take().unwrap().wait().await.is_ok());
    assert!(!worker.is_busy());
    assert!(dir.path().join("a.dat").exists());
    assert!(!dir.path().join("b.dat").exists());
}

#[tokio::test]
async fn test_worker_poll_reports_completion_once() {
    let dir = tempdir().unwrap();
    let mut worker = SnapshotWorker::default();
    assert!(worker.poll().is_none());

    worker
        .spawn(dir.path().join("a.dat"), Snapshot::default())
        .unwrap();
    let outcome = loop {
        if let Some(outcome) = worker.poll() {
            break outcome;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    };
    assert!(outcome.is_ok());
    assert!(!worker.is_busy());
    assert!(worker.poll().is_none());
}

#[test]
fn test_worker_needs_a_runtime() {
    let dir = tempdir().unwrap();
    let mut worker = SnapshotWorker::default();
    assert!(matches!(
        worker.spawn(dir.path().join("a.dat"), Snapshot::default()),
        Err(StorageError::NoRuntime)
    ));
    assert!(!worker.is_busy());
}

#[test]
fn test_broker_save_without_storage_fails() {
    let mut broker = Broker::default();
    assert!(broker.save(false).is_err());
}

#[tokio::test]
async fn test_broker_background_save_writes_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("talonmq.dat");
    let options = BrokerOptions {
        storage_path: Some(path.clone()),
        ..BrokerOptions::default()
    };
    let mut broker = Broker::new(options);
    broker.create_queue("jobs", 10, 0, flags::DURABLE).unwrap();

    broker.save(true).unwrap();
    assert!(broker.is_saving());
    let pending = broker.take_background_save().unwrap();
    assert!(pending.wait().await.is_ok());
    assert!(!broker.is_saving());

    let snapshot = read_snapshot(&path).unwrap();
    assert_eq!(snapshot.queues.len(), 1);
}
