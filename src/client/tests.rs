use super::Connection;
use crate::broker::{ChannelId, ConnectionId, Object, QueueId};
use tokio::sync::mpsc;

fn connection() -> (Connection, mpsc::UnboundedReceiver<Object>) {
    let (tx, rx) = mpsc::unbounded_channel::<Object>();
    (Connection::new(ConnectionId(1), tx, 100), rx)
}

#[test]
fn test_connection_send() {
    let (conn, mut rx) = connection();
    assert!(conn.send(Object::copy_from_slice(b"ping")));
    assert_eq!(&rx.try_recv().unwrap()[..], b"ping");

    drop(rx);
    assert!(!conn.send(Object::copy_from_slice(b"lost")));
}

#[test]
fn test_connection_tracks_queues_once() {
    let (mut conn, _rx) = connection();
    conn.add_declared(QueueId(7));
    conn.add_declared(QueueId(7));
    conn.add_subscribed(QueueId(7));
    assert_eq!(conn.declared(), &[QueueId(7)]);

    conn.forget_queue(QueueId(7));
    assert!(conn.declared().is_empty());
    assert!(conn.subscribed().is_empty());
}

#[test]
fn test_connection_channel_index() {
    let (mut conn, _rx) = connection();
    let ch = ChannelId(3);
    conn.add_topic(ch, "a");
    conn.add_topic(ch, "b");
    conn.add_pattern(ch, "a.*");
    conn.remove_topic(ch, "a");
    assert_eq!(conn.topics(ch), &["b".to_string()]);

    conn.remove_topic(ch, "b");
    assert!(conn.topics(ch).is_empty());

    let links = conn.take_links();
    assert!(links.topics.is_empty());
    assert_eq!(links.patterns, vec![(ch, vec!["a.*".to_string()])]);
    assert!(conn.patterns(ch).is_empty());
}

#[test]
fn test_connection_touch() {
    let (mut conn, _rx) = connection();
    assert_eq!(conn.last_activity_ms(), 100);
    conn.touch(250);
    assert_eq!(conn.last_activity_ms(), 250);
}
