use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::broker::list::KeyList;
use crate::broker::user::Permissions;
use crate::broker::{ChannelId, ConnectionId, Object, QueueId};

/// Broker-side state of one client connection.
///
/// Outbound packets go through `sender` to the transport task that owns
/// the socket. The queue and channel lists are the connection's own index
/// of everything it holds, walked on teardown to unwind it.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub perm: Permissions,
    sender: UnboundedSender<Object>,
    declared: Vec<QueueId>,
    subscribed: Vec<QueueId>,
    topics: KeyList<ChannelId, Vec<String>>,
    patterns: KeyList<ChannelId, Vec<String>>,
    last_activity_ms: u64,
}

impl Connection {
    pub fn new(id: ConnectionId, sender: UnboundedSender<Object>, now_ms: u64) -> Self {
        Self {
            id,
            perm: Permissions::NONE,
            sender,
            declared: Vec::new(),
            subscribed: Vec::new(),
            topics: KeyList::new(),
            patterns: KeyList::new(),
            last_activity_ms: now_ms,
        }
    }

    /// Queues `object` for writing; returns false once the transport side
    /// has gone away.
    pub fn send(&self, object: Object) -> bool {
        match self.sender.send(object) {
            Ok(()) => true,
            Err(_) => {
                debug!("{} outbound channel closed", self.id);
                false
            }
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms
    }

    pub fn declared(&self) -> &[QueueId] {
        &self.declared
    }

    pub fn subscribed(&self) -> &[QueueId] {
        &self.subscribed
    }

    pub fn has_declared(&self, queue: QueueId) -> bool {
        self.declared.contains(&queue)
    }

    pub fn add_declared(&mut self, queue: QueueId) {
        if !self.has_declared(queue) {
            self.declared.push(queue);
        }
    }

    pub fn add_subscribed(&mut self, queue: QueueId) {
        if !self.subscribed.contains(&queue) {
            self.subscribed.push(queue);
        }
    }

    pub fn remove_subscribed(&mut self, queue: QueueId) {
        self.subscribed.retain(|q| *q != queue);
    }

    /// Forgets a queue entirely, as when it is deleted.
    pub fn forget_queue(&mut self, queue: QueueId) {
        self.declared.retain(|q| *q != queue);
        self.subscribed.retain(|q| *q != queue);
    }

    pub fn add_topic(&mut self, channel: ChannelId, topic: &str) {
        let topics = self.topics.get_or_insert_with(channel, Vec::new);
        if !topics.iter().any(|t| t == topic) {
            topics.push(topic.to_string());
        }
    }

    pub fn remove_topic(&mut self, channel: ChannelId, topic: &str) {
        remove_entry(&mut self.topics, channel, topic);
    }

    pub fn add_pattern(&mut self, channel: ChannelId, pattern: &str) {
        let patterns = self.patterns.get_or_insert_with(channel, Vec::new);
        if !patterns.iter().any(|p| p == pattern) {
            patterns.push(pattern.to_string());
        }
    }

    pub fn remove_pattern(&mut self, channel: ChannelId, pattern: &str) {
        remove_entry(&mut self.patterns, channel, pattern);
    }

    /// Forgets every subscription on `channel`, as when it is deleted.
    pub fn forget_channel(&mut self, channel: ChannelId) {
        self.topics.remove(&channel);
        self.patterns.remove(&channel);
    }

    pub fn topics(&self, channel: ChannelId) -> &[String] {
        self.topics.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn patterns(&self, channel: ChannelId) -> &[String] {
        self.patterns.get(&channel).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Everything this connection holds, leaving it empty. Used on teardown.
    pub fn take_links(&mut self) -> ConnectionLinks {
        ConnectionLinks {
            declared: std::mem::take(&mut self.declared),
            subscribed: std::mem::take(&mut self.subscribed),
            topics: self.topics.drain().collect(),
            patterns: self.patterns.drain().collect(),
        }
    }
}

fn remove_entry(map: &mut KeyList<ChannelId, Vec<String>>, channel: ChannelId, value: &str) {
    if let Some(values) = map.get_mut(&channel) {
        values.retain(|v| v != value);
        if values.is_empty() {
            map.remove(&channel);
        }
    }
}

/// The relations a connection held when it was torn down.
#[derive(Debug, Default)]
pub struct ConnectionLinks {
    pub declared: Vec<QueueId>,
    pub subscribed: Vec<QueueId>,
    pub topics: Vec<(ChannelId, Vec<String>)>,
    pub patterns: Vec<(ChannelId, Vec<String>)>,
}
