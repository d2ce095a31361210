//! Work queues with at-least-once delivery.
//!
//! A message moves `Pending -> InFlight` on pop and leaves the queue on
//! confirm. In-flight messages whose confirmation deadline passes go back
//! to the head of the pending FIFO; pending messages whose expiration
//! passes are dropped.
//!
//! Subscribers come in two modes. A message-mode subscriber receives the
//! payload of a newly pushed message and that delivery consumes it. A
//! notify-mode subscriber only learns that the queue has data and is
//! expected to `get`/`pop`; the message stays pending.

use std::collections::{BTreeMap, VecDeque};

use super::list::RotatingList;
use super::message::Message;
use super::object::Object;
use super::{ConnectionId, QueueId, RouteId, flags};
use crate::utils::error::{BrokerError, QueueError};
use crate::utils::validate;

/// Hard ceiling on `max_message_size`; a configured size of 0 means this.
pub const MAX_MESSAGE_SIZE: u32 = i32::MAX as u32;

/// Subscribe flag selecting notify-only delivery.
pub const SUBSCRIBE_NOTIFY: u32 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeMode {
    Message,
    Notify,
}

impl SubscribeMode {
    pub fn from_flags(flags: u32) -> Self {
        if flags & SUBSCRIBE_NOTIFY != 0 {
            SubscribeMode::Notify
        } else {
            SubscribeMode::Message
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscriber {
    pub conn: ConnectionId,
    pub mode: SubscribeMode,
}

/// Something a subscriber must be told, produced by queue mutations and
/// turned into wire events by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Notify { conn: ConnectionId },
    Message { conn: ConnectionId, object: Object },
}

#[derive(Debug)]
pub struct Queue {
    pub id: QueueId,
    name: String,
    max_messages: u32,
    max_message_size: u32,
    flags: u32,
    pending: VecDeque<Message>,
    in_flight: BTreeMap<u64, Message>,
    declared: RotatingList<ConnectionId>,
    subscribers: RotatingList<Subscriber>,
    /// (route, key) bindings pointing at this queue.
    bindings: Vec<(RouteId, String)>,
}

impl Queue {
    pub fn new(
        id: QueueId,
        name: &str,
        max_messages: u32,
        max_message_size: u32,
        flags: u32,
    ) -> Result<Self, BrokerError> {
        if !validate::is_valid_name(name) {
            return Err(BrokerError::BadValue);
        }
        if max_messages == 0 || max_message_size > MAX_MESSAGE_SIZE {
            return Err(BrokerError::BadValue);
        }

        let max_message_size = if max_message_size == 0 {
            MAX_MESSAGE_SIZE
        } else {
            max_message_size
        };

        Ok(Self {
            id,
            name: name.to_string(),
            max_messages,
            max_message_size,
            flags,
            pending: VecDeque::new(),
            in_flight: BTreeMap::new(),
            declared: RotatingList::new(),
            subscribers: RotatingList::new(),
            bindings: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn max_messages(&self) -> u32 {
        self.max_messages
    }

    pub fn max_message_size(&self) -> u32 {
        self.max_message_size
    }

    pub fn is_durable(&self) -> bool {
        self.flags & flags::DURABLE != 0
    }

    pub fn is_auto_delete(&self) -> bool {
        self.flags & flags::AUTO_DELETE != 0
    }

    pub fn is_round_robin(&self) -> bool {
        self.flags & flags::ROUND_ROBIN != 0
    }

    pub fn is_force_push(&self) -> bool {
        self.flags & flags::FORCE_PUSH != 0
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn declared_count(&self) -> usize {
        self.declared.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn declared(&self) -> Vec<ConnectionId> {
        self.declared.snapshot()
    }

    pub fn subscribers(&self) -> Vec<ConnectionId> {
        self.subscribers.iter().map(|s| s.conn).collect()
    }

    /// In-flight messages in tag order followed by pending ones; the order
    /// they would be redelivered in after a restart.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.in_flight.values().chain(self.pending.iter())
    }

    /// Payload bytes this queue keeps alive.
    pub fn retained_bytes(&self) -> usize {
        self.messages().map(Message::len).sum()
    }

    /// Appends `message` and announces it to subscribers.
    pub fn push(&mut self, message: Message) -> Result<Vec<QueueEvent>, QueueError> {
        if message.len() > self.max_message_size as usize {
            return Err(QueueError::TooLarge);
        }

        if self.pending.len() + self.in_flight.len() >= self.max_messages as usize {
            if !self.is_force_push() || self.pending.pop_front().is_none() {
                return Err(QueueError::Full);
            }
        }

        self.pending.push_back(message);
        Ok(self.announce_newest())
    }

    /// Places a restored message at the tail without announcing it.
    pub fn restore(&mut self, message: Message) -> Result<(), QueueError> {
        if message.len() > self.max_message_size as usize {
            return Err(QueueError::TooLarge);
        }
        if self.pending.len() + self.in_flight.len() >= self.max_messages as usize {
            return Err(QueueError::Full);
        }
        self.pending.push_back(message);
        Ok(())
    }

    fn announce_newest(&mut self) -> Vec<QueueEvent> {
        let recipients: Vec<Subscriber> = if self.is_round_robin() {
            self.subscribers.next_round_robin().copied().into_iter().collect()
        } else {
            self.subscribers.snapshot()
        };

        if recipients.is_empty() {
            return Vec::new();
        }

        let consumed = if recipients.iter().any(|s| s.mode == SubscribeMode::Message) {
            self.pending.pop_back().map(|m| m.object)
        } else {
            None
        };

        // a consumed message is gone, so notify-mode subscribers hear nothing
        recipients
            .into_iter()
            .filter_map(|s| match (s.mode, &consumed) {
                (SubscribeMode::Message, Some(object)) => Some(QueueEvent::Message {
                    conn: s.conn,
                    object: object.clone(),
                }),
                (SubscribeMode::Notify, Some(_)) => None,
                (_, None) => Some(QueueEvent::Notify { conn: s.conn }),
            })
            .collect()
    }

    fn drop_expired_head(&mut self, now_ms: u64) {
        while self.pending.front().is_some_and(|m| m.is_expired(now_ms)) {
            self.pending.pop_front();
        }
    }

    /// Oldest live pending message, left in place.
    pub fn get(&mut self, now_ms: u64) -> Option<&Message> {
        self.drop_expired_head(now_ms);
        self.pending.front()
    }

    /// Moves the oldest live pending message in flight. A zero timeout
    /// keeps it in flight until confirmed.
    pub fn pop(&mut self, now_ms: u64, confirm_timeout_ms: u32) -> Option<&Message> {
        self.drop_expired_head(now_ms);
        let mut message = self.pending.pop_front()?;
        message.confirm_deadline = if confirm_timeout_ms == 0 {
            0
        } else {
            now_ms + u64::from(confirm_timeout_ms)
        };

        let tag = message.tag;
        self.in_flight.insert(tag, message);
        self.in_flight.get(&tag)
    }

    pub fn confirm(&mut self, tag: u64) -> Result<(), QueueError> {
        self.in_flight
            .remove(&tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownTag)
    }

    /// Drops every pending message; in-flight ones are untouched.
    pub fn purge(&mut self) -> usize {
        let purged = self.pending.len();
        self.pending.clear();
        purged
    }

    pub fn reclaim_expired(&mut self, now_ms: u64) -> usize {
        let before = self.pending.len();
        self.pending.retain(|m| !m.is_expired(now_ms));
        before - self.pending.len()
    }

    /// Returns overdue in-flight messages to the head of the pending FIFO,
    /// oldest first.
    pub fn reclaim_unconfirmed(&mut self, now_ms: u64) -> usize {
        let overdue: Vec<u64> = self
            .in_flight
            .values()
            .filter(|m| m.confirm_overdue(now_ms))
            .map(|m| m.tag)
            .collect();

        for tag in overdue.iter().rev() {
            if let Some(mut message) = self.in_flight.remove(tag) {
                message.confirm_deadline = 0;
                self.pending.push_front(message);
            }
        }

        overdue.len()
    }

    pub fn declare(&mut self, conn: ConnectionId) -> bool {
        self.declared.insert(conn)
    }

    pub fn undeclare(&mut self, conn: ConnectionId) -> bool {
        self.declared.remove(&conn)
    }

    pub fn is_declared(&self, conn: ConnectionId) -> bool {
        self.declared.contains(&conn)
    }

    /// Adds a subscriber; if data is already waiting it is told so straight
    /// away.
    pub fn subscribe(
        &mut self,
        conn: ConnectionId,
        mode: SubscribeMode,
    ) -> Result<Vec<QueueEvent>, BrokerError> {
        if self.is_subscribed(conn) {
            return Err(BrokerError::Conflict("already subscribed"));
        }

        self.subscribers.push_back(Subscriber { conn, mode });

        if self.pending.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(vec![QueueEvent::Notify { conn }])
        }
    }

    pub fn unsubscribe(&mut self, conn: ConnectionId) -> bool {
        self.subscribers.remove_where(|s| s.conn == conn).is_some()
    }

    pub fn is_subscribed(&self, conn: ConnectionId) -> bool {
        self.subscribers.find(|s| s.conn == conn).is_some()
    }

    /// Notify events for every subscriber, used after redelivery.
    pub fn notify_all(&self) -> Vec<QueueEvent> {
        self.subscribers
            .iter()
            .map(|s| QueueEvent::Notify { conn: s.conn })
            .collect()
    }

    /// True when no connection declares or subscribes to this queue.
    pub fn is_unused(&self) -> bool {
        self.declared.is_empty() && self.subscribers.is_empty()
    }

    pub fn add_binding(&mut self, route: RouteId, key: &str) {
        if !self.has_binding(route, key) {
            self.bindings.push((route, key.to_string()));
        }
    }

    pub fn remove_binding(&mut self, route: RouteId, key: &str) {
        self.bindings.retain(|(r, k)| !(*r == route && k == key));
    }

    pub fn remove_route(&mut self, route: RouteId) {
        self.bindings.retain(|(r, _)| *r != route);
    }

    pub fn has_binding(&self, route: RouteId, key: &str) -> bool {
        self.bindings.iter().any(|(r, k)| *r == route && k == key)
    }

    pub fn bindings(&self) -> &[(RouteId, String)] {
        &self.bindings
    }
}
