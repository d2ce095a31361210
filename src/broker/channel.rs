//! Pub/sub channels.
//!
//! A channel keeps two independent subscription maps: exact topics and glob
//! patterns. A publish first serves the exact topic (one subscriber in
//! round-robin mode, all otherwise) and then every matching pattern, whose
//! subscribers always all receive it.

use super::list::{KeyList, RotatingList};
use super::{ChannelId, ConnectionId, flags};
use crate::utils::error::BrokerError;
use crate::utils::pattern::pattern_match;
use crate::utils::validate;

/// One recipient of a publish. `pattern` is set when the delivery came from
/// a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub conn: ConnectionId,
    pub pattern: Option<String>,
}

type Subscriptions = KeyList<String, RotatingList<ConnectionId>>;

fn add(map: &mut Subscriptions, conn: ConnectionId, key: &str) -> bool {
    map.get_or_insert_with(key.to_string(), RotatingList::new)
        .insert(conn)
}

fn remove(map: &mut Subscriptions, conn: ConnectionId, key: &str) -> Result<(), BrokerError> {
    let subscribers = map.get_mut(key).ok_or(BrokerError::NotFound)?;
    if !subscribers.remove(&conn) {
        return Err(BrokerError::NotFound);
    }
    if subscribers.is_empty() {
        map.remove(key);
    }
    Ok(())
}

#[derive(Debug)]
pub struct Channel {
    pub id: ChannelId,
    name: String,
    flags: u32,
    topics: Subscriptions,
    patterns: Subscriptions,
}

impl Channel {
    pub fn new(id: ChannelId, name: &str, flags: u32) -> Result<Self, BrokerError> {
        if !validate::is_valid_name(name) {
            return Err(BrokerError::BadValue);
        }
        Ok(Self {
            id,
            name: name.to_string(),
            flags,
            topics: KeyList::new(),
            patterns: KeyList::new(),
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

    pub fn is_durable(&self) -> bool {
        self.flags & flags::DURABLE != 0
    }

    pub fn is_auto_delete(&self) -> bool {
        self.flags & flags::AUTO_DELETE != 0
    }

    pub fn is_round_robin(&self) -> bool {
        self.flags & flags::ROUND_ROBIN != 0
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_unused(&self) -> bool {
        self.topics.is_empty() && self.patterns.is_empty()
    }

    pub fn topic_subscribers(&self, topic: &str) -> Vec<ConnectionId> {
        self.topics
            .get(topic)
            .map(RotatingList::snapshot)
            .unwrap_or_default()
    }

    pub fn pattern_subscribers(&self, pattern: &str) -> Vec<ConnectionId> {
        self.patterns
            .get(pattern)
            .map(RotatingList::snapshot)
            .unwrap_or_default()
    }

    /// Every connection holding at least one subscription here.
    pub fn connections(&self) -> Vec<ConnectionId> {
        let mut all: Vec<ConnectionId> = self
            .topics
            .values()
            .chain(self.patterns.values())
            .flat_map(|subs| subs.iter().copied())
            .collect();
        all.sort();
        all.dedup();
        all
    }

    /// Returns whether the subscription is new.
    pub fn subscribe(&mut self, conn: ConnectionId, topic: &str) -> bool {
        add(&mut self.topics, conn, topic)
    }

    pub fn unsubscribe(&mut self, conn: ConnectionId, topic: &str) -> Result<(), BrokerError> {
        remove(&mut self.topics, conn, topic)
    }

    pub fn psubscribe(&mut self, conn: ConnectionId, pattern: &str) -> bool {
        add(&mut self.patterns, conn, pattern)
    }

    pub fn punsubscribe(&mut self, conn: ConnectionId, pattern: &str) -> Result<(), BrokerError> {
        remove(&mut self.patterns, conn, pattern)
    }

    /// Resolves the recipients of a publish under `topic`.
    pub fn publish(&mut self, topic: &str) -> Vec<Delivery> {
        let mut deliveries = Vec::new();
        let round_robin = self.is_round_robin();

        if let Some(subscribers) = self.topics.get_mut(topic) {
            if round_robin {
                if let Some(conn) = subscribers.next_round_robin() {
                    deliveries.push(Delivery {
                        conn: *conn,
                        pattern: None,
                    });
                }
            } else {
                deliveries.extend(subscribers.iter().map(|conn| Delivery {
                    conn: *conn,
                    pattern: None,
                }));
            }
        }

        for (pattern, subscribers) in self.patterns.iter() {
            if !pattern_match(topic, pattern) {
                continue;
            }
            deliveries.extend(subscribers.iter().map(|conn| Delivery {
                conn: *conn,
                pattern: Some(pattern.clone()),
            }));
        }

        deliveries
    }
}
