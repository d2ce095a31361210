use super::list::{KeyList, RotatingList};
use super::{QueueId, RouteId, flags};
use crate::utils::error::BrokerError;
use crate::utils::validate;

/// A topic exchange: routing keys mapped to the queues bound under them.
///
/// Pushing through a route resolves the target queues here; the broker
/// performs the actual queue pushes, giving every target its own message
/// with its own tag around the shared payload.
#[derive(Debug)]
pub struct Route {
    pub id: RouteId,
    name: String,
    flags: u32,
    keys: KeyList<String, RotatingList<QueueId>>,
}

impl Route {
    pub fn new(id: RouteId, name: &str, flags: u32) -> Result<Self, BrokerError> {
        if !validate::is_valid_name(name) {
            return Err(BrokerError::BadValue);
        }
        Ok(Self {
            id,
            name: name.to_string(),
            flags,
            keys: KeyList::new(),
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

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_unused(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every (key, queue) binding in insertion order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, QueueId)> {
        self.keys
            .iter()
            .flat_map(|(key, queues)| queues.iter().map(move |q| (key.as_str(), *q)))
    }

    /// Returns whether a new binding was made.
    pub fn bind(&mut self, queue: QueueId, key: &str) -> bool {
        self.keys
            .get_or_insert_with(key.to_string(), RotatingList::new)
            .insert(queue)
    }

    /// Removes one binding, dropping the key once no queue is left under it.
    /// Only an unknown key is an error.
    pub fn unbind(&mut self, queue: QueueId, key: &str) -> Result<(), BrokerError> {
        let queues = self.keys.get_mut(key).ok_or(BrokerError::NotFound)?;
        queues.remove(&queue);
        if queues.is_empty() {
            self.keys.remove(key);
        }
        Ok(())
    }

    /// Drops `queue` from every key it is bound under.
    pub fn unbind_queue(&mut self, queue: QueueId) {
        self.keys.retain(|_, queues| {
            queues.remove(&queue);
            !queues.is_empty()
        });
    }

    /// Queues that a push under `key` goes to: one, rotating, in
    /// round-robin mode, otherwise all of them.
    pub fn targets(&mut self, key: &str) -> Option<Vec<QueueId>> {
        let round_robin = self.is_round_robin();
        let queues = self.keys.get_mut(key)?;
        if round_robin {
            queues.next_round_robin().map(|q| vec![*q])
        } else {
            Some(queues.snapshot())
        }
    }
}
