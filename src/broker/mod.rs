//! The broker core: queues, routes, channels and users, plus the [`Broker`]
//! context that owns them together with every live connection.
//!
//! Entities refer to each other through the copyable ids below and resolve
//! them through the broker's registries, so removing one side of a relation
//! never leaves a dangling reference on the other.

use std::fmt;

pub mod channel;
pub mod engine;
pub mod list;
pub mod message;
pub mod object;
pub mod queue;
pub mod route;
pub mod timers;
pub mod user;

pub use engine::{Broker, BrokerOptions, SharedBroker, lock_broker};
pub use object::Object;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// Identifies a live client connection.
    ConnectionId,
    "conn"
);
entity_id!(QueueId, "queue");
entity_id!(RouteId, "route");
entity_id!(ChannelId, "channel");

/// Entity flag bits shared by queues, routes and channels.
pub mod flags {
    /// Written to snapshots.
    pub const DURABLE: u32 = 1 << 0;
    /// Removed once nothing references it any more.
    pub const AUTO_DELETE: u32 = 1 << 1;
    /// Fan out to one member at a time instead of all of them.
    pub const ROUND_ROBIN: u32 = 1 << 2;
    /// Queues only: evict the oldest pending message instead of rejecting
    /// a push into a full queue.
    pub const FORCE_PUSH: u32 = 1 << 3;
}
