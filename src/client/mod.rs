//! The `client` module defines the broker-side representation of a client
//! connection: its permissions, what it has declared and subscribed to,
//! and the channel used to hand packets to its transport task.

pub mod connection;
pub use connection::{Connection, ConnectionLinks};

#[cfg(test)]
mod tests;
