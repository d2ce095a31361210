//! The `transport` module accepts client connections and moves bytes
//! between sockets and the broker.
//!
//! Every connection runs in its own task: inbound bytes go through a
//! [`RequestFramer`](crate::protocol::RequestFramer) and each complete
//! request is dispatched under the broker lock; outbound packets arrive on
//! the connection's channel and are written as the socket accepts them,
//! resuming partial writes where they stopped.

pub mod outbound;
pub mod server;

pub use outbound::Outbound;
pub use server::{ReadyStream, handle_connection, serve_tcp};

#[cfg(unix)]
pub use server::serve_unix;

#[cfg(test)]
mod tests;
