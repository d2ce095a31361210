//! # TalonMQ
//!
//! `talonmq` is an in-memory message broker speaking a compact binary
//! protocol over TCP and unix sockets. It offers three messaging styles:
//! work queues with acknowledgement and redelivery, routes that fan
//! messages out to queues by routing key, and channels for topic and
//! glob-pattern publish/subscribe. Durable entities survive restarts
//! through a snapshot file.
//!
//! ## Core Modules
//!
//! - `broker`: queues, routes, channels, users and the `Broker` context that owns them.
//! - `client`: broker-side state of a connected client.
//! - `commands`: decodes request bodies and runs them against the broker.
//! - `config`: loads server configuration from files and the environment.
//! - `persistence`: snapshot format, saving and loading.
//! - `protocol`: wire header, framing and body codecs.
//! - `transport`: TCP and unix socket listeners and the per-connection loop.
//! - `utils`: errors, logging, clock, validation and other shared helpers.

pub mod broker;
pub mod client;
pub mod commands;
pub mod config;
pub mod persistence;
pub mod protocol;
pub mod transport;
pub mod utils;
