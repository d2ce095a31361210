//! The `error` module defines the error types used within `talonmq`.
//!
//! Request-level failures are expressed as [`BrokerError`], which maps onto
//! exactly one wire status. Snapshot and framing failures have their own
//! types because they are handled outside the command handlers.

use thiserror::Error;

use crate::protocol::Status;

/// Failure of a single client request. Never escapes the dispatcher: it is
/// always turned into a status response.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("malformed request body")]
    BadPacket,
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),
    #[error("access denied")]
    AccessDenied,
    #[error("invalid value")]
    BadValue,
    #[error("not found")]
    NotFound,
    #[error("queue is not declared by this connection")]
    NotDeclared,
    #[error("no data")]
    NoData,
    #[error("memory limit reached")]
    OutOfMemory,
    #[error("{0}")]
    Conflict(&'static str),
}

impl BrokerError {
    pub fn status(&self) -> Status {
        match self {
            BrokerError::BadPacket => Status::BadPacket,
            BrokerError::UnknownCommand(_) => Status::UnknownCommand,
            BrokerError::AccessDenied => Status::AccessDenied,
            BrokerError::BadValue => Status::BadValue,
            BrokerError::NotFound => Status::NotFound,
            BrokerError::NotDeclared => Status::NotDeclared,
            BrokerError::NoData => Status::NoData,
            BrokerError::OutOfMemory => Status::OutOfMemory,
            BrokerError::Conflict(_) => Status::Error,
        }
    }
}

/// Rejections raised by a single queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("message exceeds the queue's maximum message size")]
    TooLarge,
    #[error("unknown delivery tag")]
    UnknownTag,
}

impl From<QueueError> for BrokerError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full => BrokerError::Conflict("queue is full"),
            QueueError::TooLarge => BrokerError::Conflict("message too large"),
            QueueError::UnknownTag => BrokerError::NotFound,
        }
    }
}

/// Framing failures detected while splitting the inbound byte stream.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("bad request magic {magic:#06x}")]
    BadMagic { opcode: u8, noack: bool, magic: u16 },
    #[error("request body of {len} bytes exceeds the limit")]
    TooLarge { opcode: u8, noack: bool, len: u32 },
}

impl FrameError {
    pub fn opcode(&self) -> u8 {
        match self {
            FrameError::BadMagic { opcode, .. } | FrameError::TooLarge { opcode, .. } => *opcode,
        }
    }

    /// Whether the offending request asked for no reply.
    pub fn noack(&self) -> bool {
        match self {
            FrameError::BadMagic { noack, .. } | FrameError::TooLarge { noack, .. } => *noack,
        }
    }
}

/// Snapshot save/load failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot does not start with the expected magic")]
    BadMagic,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown snapshot record type {0:#04x}")]
    UnknownRecord(u8),
    #[error("snapshot is truncated")]
    Truncated,
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
    #[error("a background save is already running")]
    Busy,
    #[error("background save worker panicked")]
    WorkerPanicked,
    #[error("background saves need a running tokio runtime")]
    NoRuntime,
}
