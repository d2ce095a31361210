//! Binary wire protocol.
//!
//! Every packet starts with an 8-byte little-endian header:
//!
//! ```text
//! magic: u16 | opcode: u8 | flag: u8 | body_len: u32
//! ```
//!
//! The flag byte is the no-ack marker on requests, the status code on
//! responses and the event kind on server-pushed events. String fields in
//! bodies are fixed-width, NUL-terminated and zero-padded.

pub mod codec;
pub mod command;
pub mod framer;
pub mod response;

pub use codec::{BodyReader, BodyWriter};
pub use command::{Access, Command};
pub use framer::{Frame, RequestFramer};

pub const REQUEST_MAGIC: u16 = 0xEA;
pub const RESPONSE_MAGIC: u16 = 0xEB;
pub const EVENT_MAGIC: u16 = 0xEC;

pub const HEADER_LEN: usize = 8;

/// Upper bound accepted for the request size setting.
pub const MAX_REQUEST_SIZE: usize = i32::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Success = 1,
    Error = 2,
    BadPacket = 3,
    UnknownCommand = 4,
    AccessDenied = 5,
    BadValue = 6,
    NotFound = 7,
    NotDeclared = 8,
    NoData = 9,
    OutOfMemory = 10,
}

impl TryFrom<u8> for Status {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Ok(match value {
            1 => Status::Success,
            2 => Status::Error,
            3 => Status::BadPacket,
            4 => Status::UnknownCommand,
            5 => Status::AccessDenied,
            6 => Status::BadValue,
            7 => Status::NotFound,
            8 => Status::NotDeclared,
            9 => Status::NoData,
            10 => Status::OutOfMemory,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EventKind {
    Notify = 1,
    Message = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u16,
    pub opcode: u8,
    pub flag: u8,
    pub body_len: u32,
}

impl Header {
    pub fn new(magic: u16, opcode: u8, flag: u8, body_len: u32) -> Self {
        Self {
            magic,
            opcode,
            flag,
            body_len,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2] = self.opcode;
        out[3] = self.flag;
        out[4..8].copy_from_slice(&self.body_len.to_le_bytes());
        out
    }

    /// Decodes the first `HEADER_LEN` bytes of `buf`, if present.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let raw: &[u8; HEADER_LEN] = buf.get(..HEADER_LEN)?.try_into().ok()?;
        Some(Self {
            magic: u16::from_le_bytes([raw[0], raw[1]]),
            opcode: raw[2],
            flag: raw[3],
            body_len: u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
        })
    }
}

#[cfg(test)]
mod tests;
