use bytes::{BufMut, Bytes, BytesMut};

use crate::utils::error::BrokerError;
use crate::utils::validate::{self, Charset};

/// Cursor over a request body with typed, fixed-layout readers.
///
/// Running out of bytes yields [`BrokerError::BadPacket`]; a field that is
/// present but fails its character rules yields [`BrokerError::BadValue`].
#[derive(Debug)]
pub struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BrokerError> {
        if self.buf.len() < n {
            return Err(BrokerError::BadPacket);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn u8(&mut self) -> Result<u8, BrokerError> {
        Ok(self.take(1)?[0])
    }

    pub fn u32(&mut self) -> Result<u32, BrokerError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, BrokerError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    fn field(&mut self, width: usize, charset: Charset) -> Result<&'a str, BrokerError> {
        let raw = self.take(width)?;
        validate::check(raw, charset).ok_or(BrokerError::BadValue)
    }

    /// Queue, route or channel name.
    pub fn name(&mut self) -> Result<&'a str, BrokerError> {
        self.field(validate::NAME_FIELD, Charset::Name)
    }

    pub fn user_name(&mut self) -> Result<&'a str, BrokerError> {
        self.field(validate::USER_FIELD, Charset::Name)
    }

    pub fn password(&mut self) -> Result<&'a str, BrokerError> {
        self.field(validate::USER_FIELD, Charset::Plain)
    }

    /// Topic or routing key.
    pub fn topic(&mut self) -> Result<&'a str, BrokerError> {
        self.field(validate::TOPIC_FIELD, Charset::Plain)
    }

    pub fn pattern(&mut self) -> Result<&'a str, BrokerError> {
        self.field(validate::TOPIC_FIELD, Charset::Pattern)
    }

    /// Everything left, which must not be empty.
    pub fn payload(&mut self) -> Result<&'a [u8], BrokerError> {
        if self.buf.is_empty() {
            return Err(BrokerError::BadPacket);
        }
        let rest = self.buf;
        self.buf = &[];
        Ok(rest)
    }

    /// Fails when unread bytes remain.
    pub fn finish(self) -> Result<(), BrokerError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(BrokerError::BadPacket)
        }
    }
}

/// Builder for response and event bodies.
#[derive(Debug, Default)]
pub struct BodyWriter {
    buf: BytesMut,
}

impl BodyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.put_u32_le(value);
        self
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        self.buf.put_u64_le(value);
        self
    }

    /// Zero-padded fixed-width string; over-long values are truncated so the
    /// terminator always fits.
    pub fn fixed(&mut self, value: &str, width: usize) -> &mut Self {
        let bytes = value.as_bytes();
        let len = bytes.len().min(width.saturating_sub(1));
        self.buf.put_slice(&bytes[..len]);
        self.buf.put_bytes(0, width - len);
        self
    }

    pub fn name(&mut self, value: &str) -> &mut Self {
        self.fixed(value, validate::NAME_FIELD)
    }

    pub fn topic(&mut self, value: &str) -> &mut Self {
        self.fixed(value, validate::TOPIC_FIELD)
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
