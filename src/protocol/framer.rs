use bytes::{Buf, Bytes, BytesMut};

use super::{HEADER_LEN, Header, REQUEST_MAGIC};
use crate::utils::error::FrameError;

/// One complete request pulled off the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub noack: bool,
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AccumulatingBody {
        opcode: u8,
        noack: bool,
        len: usize,
    },
}

/// Splits a connection's inbound bytes into request frames.
///
/// Bytes are appended to [`RequestFramer::buffer_mut`] by the reader and
/// drained by repeated calls to [`RequestFramer::next_frame`]. Several
/// requests delivered by one read are returned one at a time; a request
/// split across reads is accumulated until its body is complete.
#[derive(Debug)]
pub struct RequestFramer {
    buffer: BytesMut,
    body: BytesMut,
    state: State,
    max_body: usize,
}

impl RequestFramer {
    pub fn new(max_body: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            body: BytesMut::new(),
            state: State::AwaitingHeader,
            max_body,
        }
    }

    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingHeader && self.buffer.is_empty()
    }

    /// Drop every buffered byte and go back to waiting for a header.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.body.clear();
        self.state = State::AwaitingHeader;
    }

    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        match self.state {
            State::AwaitingHeader => {
                let Some(header) = Header::decode(&self.buffer) else {
                    return Ok(None);
                };

                if header.magic != REQUEST_MAGIC {
                    self.reset();
                    return Err(FrameError::BadMagic {
                        opcode: header.opcode,
                        noack: header.flag != 0,
                        magic: header.magic,
                    });
                }

                let len = header.body_len as usize;
                if len > self.max_body {
                    self.reset();
                    return Err(FrameError::TooLarge {
                        opcode: header.opcode,
                        noack: header.flag != 0,
                        len: header.body_len,
                    });
                }

                self.buffer.advance(HEADER_LEN);
                let noack = header.flag != 0;

                if self.buffer.len() >= len {
                    return Ok(Some(Frame {
                        opcode: header.opcode,
                        noack,
                        body: self.buffer.split_to(len).freeze(),
                    }));
                }

                self.body.clear();
                self.body.reserve(len.min(64 * 1024));
                self.body.extend_from_slice(&self.buffer.split());
                self.state = State::AccumulatingBody {
                    opcode: header.opcode,
                    noack,
                    len,
                };
                Ok(None)
            }
            State::AccumulatingBody { opcode, noack, len } => {
                let needed = len - self.body.len();
                let take = needed.min(self.buffer.len());
                if take > 0 {
                    self.body.extend_from_slice(&self.buffer.split_to(take));
                }

                if self.body.len() < len {
                    return Ok(None);
                }

                self.state = State::AwaitingHeader;
                Ok(Some(Frame {
                    opcode,
                    noack,
                    body: self.body.split().freeze(),
                }))
            }
        }
    }
}
