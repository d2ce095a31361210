use std::collections::VecDeque;
use std::io;

use crate::broker::Object;

/// Packets waiting to be written to one socket.
///
/// `offset` is how much of the front object has already been written, so
/// a write that the socket only partly accepts resumes where it stopped.
#[derive(Debug, Default)]
pub struct Outbound {
    queue: VecDeque<Object>,
    offset: usize,
}

impl Outbound {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: Object) {
        self.queue.push_back(object);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Bytes still to be written.
    pub fn pending_bytes(&self) -> usize {
        self.queue.iter().map(Object::len).sum::<usize>() - self.offset
    }

    /// Writes queued objects through `write` until the queue is empty or
    /// the writer would block. Completed objects are released as soon as
    /// their last byte is accepted.
    pub fn write_to(&mut self, mut write: impl FnMut(&[u8]) -> io::Result<usize>) -> io::Result<()> {
        while let Some(front) = self.queue.front() {
            let remaining = &front[self.offset..];
            if remaining.is_empty() {
                self.queue.pop_front();
                self.offset = 0;
                continue;
            }

            match write(remaining) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) if n == remaining.len() => {
                    self.queue.pop_front();
                    self.offset = 0;
                }
                Ok(n) => self.offset += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
