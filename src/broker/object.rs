use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// An immutable, reference-counted byte buffer.
///
/// Cloning an `Object` adds a holder and dropping one removes it; the
/// backing bytes are freed when the last holder goes away. Fan-out hands
/// every recipient a clone instead of copying the bytes, so one published
/// payload can sit in many outbound queues and queue slots at once.
#[derive(Clone, PartialEq, Eq)]
pub struct Object(Arc<[u8]>);

impl Object {
    /// Wraps `bytes` as a new object with a single holder.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::from(bytes))
    }

    /// Copies `bytes` into a new object with a single holder.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }

    /// Number of live holders of the underlying buffer.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for Object {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Object {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Object {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for Object {
    fn from(bytes: &[u8]) -> Self {
        Self::copy_from_slice(bytes)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("len", &self.len())
            .field("holders", &self.holders())
            .finish()
    }
}
