use super::object::Object;

/// A payload held by a queue.
///
/// `expires_at` and `confirm_deadline` are absolute millisecond timestamps;
/// zero means "never".
#[derive(Debug, Clone)]
pub struct Message {
    pub tag: u64,
    pub object: Object,
    pub expires_at: u64,
    pub confirm_deadline: u64,
}

impl Message {
    pub fn new(tag: u64, object: Object, expires_at: u64) -> Self {
        Self {
            tag,
            object,
            expires_at,
            confirm_deadline: 0,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at != 0 && self.expires_at <= now_ms
    }

    pub fn confirm_overdue(&self, now_ms: u64) -> bool {
        self.confirm_deadline != 0 && self.confirm_deadline <= now_ms
    }

    pub fn len(&self) -> usize {
        self.object.len()
    }

    pub fn is_empty(&self) -> bool {
        self.object.is_empty()
    }
}

/// Issues strictly increasing message tags.
///
/// The high 32 bits carry the low 32 bits of the millisecond clock and the
/// low 32 bits count tags issued within that millisecond. When the clock
/// wraps or steps back, tags keep counting up from the last one issued.
#[derive(Debug, Default, Clone)]
pub struct TagGenerator {
    last: u64,
}

impl TagGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, now_ms: u64) -> u64 {
        let candidate = (now_ms & 0xFFFF_FFFF) << 32;
        self.last = if candidate > self.last {
            candidate
        } else {
            self.last.wrapping_add(1)
        };
        self.last
    }

    pub fn last(&self) -> u64 {
        self.last
    }
}
