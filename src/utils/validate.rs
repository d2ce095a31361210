//! Validation of the fixed-width, NUL-terminated string fields carried in
//! request bodies.
//!
//! A field is only accepted when it holds a NUL terminator inside its width
//! and a non-empty prefix before it, so the longest accepted value is one
//! byte shorter than the field.

/// Width of user name and password fields.
pub const USER_FIELD: usize = 32;
/// Width of queue, route and channel name fields.
pub const NAME_FIELD: usize = 64;
/// Width of topic, routing-key and pattern fields.
pub const TOPIC_FIELD: usize = 32;

/// Character rules applied to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// Entity names: start with a letter, `_` or `.`; then alphanumerics or
    /// `_-.`, never two punctuation bytes in a row.
    Name,
    /// Passwords, topics and routing keys: alphanumerics or `_-.`.
    Plain,
    /// Glob patterns: [`Charset::Plain`] plus `*?[]^\`.
    Pattern,
}

fn is_punct(b: u8) -> bool {
    matches!(b, b'_' | b'-' | b'.')
}

fn is_glob(b: u8) -> bool {
    matches!(b, b'*' | b'?' | b'[' | b']' | b'^' | b'\\')
}

impl Charset {
    pub fn accepts(self, value: &[u8]) -> bool {
        let Some(&first) = value.first() else {
            return false;
        };

        match self {
            Charset::Name => {
                if !(first.is_ascii_alphabetic() || first == b'_' || first == b'.') {
                    return false;
                }
                value.windows(2).all(|pair| {
                    let (prev, cur) = (pair[0], pair[1]);
                    (cur.is_ascii_alphanumeric() || is_punct(cur))
                        && !(is_punct(prev) && is_punct(cur))
                })
            }
            Charset::Plain => value
                .iter()
                .all(|&b| b.is_ascii_alphanumeric() || is_punct(b)),
            Charset::Pattern => value
                .iter()
                .all(|&b| b.is_ascii_alphanumeric() || is_punct(b) || is_glob(b)),
        }
    }
}

/// Returns the bytes before the NUL terminator, or `None` when the field
/// starts with NUL or has no terminator at all.
pub fn terminated(field: &[u8]) -> Option<&[u8]> {
    match field.iter().position(|&b| b == 0) {
        Some(0) | None => None,
        Some(end) => Some(&field[..end]),
    }
}

/// Decode and validate a fixed-width field.
pub fn check(field: &[u8], charset: Charset) -> Option<&str> {
    let value = terminated(field)?;
    if !charset.accepts(value) {
        return None;
    }
    // every accepted byte is ASCII
    std::str::from_utf8(value).ok()
}

/// Validate an already-decoded entity name against its field width.
pub fn is_valid_name(name: &str) -> bool {
    name.len() < NAME_FIELD && Charset::Name.accepts(name.as_bytes())
}

/// Validate an already-decoded user name or password.
pub fn is_valid_credential(value: &str, charset: Charset) -> bool {
    value.len() < USER_FIELD && charset.accepts(value.as_bytes())
}

/// Validate an already-decoded topic, key or pattern.
pub fn is_valid_topic(value: &str, charset: Charset) -> bool {
    value.len() < TOPIC_FIELD && charset.accepts(value.as_bytes())
}
