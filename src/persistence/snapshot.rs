//! On-disk snapshot format.
//!
//! ```text
//! magic "TALONMQ" | version u8 | record* | EOF
//! record = type u8 | field*
//! field  = compressed_len u32 | original_len u32 | bytes
//! ```
//!
//! A zero `compressed_len` means the field is stored raw and `bytes` is
//! `original_len` long; otherwise `bytes` is an lz4 block of
//! `compressed_len` bytes. Integers are stored as fields holding their
//! little-endian bytes. A queue record is followed by its message records
//! and a route record by its key records.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::broker::Object;
use crate::utils::error::StorageError;

pub const MAGIC: &[u8; 7] = b"TALONMQ";
pub const VERSION: u8 = 1;

const USER: u8 = 0x01;
const QUEUE: u8 = 0x02;
const MESSAGE: u8 = 0x03;
const ROUTE: u8 = 0x04;
const ROUTE_KEY: u8 = 0x05;
const CHANNEL: u8 = 0x06;
const EOF: u8 = 0xFF;

/// Fields up to this size are never compressed.
const COMPRESS_MIN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub password: String,
    pub perm: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Absolute expiration in ms, 0 for none.
    pub expires_at: u64,
    pub payload: Object,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub name: String,
    pub max_messages: u32,
    pub max_message_size: u32,
    pub flags: u32,
    pub messages: Vec<MessageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRecord {
    pub name: String,
    pub flags: u32,
    /// Routing keys with the names of the queues bound under each.
    pub keys: Vec<(String, Vec<String>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    pub name: String,
    pub flags: u32,
}

/// Immutable copy of the durable broker state. Payloads are shared with
/// the live queues, so taking one is cheap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub users: Vec<UserRecord>,
    pub queues: Vec<QueueRecord>,
    pub routes: Vec<RouteRecord>,
    pub channels: Vec<ChannelRecord>,
}

fn write_field<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    let original = u32::try_from(bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "snapshot field too large"))?;

    if bytes.len() > COMPRESS_MIN {
        let compressed = lz4_flex::compress(bytes);
        if compressed.len() < bytes.len() {
            // shorter than `bytes`, so it fits in u32 as well
            w.write_all(&(compressed.len() as u32).to_le_bytes())?;
            w.write_all(&original.to_le_bytes())?;
            return w.write_all(&compressed);
        }
    }

    w.write_all(&0u32.to_le_bytes())?;
    w.write_all(&original.to_le_bytes())?;
    w.write_all(bytes)
}

fn write_u32<W: Write>(w: &mut W, value: u32) -> io::Result<()> {
    write_field(w, &value.to_le_bytes())
}

fn write_u64<W: Write>(w: &mut W, value: u64) -> io::Result<()> {
    write_field(w, &value.to_le_bytes())
}

fn write_count<W: Write>(w: &mut W, count: usize) -> io::Result<()> {
    let count = u32::try_from(count)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many snapshot entries"))?;
    write_u32(w, count)
}

/// Serializes `snapshot` into `w`.
pub fn encode<W: Write>(w: &mut W, snapshot: &Snapshot) -> io::Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&[VERSION])?;

    for user in &snapshot.users {
        w.write_all(&[USER])?;
        write_field(w, user.name.as_bytes())?;
        write_field(w, user.password.as_bytes())?;
        write_u64(w, user.perm)?;
    }

    for queue in &snapshot.queues {
        w.write_all(&[QUEUE])?;
        write_field(w, queue.name.as_bytes())?;
        write_u32(w, queue.max_messages)?;
        write_u32(w, queue.max_message_size)?;
        write_u32(w, queue.flags)?;
        write_count(w, queue.messages.len())?;
        for message in &queue.messages {
            w.write_all(&[MESSAGE])?;
            write_u64(w, message.expires_at)?;
            write_field(w, &message.payload)?;
        }
    }

    for route in &snapshot.routes {
        w.write_all(&[ROUTE])?;
        write_field(w, route.name.as_bytes())?;
        write_u32(w, route.flags)?;
        write_count(w, route.keys.len())?;
        for (key, queues) in &route.keys {
            w.write_all(&[ROUTE_KEY])?;
            write_field(w, key.as_bytes())?;
            write_count(w, queues.len())?;
            for queue in queues {
                write_field(w, queue.as_bytes())?;
            }
        }
    }

    for channel in &snapshot.channels {
        w.write_all(&[CHANNEL])?;
        write_field(w, channel.name.as_bytes())?;
        write_u32(w, channel.flags)?;
    }

    w.write_all(&[EOF])
}

/// Cursor over a snapshot held in memory.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StorageError> {
        if self.buf.len() < n {
            return Err(StorageError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn byte(&mut self) -> Result<u8, StorageError> {
        Ok(self.take(1)?[0])
    }

    fn raw_u32(&mut self) -> Result<u32, StorageError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn field(&mut self) -> Result<Vec<u8>, StorageError> {
        let compressed = self.raw_u32()? as usize;
        let original = self.raw_u32()? as usize;

        if compressed == 0 {
            return Ok(self.take(original)?.to_vec());
        }

        // lz4 cannot expand a block by more than ~255x
        if original > compressed.saturating_mul(255).saturating_add(COMPRESS_MIN) {
            return Err(StorageError::Corrupt(format!(
                "field claims {original} bytes from {compressed} compressed"
            )));
        }
        let data = self.take(compressed)?;
        let bytes = lz4_flex::decompress(data, original)
            .map_err(|e| StorageError::Corrupt(format!("bad compressed field: {e}")))?;
        if bytes.len() != original {
            return Err(StorageError::Corrupt("decompressed length mismatch".into()));
        }
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32, StorageError> {
        let bytes = self.field()?;
        let raw: [u8; 4] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Corrupt("expected a 4-byte integer".into()))?;
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64, StorageError> {
        let bytes = self.field()?;
        let raw: [u8; 8] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| StorageError::Corrupt("expected an 8-byte integer".into()))?;
        Ok(u64::from_le_bytes(raw))
    }

    fn string(&mut self) -> Result<String, StorageError> {
        String::from_utf8(self.field()?)
            .map_err(|_| StorageError::Corrupt("string field is not UTF-8".into()))
    }

    fn expect(&mut self, record: u8) -> Result<(), StorageError> {
        match self.byte()? {
            found if found == record => Ok(()),
            found => Err(StorageError::Corrupt(format!(
                "expected record {record:#04x}, found {found:#04x}"
            ))),
        }
    }
}

/// Parses a complete snapshot.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, StorageError> {
    let mut r = Reader { buf: bytes };

    if r.take(MAGIC.len()).map_err(|_| StorageError::BadMagic)? != MAGIC {
        return Err(StorageError::BadMagic);
    }
    let version = r.byte()?;
    if version != VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }

    let mut snapshot = Snapshot::default();
    loop {
        match r.byte()? {
            USER => snapshot.users.push(UserRecord {
                name: r.string()?,
                password: r.string()?,
                perm: r.u64()?,
            }),
            QUEUE => {
                let name = r.string()?;
                let max_messages = r.u32()?;
                let max_message_size = r.u32()?;
                let flags = r.u32()?;
                let count = r.u32()?;
                let mut messages = Vec::new();
                for _ in 0..count {
                    r.expect(MESSAGE)?;
                    messages.push(MessageRecord {
                        expires_at: r.u64()?,
                        payload: Object::new(r.field()?),
                    });
                }
                snapshot.queues.push(QueueRecord {
                    name,
                    max_messages,
                    max_message_size,
                    flags,
                    messages,
                });
            }
            ROUTE => {
                let name = r.string()?;
                let flags = r.u32()?;
                let key_count = r.u32()?;
                let mut keys = Vec::new();
                for _ in 0..key_count {
                    r.expect(ROUTE_KEY)?;
                    let key = r.string()?;
                    let queue_count = r.u32()?;
                    let mut queues = Vec::new();
                    for _ in 0..queue_count {
                        queues.push(r.string()?);
                    }
                    keys.push((key, queues));
                }
                snapshot.routes.push(RouteRecord { name, flags, keys });
            }
            CHANNEL => snapshot.channels.push(ChannelRecord {
                name: r.string()?,
                flags: r.u32()?,
            }),
            EOF => break,
            other => return Err(StorageError::UnknownRecord(other)),
        }
    }

    if !r.buf.is_empty() {
        return Err(StorageError::Corrupt("trailing bytes after EOF record".into()));
    }
    Ok(snapshot)
}

fn write_file(path: &Path, snapshot: &Snapshot) -> Result<(), StorageError> {
    let mut writer = BufWriter::new(File::create(path)?);
    encode(&mut writer, snapshot)?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Writes `snapshot` to a pid-suffixed temporary file next to `path`,
/// fsyncs it and renames it over `path`. On failure the temporary file is
/// removed and the previous snapshot is left untouched.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let temp = dir.join(format!("talonmq-{}.tmp", std::process::id()));

    let result = write_file(&temp, snapshot).and_then(|()| {
        fs::rename(&temp, path)?;
        Ok(())
    });

    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot, StorageError> {
    decode(&fs::read(path)?)
}
