//! Reference reader for the snapshots written by [`RdbEncoder`](crate::RdbEncoder).
//!
//! Parses a complete in-memory image, validating the header, every opcode
//! the encoder can emit, and the checksum trailer. It also understands the
//! per-type value encodings a `DUMP` payload can carry, so the keys captured
//! from a migration can be listed and compared.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::path::Path;

use crate::format::{
    checksum, types, ENC_INT16, ENC_INT32, ENC_INT8, ENC_LZF, LEN_32BIT, LEN_64BIT,
    OP_AUX, OP_EOF, OP_EXPIRE_TIME, OP_EXPIRE_TIME_MS, OP_FREQ, OP_IDLE, OP_RESIZE_DB,
    OP_SELECT_DB, RDB_MAGIC, TRAILING_NEWLINE,
};
use crate::RdbError;

/// Upper bound on a decompressed string, matching the 512 MiB string limit of
/// the store that produces dump payloads.
const MAX_DECOMPRESSED_LEN: u64 = 512 * 1024 * 1024;

/// A decoded length field: either a plain length or a special string
/// encoding selector (class `11`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Len(u64),
    Encoded(u8),
}

/// A decoded value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Vec<u8>),
    List(Vec<Vec<u8>>),
    Set(Vec<Vec<u8>>),
    SortedSet(Vec<(Vec<u8>, f64)>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    /// Opaque single-blob encodings (zipmap, ziplist, intset, ...).
    Encoded(Vec<u8>),
    /// Quicklist nodes, each one a ziplist blob.
    QuickList(Vec<Vec<u8>>),
}

/// One key with its type tag, optional expiry and value.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub type_tag: u8,
    pub key: Vec<u8>,
    pub expire_at_ms: Option<u64>,
    pub value: Value,
}

impl Entry {
    /// Human-readable type name (`"string"`, `"list"`, ...).
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        types::name(self.type_tag).unwrap_or("unknown")
    }
}

/// A database section: the select opcode, its resize hints and the keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Database {
    pub index: u64,
    pub key_count_hint: u64,
    pub ttl_count_hint: u64,
    pub entries: Vec<Entry>,
}

/// A fully parsed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RdbFile {
    pub version: u16,
    /// Aux fields in file order.
    pub aux: Vec<(Vec<u8>, Vec<u8>)>,
    pub databases: Vec<Database>,
    /// The stored trailer (big-endian CRC-64 of everything through EOF).
    pub checksum: u64,
}

impl RdbFile {
    /// Looks up a database section by index.
    #[must_use]
    pub fn database(&self, index: u64) -> Option<&Database> {
        self.databases.iter().find(|db| db.index == index)
    }

    /// Looks up an aux field value by key.
    #[must_use]
    pub fn aux_value(&self, key: &[u8]) -> Option<&[u8]> {
        self.aux
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Total number of keys across all databases.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.databases.iter().map(|db| db.entries.len()).sum()
    }
}

/// Stateless parser entry points.
pub struct RdbReader;

impl RdbReader {
    /// Reads and parses the snapshot at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<RdbFile, RdbError> {
        let data = std::fs::read(path)?;
        Self::parse(&data)
    }

    /// Parses a complete snapshot image.
    ///
    /// # Errors
    ///
    /// - [`RdbError::Corrupt`] for a bad header, truncated data or trailing
    ///   garbage after the trailer.
    /// - [`RdbError::ChecksumMismatch`] if the stored trailer is non-zero and
    ///   does not match the CRC-64 of the body.
    /// - [`RdbError::UnsupportedType`] for a value type tag this reader does
    ///   not know.
    pub fn parse(data: &[u8]) -> Result<RdbFile, RdbError> {
        let mut cur = Cursor::new(data);

        let magic = cur.take(RDB_MAGIC.len())?;
        if magic != RDB_MAGIC {
            return Err(RdbError::Corrupt("bad magic".into()));
        }
        let digits = cur.take(4)?;
        let version = std::str::from_utf8(digits)
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| RdbError::Corrupt("bad version digits".into()))?;

        let mut aux = Vec::new();
        let mut databases: Vec<Database> = Vec::new();
        let mut expire_at_ms = None;

        loop {
            let op = cur.u8()?;
            match op {
                OP_EOF => break,
                OP_AUX => {
                    let key = cur.string()?;
                    let value = cur.string()?;
                    aux.push((key, value));
                }
                OP_SELECT_DB => {
                    let index = cur.plain_length()?;
                    databases.push(Database {
                        index,
                        ..Database::default()
                    });
                }
                OP_RESIZE_DB => {
                    let keys = cur.plain_length()?;
                    let ttls = cur.plain_length()?;
                    let db = current_db(&mut databases);
                    db.key_count_hint = keys;
                    db.ttl_count_hint = ttls;
                }
                OP_EXPIRE_TIME_MS => {
                    expire_at_ms = Some(cur.rest.read_u64::<LittleEndian>().map_err(eof)?);
                }
                OP_EXPIRE_TIME => {
                    let secs = cur.rest.read_u32::<LittleEndian>().map_err(eof)?;
                    expire_at_ms = Some(u64::from(secs) * 1000);
                }
                OP_IDLE => {
                    cur.plain_length()?;
                }
                OP_FREQ => {
                    cur.u8()?;
                }
                type_tag => {
                    let key = cur.string()?;
                    let value = cur.value(type_tag)?;
                    current_db(&mut databases).entries.push(Entry {
                        type_tag,
                        key,
                        expire_at_ms: expire_at_ms.take(),
                        value,
                    });
                }
            }
        }

        let body_len = cur.position();
        let stored = cur
            .rest
            .read_u64::<BigEndian>()
            .map_err(|_| RdbError::Corrupt("missing checksum trailer".into()))?;
        if stored != 0 {
            let computed = checksum(&data[..body_len]);
            if computed != stored {
                return Err(RdbError::ChecksumMismatch {
                    expected: stored,
                    actual: computed,
                });
            }
        }
        match cur.rest {
            [] | [TRAILING_NEWLINE] => {}
            _ => {
                return Err(RdbError::Corrupt(format!(
                    "{} unexpected bytes after checksum",
                    cur.rest.len()
                )))
            }
        }
        Ok(RdbFile {
            version,
            aux,
            databases,
            checksum: stored,
        })
    }
}

/// Decodes a single length field from the start of `data`, returning the
/// value and the number of bytes consumed.
pub fn decode_length(data: &[u8]) -> Result<(Length, usize), RdbError> {
    let mut cur = Cursor::new(data);
    let len = cur.length()?;
    Ok((len, cur.position()))
}

/// Decodes a single string field from the start of `data`, returning the
/// string and the number of bytes consumed.
pub fn decode_string(data: &[u8]) -> Result<(Vec<u8>, usize), RdbError> {
    let mut cur = Cursor::new(data);
    let s = cur.string()?;
    Ok((s, cur.position()))
}

/// Keys that appear before any select opcode belong to database 0.
fn current_db(databases: &mut Vec<Database>) -> &mut Database {
    if databases.is_empty() {
        databases.push(Database::default());
    }
    let last = databases.len() - 1;
    &mut databases[last]
}

fn eof(_: std::io::Error) -> RdbError {
    RdbError::Corrupt("unexpected end of data".into())
}

struct Cursor<'a> {
    total: usize,
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            total: data.len(),
            rest: data,
        }
    }

    fn position(&self) -> usize {
        self.total - self.rest.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], RdbError> {
        if self.rest.len() < n {
            return Err(RdbError::Corrupt("unexpected end of data".into()));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, RdbError> {
        self.rest.read_u8().map_err(eof)
    }

    fn length(&mut self) -> Result<Length, RdbError> {
        let first = self.u8()?;
        Ok(match first >> 6 {
            0 => Length::Len(u64::from(first & 0x3F)),
            1 => {
                let low = self.u8()?;
                Length::Len((u64::from(first & 0x3F) << 8) | u64::from(low))
            }
            3 => Length::Encoded(first & 0x3F),
            _ => match first {
                LEN_32BIT => Length::Len(u64::from(
                    self.rest.read_u32::<BigEndian>().map_err(eof)?,
                )),
                LEN_64BIT => Length::Len(self.rest.read_u64::<BigEndian>().map_err(eof)?),
                other => {
                    return Err(RdbError::Corrupt(format!(
                        "unknown length marker {other:#04x}"
                    )))
                }
            },
        })
    }

    fn plain_length(&mut self) -> Result<u64, RdbError> {
        match self.length()? {
            Length::Len(n) => Ok(n),
            Length::Encoded(e) => Err(RdbError::Corrupt(format!(
                "expected a length, found string encoding {e}"
            ))),
        }
    }

    fn usize_length(&mut self) -> Result<usize, RdbError> {
        let n = self.plain_length()?;
        // A length can never exceed the bytes left to read.
        if n > self.rest.len() as u64 {
            return Err(RdbError::Corrupt(format!(
                "length {n} exceeds remaining {} bytes",
                self.rest.len()
            )));
        }
        Ok(n as usize)
    }

    fn string(&mut self) -> Result<Vec<u8>, RdbError> {
        match self.length()? {
            Length::Len(n) => {
                if n > self.rest.len() as u64 {
                    return Err(RdbError::Corrupt("string runs past end of data".into()));
                }
                Ok(self.take(n as usize)?.to_vec())
            }
            Length::Encoded(enc) => match enc | 0xC0 {
                ENC_INT8 => Ok((self.u8()? as i8).to_string().into_bytes()),
                ENC_INT16 => Ok(self
                    .rest
                    .read_i16::<LittleEndian>()
                    .map_err(eof)?
                    .to_string()
                    .into_bytes()),
                ENC_INT32 => Ok(self
                    .rest
                    .read_i32::<LittleEndian>()
                    .map_err(eof)?
                    .to_string()
                    .into_bytes()),
                ENC_LZF => {
                    let compressed_len = self.usize_length()?;
                    let original_len = self.plain_length()?;
                    if original_len > MAX_DECOMPRESSED_LEN {
                        return Err(RdbError::Corrupt(format!(
                            "lzf original length {original_len} too large"
                        )));
                    }
                    let original_len = original_len as usize;
                    let compressed = self.take(compressed_len)?;
                    let out = lzf::decompress(compressed, original_len).map_err(|e| {
                        RdbError::Corrupt(format!("lzf decompression failed: {e:?}"))
                    })?;
                    if out.len() != original_len {
                        return Err(RdbError::Corrupt("lzf length mismatch".into()));
                    }
                    Ok(out)
                }
                other => Err(RdbError::Corrupt(format!(
                    "unknown string encoding {other:#04x}"
                ))),
            },
        }
    }

    fn double(&mut self) -> Result<f64, RdbError> {
        match self.u8()? {
            253 => Ok(f64::NAN),
            254 => Ok(f64::INFINITY),
            255 => Ok(f64::NEG_INFINITY),
            len => {
                let raw = self.take(len as usize)?;
                std::str::from_utf8(raw)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| RdbError::Corrupt("bad double".into()))
            }
        }
    }

    fn strings(&mut self) -> Result<Vec<Vec<u8>>, RdbError> {
        let n = self.usize_length()?;
        (0..n).map(|_| self.string()).collect()
    }

    fn value(&mut self, type_tag: u8) -> Result<Value, RdbError> {
        Ok(match type_tag {
            types::STRING => Value::String(self.string()?),
            types::LIST => Value::List(self.strings()?),
            types::SET => Value::Set(self.strings()?),
            types::ZSET => {
                let n = self.usize_length()?;
                let mut members = Vec::with_capacity(n);
                for _ in 0..n {
                    let member = self.string()?;
                    members.push((member, self.double()?));
                }
                Value::SortedSet(members)
            }
            types::ZSET_2 => {
                let n = self.usize_length()?;
                let mut members = Vec::with_capacity(n);
                for _ in 0..n {
                    let member = self.string()?;
                    let score = self.rest.read_f64::<LittleEndian>().map_err(eof)?;
                    members.push((member, score));
                }
                Value::SortedSet(members)
            }
            types::HASH => {
                let n = self.usize_length()?;
                let mut fields = Vec::with_capacity(n);
                for _ in 0..n {
                    let field = self.string()?;
                    fields.push((field, self.string()?));
                }
                Value::Hash(fields)
            }
            types::HASH_ZIPMAP
            | types::LIST_ZIPLIST
            | types::SET_INTSET
            | types::ZSET_ZIPLIST
            | types::HASH_ZIPLIST => Value::Encoded(self.string()?),
            types::LIST_QUICKLIST => Value::QuickList(self.strings()?),
            other => return Err(RdbError::UnsupportedType(other)),
        })
    }
}
