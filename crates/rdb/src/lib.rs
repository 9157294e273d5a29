//! # RDB - Snapshot encoder
//!
//! Writes standalone snapshot files in the persistence format of a
//! Redis-compatible store, byte for byte, so that keys captured from
//! migration traffic can be loaded back by the store or by any RDB tool.
//!
//! Only the opcodes needed for a loadable single-database snapshot are
//! produced. Values arrive already serialized (from a `DUMP` payload) and are
//! copied verbatim; only keys and aux fields go through the string encoder.
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ "REDIS" + 4 ASCII digits ("0003")                              │
//! ├───────────────────────────────────────────────────────────────┤
//! │ 0xFA <aux-key string> <aux-value string>      (repeated)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ 0xFE <db-index length>                                         │
//! │ 0xFB <key-count length> <ttl-count length>                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ <type u8> <key string> <value bytes>          (repeated)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ 0xFF                                                           │
//! │ crc64 (u64 BE)  - covers every byte above, 0xFF included       │
//! │ 0x0A                                                           │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Lengths and strings use the encodings described in [`codec`].
//!
//! ## Example
//!
//! ```rust
//! use rdb::{RdbEncoder, RdbReader};
//!
//! let mut enc = RdbEncoder::new(Vec::new());
//! enc.write_header().unwrap();
//! enc.write_aux(b"redis-ver", b"4.0.6").unwrap();
//! enc.write_database_frame(0, 0, 0).unwrap();
//! enc.write_raw_key_value(0, b"k1", b"\x03foo").unwrap();
//! let bytes = enc.finalize().unwrap();
//!
//! let file = RdbReader::parse(&bytes).unwrap();
//! assert_eq!(file.key_count(), 1);
//! ```

pub mod codec;
mod encoder;
pub mod format;
mod reader;

pub use encoder::RdbEncoder;
pub use format::{checksum, RDB_HEADER, RDB_VERSION};
pub use reader::{decode_length, decode_string, Database, Entry, Length, RdbFile, RdbReader, Value};

use std::io;
use thiserror::Error;

/// Errors produced while writing or reading a snapshot.
#[derive(Debug, Error)]
pub enum RdbError {
    /// An underlying I/O error from the sink or source.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The database index was already framed in this file.
    #[error("database {0} already framed in this snapshot")]
    DuplicateDatabase(u64),

    /// The snapshot was finalized; no further writes are accepted.
    #[error("snapshot already finalized")]
    Finalized,

    /// The data is not a well-formed snapshot.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// The stored checksum trailer does not match the body.
    #[error("checksum mismatch: stored {expected:#018x}, computed {actual:#018x}")]
    ChecksumMismatch { expected: u64, actual: u64 },

    /// A value type tag the reader does not understand.
    #[error("unsupported value type {0}")]
    UnsupportedType(u8),
}
