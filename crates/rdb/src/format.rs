//! RDB binary format constants: header, opcodes, length classes and the
//! special string encodings.
//!
//! ## Length classes
//!
//! The top two bits of the first byte select the class:
//!
//! ```text
//! 00xxxxxx                      6-bit length
//! 01xxxxxx xxxxxxxx             14-bit length (big-endian within 14 bits)
//! 10000000 [u32 BE]             32-bit length
//! 10000001 [u64 BE]             64-bit length
//! 11xxxxxx                      special string encoding (see ENC_*)
//! ```

use crc::{Crc, CRC_64_GO_ISO};

/// Magic prefix every snapshot starts with.
pub const RDB_MAGIC: &[u8; 5] = b"REDIS";

/// Format version written after the magic, as 4 ASCII digits.
pub const RDB_VERSION: u16 = 3;

/// Full header written by [`RdbEncoder::write_header`](crate::RdbEncoder::write_header).
pub const RDB_HEADER: &[u8; 9] = b"REDIS0003";

/// LRU idle time.
pub const OP_IDLE: u8 = 0xF8;
/// LFU frequency.
pub const OP_FREQ: u8 = 0xF9;
/// Auxiliary field (key/value string pair).
pub const OP_AUX: u8 = 0xFA;
/// Hash table resize hint (key count + expiring key count).
pub const OP_RESIZE_DB: u8 = 0xFB;
/// Expire time in milliseconds (u64 LE), precedes a key.
pub const OP_EXPIRE_TIME_MS: u8 = 0xFC;
/// Expire time in seconds (u32 LE), precedes a key.
pub const OP_EXPIRE_TIME: u8 = 0xFD;
/// Selects the database for the following keys.
pub const OP_SELECT_DB: u8 = 0xFE;
/// End of the snapshot body; the checksum trailer follows.
pub const OP_EOF: u8 = 0xFF;

/// Class marker for a 32-bit length.
pub const LEN_32BIT: u8 = 0x80;
/// Class marker for a 64-bit length.
pub const LEN_64BIT: u8 = 0x81;
/// Prefix OR-ed into the first byte of a 14-bit length.
pub const LEN_14BIT_MASK: u8 = 0x40;

/// Largest value encodable in the 6-bit class.
pub const MAX_6BIT: u64 = (1 << 6) - 1;
/// Largest value encodable in the 14-bit class.
pub const MAX_14BIT: u64 = (1 << 14) - 1;

/// Special string encoding: 8-bit signed integer.
pub const ENC_INT8: u8 = 0xC0;
/// Special string encoding: 16-bit signed integer (LE).
pub const ENC_INT16: u8 = 0xC1;
/// Special string encoding: 32-bit signed integer (LE).
pub const ENC_INT32: u8 = 0xC2;
/// Special string encoding: LZF-compressed string.
pub const ENC_LZF: u8 = 0xC3;

/// Strings of this length or shorter are never worth compressing.
pub const MIN_COMPRESS_LEN: usize = 20;

/// Size of the checksum trailer in bytes.
pub const CHECKSUM_BYTES: usize = 8;

/// Byte written after the checksum trailer.
pub const TRAILING_NEWLINE: u8 = b'\n';

/// CRC-64 with the ISO polynomial, reflected, all-ones init and xor-out.
pub static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_GO_ISO);

/// Value type tags as they appear before a key.
pub mod types {
    pub const STRING: u8 = 0;
    pub const LIST: u8 = 1;
    pub const SET: u8 = 2;
    pub const ZSET: u8 = 3;
    pub const HASH: u8 = 4;
    pub const ZSET_2: u8 = 5;
    pub const HASH_ZIPMAP: u8 = 9;
    pub const LIST_ZIPLIST: u8 = 10;
    pub const SET_INTSET: u8 = 11;
    pub const ZSET_ZIPLIST: u8 = 12;
    pub const HASH_ZIPLIST: u8 = 13;
    pub const LIST_QUICKLIST: u8 = 14;

    /// Human-readable name for a type tag, `None` if unknown.
    pub fn name(tag: u8) -> Option<&'static str> {
        Some(match tag {
            STRING => "string",
            LIST | LIST_ZIPLIST | LIST_QUICKLIST => "list",
            SET | SET_INTSET => "set",
            ZSET | ZSET_2 | ZSET_ZIPLIST => "zset",
            HASH | HASH_ZIPMAP | HASH_ZIPLIST => "hash",
            _ => return None,
        })
    }
}

/// Computes the snapshot checksum of `data` in one shot.
#[must_use]
pub fn checksum(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}
