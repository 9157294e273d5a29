/// `RESTORE` argument extraction and dump payload unwrapping.
///
/// A `RESTORE key ttl serialized-value [...]` carries the value in the
/// store's `DUMP` format:
///
/// ```text
/// [type u8][value bytes ...][version u16 LE][checksum u64 LE]
/// ```
///
/// A standalone snapshot wants `type` in front of the key and the value
/// bytes after it; the version and checksum only make sense inside the dump
/// wrapper and are stripped.
use config::UnwrapStrategy;
use thiserror::Error;

/// Size of the dump suffix: 2-byte version + 8-byte checksum.
pub const DUMP_TRAILER_LEN: usize = 2 + 8;

/// Byte pair the legacy scan treats as the start of the dump suffix.
pub const LEGACY_VERSION_MARKER: [u8; 2] = [0x09, 0x00];

/// Minimum argument count of a `RESTORE` (name, key, ttl, value).
pub const RESTORE_MIN_ARGS: usize = 4;

/// Reasons a `RESTORE` is refused. The `Display` text is the error reply sent
/// to the peer.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    #[error("ERR wrong number of arguments for 'restore' command")]
    Arity,
    #[error("ERR DUMP payload version or checksum are wrong")]
    BadPayload,
}

/// A `RESTORE` ready to be written into a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestorePayload<'a> {
    pub type_tag: u8,
    pub key: &'a [u8],
    /// Serialized value with the dump suffix removed.
    pub value: &'a [u8],
}

/// Extracts type tag, key and unwrapped value from `RESTORE` arguments.
///
/// Only the first four positions are consulted; `REPLACE`, `ABSTTL` and
/// friends are ignored.
pub fn parse_restore(
    args: &[Vec<u8>],
    strategy: UnwrapStrategy,
) -> Result<RestorePayload<'_>, PayloadError> {
    if args.len() < RESTORE_MIN_ARGS {
        return Err(PayloadError::Arity);
    }
    let key = args[1].as_slice();
    let (&type_tag, body) = args[3].split_first().ok_or(PayloadError::BadPayload)?;
    let value = unwrap_dump(body, strategy)
        .filter(|v| !v.is_empty())
        .ok_or(PayloadError::BadPayload)?;
    Ok(RestorePayload {
        type_tag,
        key,
        value,
    })
}

/// Strips the dump suffix from `body` (the payload without its type byte).
///
/// - [`UnwrapStrategy::Trailer`]: drops the last [`DUMP_TRAILER_LEN`] bytes.
///   Returns `None` if nothing would be left.
/// - [`UnwrapStrategy::MarkerScan`]: cuts at the first
///   [`LEGACY_VERSION_MARKER`]; keeps everything if there is none. A value
///   that itself contains the marker is cut short.
pub fn unwrap_dump(body: &[u8], strategy: UnwrapStrategy) -> Option<&[u8]> {
    match strategy {
        UnwrapStrategy::Trailer => {
            if body.len() <= DUMP_TRAILER_LEN {
                return None;
            }
            Some(&body[..body.len() - DUMP_TRAILER_LEN])
        }
        UnwrapStrategy::MarkerScan => {
            let end = body
                .windows(LEGACY_VERSION_MARKER.len())
                .position(|w| w == LEGACY_VERSION_MARKER)
                .unwrap_or(body.len());
            Some(&body[..end])
        }
    }
}

/// Reads the dump format version from the suffix of `body`, if present.
pub fn dump_version(body: &[u8]) -> Option<u16> {
    if body.len() < DUMP_TRAILER_LEN {
        return None;
    }
    let at = body.len() - DUMP_TRAILER_LEN;
    Some(u16::from_le_bytes([body[at], body[at + 1]]))
}
