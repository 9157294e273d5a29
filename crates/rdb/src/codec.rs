//! Length and string encoders.
//!
//! Pure functions that append encoded bytes to a caller-owned buffer. The
//! encoder writes the buffer to its sink in one call, the same way the WAL
//! frames a record before writing it.

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use crate::format::{
    ENC_INT16, ENC_INT32, ENC_INT8, ENC_LZF, LEN_14BIT_MASK, LEN_32BIT, LEN_64BIT, MAX_14BIT,
    MAX_6BIT, MIN_COMPRESS_LEN,
};

/// Appends the length-encoded form of `n`, choosing the smallest class that
/// fits.
pub fn put_length(buf: &mut Vec<u8>, n: u64) {
    if n <= MAX_6BIT {
        buf.push(n as u8);
    } else if n <= MAX_14BIT {
        buf.push(((n >> 8) as u8) | LEN_14BIT_MASK);
        buf.push(n as u8);
    } else if n <= u64::from(u32::MAX) {
        buf.push(LEN_32BIT);
        // Writing into a Vec cannot fail.
        let _ = buf.write_u32::<BigEndian>(n as u32);
    } else {
        buf.push(LEN_64BIT);
        let _ = buf.write_u64::<BigEndian>(n);
    }
}

/// Appends `s` using the most compact string encoding available:
/// special integer, then LZF (when `compress` is set), then raw.
pub fn put_string(buf: &mut Vec<u8>, s: &[u8], compress: bool) {
    if put_int_string(buf, s) {
        return;
    }
    if compress && s.len() > MIN_COMPRESS_LEN && put_lzf_string(buf, s) {
        return;
    }
    put_raw_string(buf, s);
}

/// Appends `s` as `length + bytes` without trying any special encoding.
pub fn put_raw_string(buf: &mut Vec<u8>, s: &[u8]) {
    put_length(buf, s.len() as u64);
    buf.extend_from_slice(s);
}

/// Parses `s` as an integer only if it is the canonical decimal rendering of
/// that integer, so that loading the encoded form gives back the same bytes.
pub fn parse_canonical_int(s: &[u8]) -> Option<i64> {
    if s.is_empty() || s.len() > 20 {
        return None;
    }
    let text = std::str::from_utf8(s).ok()?;
    let value: i64 = text.parse().ok()?;
    if value.to_string().as_bytes() != s {
        return None;
    }
    Some(value)
}

/// Tries the special integer encodings. Returns `false` when `s` is not an
/// integer or only fits in 64 bits.
fn put_int_string(buf: &mut Vec<u8>, s: &[u8]) -> bool {
    let Some(value) = parse_canonical_int(s) else {
        return false;
    };
    if let Ok(v) = i8::try_from(value) {
        buf.push(ENC_INT8);
        buf.push(v as u8);
    } else if let Ok(v) = i16::try_from(value) {
        buf.push(ENC_INT16);
        let _ = buf.write_i16::<LittleEndian>(v);
    } else if let Ok(v) = i32::try_from(value) {
        buf.push(ENC_INT32);
        let _ = buf.write_i32::<LittleEndian>(v);
    } else {
        return false;
    }
    true
}

/// Tries LZF. Returns `false` when the compressor cannot shrink the input.
fn put_lzf_string(buf: &mut Vec<u8>, s: &[u8]) -> bool {
    let compressed = match lzf::compress(s) {
        Ok(out) if out.len() < s.len() => out,
        _ => return false,
    };
    buf.push(ENC_LZF);
    put_length(buf, compressed.len() as u64);
    put_length(buf, s.len() as u64);
    buf.extend_from_slice(&compressed);
    true
}
