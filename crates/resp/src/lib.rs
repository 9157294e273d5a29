//! # RESP - request reader and reply writers
//!
//! Just enough of the Redis serialization protocol to receive the commands a
//! migrating store pushes at us and to acknowledge them.
//!
//! ## Requests
//!
//! ```text
//! *<argc>\r\n                     multibulk header
//! $<len>\r\n<bytes>\r\n           one bulk string per argument (binary safe)
//!
//! PING foo bar\r\n                inline form, split on ASCII whitespace
//! ```
//!
//! ## Replies
//!
//! ```text
//! +OK\r\n                         positive acknowledgement
//! -ERR <message>\r\n              error
//! ```

use std::io::{self, BufRead, Read, Write};
use thiserror::Error;

/// Largest bulk string accepted (512 MiB, same as the store's own limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Largest number of arguments accepted in one multibulk request.
pub const MAX_ARGS: usize = 1024 * 1024;

/// Longest header or inline line accepted, terminator excluded.
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// Errors returned by [`read_command`].
#[derive(Debug, Error)]
pub enum RespError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The stream ended cleanly between two requests.
    #[error("connection closed")]
    Closed,

    /// Malformed framing, or the stream ended in the middle of a request.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Reads one request and returns its arguments; argument 0 is the command
/// name.
///
/// Blank inline lines and empty multibulk headers (`*0`, `*-1`) are skipped.
///
/// # Errors
///
/// - [`RespError::Closed`] on EOF before the first byte of a request.
/// - [`RespError::Protocol`] on malformed framing or EOF inside a request.
/// - [`RespError::Io`] on any other read failure.
pub fn read_command<R: BufRead>(r: &mut R) -> Result<Vec<Vec<u8>>, RespError> {
    loop {
        let line = match read_line(r)? {
            Some(line) => line,
            None => return Err(RespError::Closed),
        };

        if let Some(count) = line.strip_prefix(b"*") {
            let count = parse_int(count)?;
            if count <= 0 {
                continue;
            }
            if count as u64 > MAX_ARGS as u64 {
                return Err(RespError::Protocol("invalid multibulk length".into()));
            }
            return read_multibulk(r, count as usize);
        }

        let args: Vec<Vec<u8>> = line
            .split(|b| b.is_ascii_whitespace())
            .filter(|part| !part.is_empty())
            .map(<[u8]>::to_vec)
            .collect();
        if !args.is_empty() {
            return Ok(args);
        }
    }
}

/// Writes `+OK\r\n` and flushes.
pub fn write_ok<W: Write>(w: &mut W) -> io::Result<()> {
    w.write_all(b"+OK\r\n")?;
    w.flush()
}

/// Writes `-<message>\r\n` and flushes. Line breaks inside `message` are
/// replaced by spaces so the reply stays a single line.
pub fn write_error<W: Write>(w: &mut W, message: &str) -> io::Result<()> {
    let mut reply = Vec::with_capacity(message.len() + 3);
    reply.push(b'-');
    reply.extend(
        message
            .bytes()
            .map(|b| if b == b'\r' || b == b'\n' { b' ' } else { b }),
    );
    reply.extend_from_slice(b"\r\n");
    w.write_all(&reply)?;
    w.flush()
}

fn read_multibulk<R: BufRead>(r: &mut R, count: usize) -> Result<Vec<Vec<u8>>, RespError> {
    // Do not trust the header for the allocation size.
    let mut args = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let header = read_line(r)?.ok_or_else(truncated)?;
        let len = match header.strip_prefix(b"$") {
            Some(len) => parse_int(len)?,
            None => {
                return Err(RespError::Protocol(format!(
                    "expected '$', got '{}'",
                    header.first().map(|&b| b as char).unwrap_or(' ')
                )))
            }
        };
        if len < 0 || len as u64 > MAX_BULK_LEN as u64 {
            return Err(RespError::Protocol("invalid bulk length".into()));
        }

        let len = len as usize;
        let mut bulk = vec![0u8; len + 2];
        r.read_exact(&mut bulk).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => truncated(),
            _ => RespError::Io(e),
        })?;
        if &bulk[len..] != b"\r\n" {
            return Err(RespError::Protocol("bulk string not terminated by CRLF".into()));
        }
        bulk.truncate(len);
        args.push(bulk);
    }
    Ok(args)
}

/// Reads one line without its terminator. Returns `None` on EOF before any
/// byte was read.
fn read_line<R: BufRead>(r: &mut R) -> Result<Option<Vec<u8>>, RespError> {
    let mut line = Vec::new();
    let limit = (MAX_INLINE_LEN + 2) as u64;
    let n = r.by_ref().take(limit).read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        if line.len() as u64 >= limit {
            return Err(RespError::Protocol("line too long".into()));
        }
        return Err(truncated());
    }
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

fn parse_int(digits: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            RespError::Protocol(format!(
                "invalid length '{}'",
                String::from_utf8_lossy(digits)
            ))
        })
}

fn truncated() -> RespError {
    RespError::Protocol("unexpected end of stream".into())
}
