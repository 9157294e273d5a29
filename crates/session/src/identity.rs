/// Session identity resolution and snapshot file placement.
///
/// Every session writes into `<data_dir>/<identity>/<timestamp>.rdb`. The
/// identity is either an explicit override or the peer's IP address, and is
/// always reduced to a single safe path component.
use chrono::{DateTime, Local};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// File extension of snapshot files.
pub const SNAPSHOT_EXTENSION: &str = "rdb";

/// Timestamp format used for snapshot file names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// How many `-N` suffixes are tried before giving up on a timestamp.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Resolves the identity for a session. The override wins; otherwise the
/// host part of the peer address is used.
pub fn resolve_identity(override_name: Option<&str>, peer: Option<SocketAddr>) -> String {
    let raw = match (override_name, peer) {
        (Some(name), _) => name.to_string(),
        (None, Some(addr)) => addr.ip().to_string(),
        (None, None) => "unknown".to_string(),
    };
    sanitize_component(&raw)
}

/// Maps `raw` onto `[A-Za-z0-9._-]`, replacing anything else with `_`, so the
/// result is always exactly one path component.
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Creates the identity directory (if needed) and a fresh snapshot file in
/// it, named after `now`.
///
/// The file is opened with create-new semantics. If another session of the
/// same identity already took the name in the same second, `-1`, `-2`, ...
/// is appended instead of truncating the sibling's file.
pub fn create_snapshot_file(
    data_dir: &Path,
    identity: &str,
    now: DateTime<Local>,
) -> io::Result<(PathBuf, File)> {
    let dir = data_dir.join(identity);
    // Succeeds when the directory already exists, even if another session
    // is creating it concurrently.
    fs::create_dir_all(&dir)?;

    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stamp}.{SNAPSHOT_EXTENSION}")
        } else {
            format!("{stamp}-{attempt}.{SNAPSHOT_EXTENSION}")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free snapshot name for {stamp} in {}", dir.display()),
    ))
}
