use crate::*;
use rdb::{RdbReader, Value};
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn encode_command(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// `type | value | version 9 (LE) | 8 checksum bytes`
fn dump(type_tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![type_tag];
    out.extend_from_slice(value);
    out.extend_from_slice(&[0x09, 0x00]);
    out.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04]);
    out
}

fn options(dir: &Path) -> Arc<SessionOptions> {
    Arc::new(SessionOptions::new(dir).with_identity("test"))
}

/// Runs a whole session over `input`, returning the summary and everything
/// the session replied.
fn run_session(opts: Arc<SessionOptions>, input: Vec<u8>) -> (SessionSummary, Vec<u8>) {
    let mut replies = Vec::new();
    let session = Session::new(opts, None, &mut replies);
    let summary = session.run(&mut Cursor::new(input));
    (summary, replies)
}

fn assert_terminated(path: &Path) {
    let bytes = std::fs::read(path).unwrap();
    let n = bytes.len();
    assert!(n >= 10);
    assert_eq!(bytes[n - 1], b'\n');
    assert_eq!(bytes[n - 10], 0xFF);
    let mut trailer = [0u8; 8];
    trailer.copy_from_slice(&bytes[n - 9..n - 1]);
    assert_eq!(u64::from_be_bytes(trailer), rdb::checksum(&bytes[..n - 9]));
}

/// A peer whose socket is gone.
struct HungUpPeer;

impl Write for HungUpPeer {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// -------------------- End to end --------------------

#[test]
fn select_then_restore_produces_loadable_snapshot() {
    let dir = tempdir().unwrap();
    let mut input = encode_command(&[b"SELECT", b"0"]);
    input.extend(encode_command(&[b"RESTORE", b"k1", b"0", &dump(0, b"\x03foo")]));

    let (summary, replies) = run_session(options(dir.path()), input);
    assert_eq!(replies, b"+OK\r\n+OK\r\n");
    assert_eq!(summary.commands, 2);
    assert_eq!(summary.keys, 1);
    assert!(summary.finalized);
    assert_eq!(summary.error, None);

    let path = summary.path.unwrap();
    assert!(path.starts_with(dir.path().join("test")));
    assert_terminated(&path);

    let file = RdbReader::open(&path).unwrap();
    assert_eq!(file.aux_value(b"redis-ver"), Some(&b"4.0.6"[..]));
    assert_eq!(file.aux_value(b"redis-bits"), Some(&b"64"[..]));
    assert_eq!(file.aux_value(b"aof-preamble"), Some(&b"0"[..]));
    assert_eq!(file.databases.len(), 1);

    let db = file.database(0).unwrap();
    assert_eq!(db.entries.len(), 1);
    assert_eq!(db.entries[0].key, b"k1");
    assert_eq!(db.entries[0].type_name(), "string");
    assert_eq!(db.entries[0].value, Value::String(b"foo".to_vec()));
}

#[test]
fn select_of_other_database_still_writes_db_zero() {
    let dir = tempdir().unwrap();
    let mut input = encode_command(&[b"SELECT", b"5"]);
    input.extend(encode_command(&[b"RESTORE", b"a", b"0", &dump(0, b"\x01x")]));
    input.extend(encode_command(&[b"SELECT", b"7"]));
    input.extend(encode_command(&[b"RESTORE", b"b", b"0", &dump(1, b"\x01\x01y")]));

    let (summary, replies) = run_session(options(dir.path()), input);
    assert_eq!(replies, b"+OK\r\n+OK\r\n+OK\r\n+OK\r\n");

    let file = RdbReader::open(summary.path.unwrap()).unwrap();
    assert_eq!(file.databases.len(), 1);
    let db = file.database(0).unwrap();
    assert_eq!(db.entries[0].key, b"a");
    assert_eq!(db.entries[1].value, Value::List(vec![b"y".to_vec()]));
}

#[test]
fn restore_variants_are_case_insensitive() {
    let dir = tempdir().unwrap();
    let mut input = encode_command(&[b"restore", b"k1", b"0", &dump(0, b"\x01a")]);
    input.extend(encode_command(&[b"RESTORE-ASKING", b"k2", b"0", &dump(0, b"\x01b")]));
    input.extend(encode_command(&[b"RESTORE", b"k3", b"0", &dump(0, b"\x01c"), b"REPLACE"]));

    let (summary, replies) = run_session(options(dir.path()), input);
    assert_eq!(replies, b"+OK\r\n+OK\r\n+OK\r\n");
    assert_eq!(summary.keys, 3);
    assert_eq!(RdbReader::open(summary.path.unwrap()).unwrap().key_count(), 3);
}

#[test]
fn large_values_and_numeric_keys_survive() {
    let dir = tempdir().unwrap();
    let big = vec![b'x'; 300];
    let mut value = vec![0x41, 0x2C]; // 14-bit length 300
    value.extend_from_slice(&big);

    let input = encode_command(&[b"RESTORE", b"12345", b"0", &dump(0, &value)]);
    let (summary, _) = run_session(options(dir.path()), input);

    let file = RdbReader::open(summary.path.unwrap()).unwrap();
    let entry = &file.database(0).unwrap().entries[0];
    assert_eq!(entry.key, b"12345");
    assert_eq!(entry.value, Value::String(big));
}

// -------------------- Rejections --------------------

#[test]
fn unknown_command_keeps_connection_open() {
    let dir = tempdir().unwrap();
    let mut input = encode_command(&[b"PING"]);
    input.extend(encode_command(&[b"SELECT", b"0"]));

    let (summary, replies) = run_session(options(dir.path()), input);
    assert_eq!(replies, b"-ERR unknown command 'PING'\r\n+OK\r\n");
    assert_eq!(summary.commands, 2);
    assert_eq!(summary.keys, 0);
}

#[test]
fn short_restore_gets_arity_error() {
    let dir = tempdir().unwrap();
    let mut input = encode_command(&[b"RESTORE", b"k1", b"0"]);
    input.extend(encode_command(&[b"RESTORE", b"k1", b"0", &dump(0, b"\x01a")]));

    let (summary, replies) = run_session(options(dir.path()), input);
    assert_eq!(
        replies,
        b"-ERR wrong number of arguments for 'restore' command\r\n+OK\r\n".to_vec()
    );
    assert_eq!(summary.keys, 1);
}

#[test]
fn empty_payload_gets_dump_error() {
    let dir = tempdir().unwrap();
    let input = encode_command(&[b"RESTORE", b"k1", b"0", b""]);

    let (summary, replies) = run_session(options(dir.path()), input);
    assert_eq!(replies, b"-ERR DUMP payload version or checksum are wrong\r\n".to_vec());
    assert_eq!(summary.keys, 0);
    // The snapshot is still valid, just empty.
    assert_eq!(RdbReader::open(summary.path.unwrap()).unwrap().key_count(), 0);
}

#[test]
fn marker_scan_strategy_is_honoured() {
    let dir = tempdir().unwrap();
    let opts = Arc::new(
        SessionOptions::new(dir.path())
            .with_identity("scan")
            .with_unwrap(UnwrapStrategy::MarkerScan),
    );
    let input = encode_command(&[b"RESTORE", b"k1", b"0", &dump(0, b"\x03foo")]);

    let (summary, replies) = run_session(opts, input);
    assert_eq!(replies, b"+OK\r\n");
    let file = RdbReader::open(summary.path.unwrap()).unwrap();
    assert_eq!(
        file.database(0).unwrap().entries[0].value,
        Value::String(b"foo".to_vec())
    );
}

// -------------------- Termination --------------------

#[test]
fn no_commands_means_no_file() {
    let dir = tempdir().unwrap();
    let (summary, replies) = run_session(options(dir.path()), Vec::new());
    assert!(replies.is_empty());
    assert_eq!(summary.path, None);
    assert!(!summary.finalized);
    assert!(!dir.path().join("test").exists());
}

#[test]
fn every_orderly_disconnect_leaves_a_terminated_file() {
    for n in 1..4 {
        let dir = tempdir().unwrap();
        let mut input = Vec::new();
        for i in 0..n {
            let key = format!("key{i}");
            input.extend(encode_command(&[b"RESTORE", key.as_bytes(), b"0", &dump(0, b"\x01v")]));
        }
        let (summary, _) = run_session(options(dir.path()), input);
        let path = summary.path.unwrap();
        assert_terminated(&path);
        assert_eq!(RdbReader::open(&path).unwrap().key_count(), n);
    }
}

#[test]
fn protocol_error_mid_request_still_finalizes() {
    let dir = tempdir().unwrap();
    let mut input = encode_command(&[b"RESTORE", b"k1", b"0", &dump(0, b"\x01a")]);
    input.extend_from_slice(b"*4\r\n$7\r\nRESTORE\r\n$2\r\nk2"); // cut off

    let (summary, replies) = run_session(options(dir.path()), input);
    assert_eq!(replies, b"+OK\r\n");
    assert!(summary.finalized);
    assert!(summary.error.unwrap().contains("protocol"));
    assert_eq!(RdbReader::open(summary.path.unwrap()).unwrap().key_count(), 1);
}

#[test]
fn peer_write_failure_ends_session() {
    let dir = tempdir().unwrap();
    let mut input = encode_command(&[b"RESTORE", b"k1", b"0", &dump(0, b"\x01a")]);
    input.extend(encode_command(&[b"RESTORE", b"k2", b"0", &dump(0, b"\x01b")]));

    let session = Session::new(options(dir.path()), None, HungUpPeer);
    let summary = session.run(&mut Cursor::new(input));

    // The first key was written before the acknowledgement failed; the
    // second command was never read.
    assert_eq!(summary.commands, 1);
    assert_eq!(summary.keys, 1);
    assert!(summary.finalized);
    assert!(summary.error.is_some());
    assert_eq!(RdbReader::open(summary.path.unwrap()).unwrap().key_count(), 1);
}

#[test]
fn unwritable_data_dir_ends_session_without_reply() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();

    let (summary, replies) = run_session(options(&blocker), encode_command(&[b"SELECT", b"0"]));
    assert!(replies.is_empty());
    assert_eq!(summary.path, None);
    assert!(summary.error.unwrap().contains("failed to create snapshot"));
}

#[test]
fn dropping_a_session_finalizes_it() {
    let dir = tempdir().unwrap();
    let mut replies = Vec::new();
    let path = {
        let mut session = Session::new(options(dir.path()), None, &mut replies);
        session
            .handle(&[b"RESTORE".to_vec(), b"k".to_vec(), b"0".to_vec(), dump(0, b"\x01v")])
            .unwrap();
        session.path().cloned().unwrap()
    };
    assert_terminated(&path);
}

#[test]
fn close_finalizes_and_reports_counts() {
    let dir = tempdir().unwrap();
    let mut replies = Vec::new();
    let mut session = Session::new(options(dir.path()), None, &mut replies);
    session.handle(&[b"SELECT".to_vec(), b"0".to_vec()]).unwrap();
    assert!(!session.is_closed());

    let summary = session.close();
    assert!(summary.finalized);
    assert_eq!(summary.commands, 1);
}

#[test]
fn identity_defaults_to_peer_ip() {
    let dir = tempdir().unwrap();
    let opts = Arc::new(SessionOptions::new(dir.path()));
    let peer = "192.168.7.9:41000".parse().unwrap();

    let mut replies = Vec::new();
    let session = Session::new(opts, Some(peer), &mut replies);
    assert_eq!(session.identity(), "192.168.7.9");
    let summary = session.run(&mut Cursor::new(encode_command(&[b"SELECT", b"0"])));
    assert!(summary.path.unwrap().starts_with(dir.path().join("192.168.7.9")));
}
