/// End-to-end tests: a real TCP listener running the accept loop, driven by
/// plain sockets the way a migrating store would.
use rdb::{RdbReader, Value};
use session::SessionOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn start_server(data_dir: &Path, identity: Option<&str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let mut options = SessionOptions::new(data_dir);
    if let Some(identity) = identity {
        options = options.with_identity(identity);
    }
    let options = Arc::new(options);
    thread::spawn(move || session::serve(listener, options));
    addr
}

fn command(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", parts.len()).into_bytes();
    for part in parts {
        out.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
        out.extend_from_slice(part);
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn dump(type_tag: u8, value: &[u8]) -> Vec<u8> {
    let mut out = vec![type_tag];
    out.extend_from_slice(value);
    out.extend_from_slice(&[0x09, 0x00, 1, 2, 3, 4, 5, 6, 7, 8]);
    out
}

fn read_reply(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line
}

/// Snapshot files under `dir`, sorted.
fn snapshots(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    };
    files.sort();
    files
}

/// Waits until `count` snapshots under `dir` parse cleanly; the session
/// thread finalizes asynchronously after the client hangs up.
fn wait_for_snapshots(dir: &Path, count: usize) -> Vec<PathBuf> {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let files = snapshots(dir);
        if files.len() == count && files.iter().all(|f| RdbReader::open(f).is_ok()) {
            return files;
        }
        assert!(
            Instant::now() < deadline,
            "timed out waiting for {count} snapshots in {}",
            dir.display()
        );
        thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn migrate_session_over_tcp() {
    let dir = tempdir().unwrap();
    let addr = start_server(dir.path(), None);

    let stream = TcpStream::connect(addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;

    writer.write_all(&command(&[b"SELECT", b"0"])).unwrap();
    assert_eq!(read_reply(&mut reader), "+OK\r\n");

    writer
        .write_all(&command(&[b"RESTORE", b"k1", b"0", &dump(0, b"\x03foo")]))
        .unwrap();
    assert_eq!(read_reply(&mut reader), "+OK\r\n");

    writer.write_all(&command(&[b"PING"])).unwrap();
    assert_eq!(read_reply(&mut reader), "-ERR unknown command 'PING'\r\n");

    // Still usable after the rejection.
    writer
        .write_all(&command(&[b"RESTORE", b"k2", b"0", &dump(2, b"\x01\x01m")]))
        .unwrap();
    assert_eq!(read_reply(&mut reader), "+OK\r\n");

    writer.shutdown(Shutdown::Write).unwrap();
    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert!(rest.is_empty());

    let files = wait_for_snapshots(&dir.path().join("127.0.0.1"), 1);
    let file = RdbReader::open(&files[0]).unwrap();
    let db = file.database(0).unwrap();
    assert_eq!(db.entries.len(), 2);
    assert_eq!(db.entries[0].key, b"k1");
    assert_eq!(db.entries[0].value, Value::String(b"foo".to_vec()));
    assert_eq!(db.entries[1].key, b"k2");
    assert_eq!(db.entries[1].value, Value::Set(vec![b"m".to_vec()]));
}

#[test]
fn concurrent_sessions_write_separate_files() {
    let dir = tempdir().unwrap();
    let addr = start_server(dir.path(), Some("shared"));

    let clients: Vec<_> = (0..4)
        .map(|i| {
            thread::spawn(move || {
                let stream = TcpStream::connect(addr).unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut writer = stream;
                for j in 0..10 {
                    let key = format!("c{i}-k{j}");
                    writer
                        .write_all(&command(&[b"RESTORE", key.as_bytes(), b"0", &dump(0, b"\x01v")]))
                        .unwrap();
                    assert_eq!(read_reply(&mut reader), "+OK\r\n");
                }
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    // Same identity, same second: siblings get distinct names.
    let files = wait_for_snapshots(&dir.path().join("shared"), 4);
    let total: usize = files
        .iter()
        .map(|f| RdbReader::open(f).unwrap().key_count())
        .sum();
    assert_eq!(total, 40);
}

#[test]
fn connection_without_commands_leaves_no_file() {
    let dir = tempdir().unwrap();
    let addr = start_server(dir.path(), Some("idle"));

    let stream = TcpStream::connect(addr).unwrap();
    drop(stream);

    // Only the second connection sends anything.
    let stream = TcpStream::connect(addr).unwrap();
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;
    writer.write_all(&command(&[b"SELECT", b"0"])).unwrap();
    assert_eq!(read_reply(&mut reader), "+OK\r\n");
    drop(writer);
    drop(reader);

    let files = wait_for_snapshots(&dir.path().join("idle"), 1);
    assert_eq!(RdbReader::open(&files[0]).unwrap().key_count(), 0);
}
