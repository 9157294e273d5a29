/// The per-connection interception state machine.
///
/// ```text
///            first command            read error / EOF / fatal error
/// Pending ─────────────────▶ Active ──────────────────────────────▶ Closed
///    │                                                               ▲
///    └───────────────────── EOF before any command ──────────────────┘
/// ```
///
/// Leaving `Active` always finalizes the snapshot, whatever the reason.
use anyhow::{Context, Result};
use chrono::Local;
use rdb::RdbEncoder;
use resp::RespError;
use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::identity::{create_snapshot_file, resolve_identity};
use crate::payload::{dump_version, parse_restore};
use crate::{SessionOptions, PRODUCER_AUX};

/// The snapshot owned by an active session.
struct Snapshot {
    path: PathBuf,
    encoder: RdbEncoder<BufWriter<File>>,
}

enum State {
    /// Connected, no command seen yet, no file on disk.
    Pending,
    Active(Snapshot),
    Closed,
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub identity: String,
    /// Snapshot file, if one was created.
    pub path: Option<PathBuf>,
    /// Commands received, including rejected ones.
    pub commands: u64,
    /// Keys written to the snapshot.
    pub keys: u64,
    /// `true` if the snapshot trailer was written and flushed.
    pub finalized: bool,
    /// The error that ended the session or broke finalization, if any.
    pub error: Option<String>,
}

/// One intercepted connection.
///
/// Generic over the peer's write half so it can be driven by a
/// [`TcpStream`](std::net::TcpStream) or an in-memory buffer.
pub struct Session<W: Write> {
    options: Arc<SessionOptions>,
    identity: String,
    peer: W,
    state: State,
    path: Option<PathBuf>,
    commands: u64,
    keys: u64,
    finalized: bool,
    error: Option<String>,
}

impl<W: Write> Session<W> {
    /// Creates a session for a connection from `peer_addr`. The identity is
    /// resolved here, once; no file is created until the first command.
    pub fn new(options: Arc<SessionOptions>, peer_addr: Option<SocketAddr>, peer: W) -> Self {
        let identity = resolve_identity(options.identity.as_deref(), peer_addr);
        Self {
            options,
            identity,
            peer,
            state: State::Pending,
            path: None,
            commands: 0,
            keys: 0,
            finalized: false,
            error: None,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Snapshot path, once the first command has created it.
    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Closed)
    }

    /// Reads and handles commands until the stream ends or a fatal error
    /// occurs, then finalizes the snapshot.
    pub fn run<R: BufRead>(mut self, reader: &mut R) -> SessionSummary {
        while !self.is_closed() {
            let args = match resp::read_command(reader) {
                Ok(args) => args,
                Err(RespError::Closed) => {
                    debug!(identity = %self.identity, "peer closed the connection");
                    break;
                }
                Err(e) => {
                    warn!(identity = %self.identity, error = %e, "failed to read command");
                    self.error = Some(e.to_string());
                    break;
                }
            };

            if let Err(e) = self.handle(&args) {
                warn!(identity = %self.identity, error = %format!("{e:#}"), "session aborted");
                self.error = Some(format!("{e:#}"));
                break;
            }
        }
        self.close()
    }

    /// Handles one command and writes its reply.
    ///
    /// Protocol-level problems (unknown command, bad arity, bad payload) are
    /// answered with an error reply and return `Ok`. An `Err` means the
    /// session cannot continue: snapshot I/O failed or the peer is gone.
    pub fn handle(&mut self, args: &[Vec<u8>]) -> Result<()> {
        anyhow::ensure!(!self.is_closed(), "session is closed");
        let Some(name) = args.first() else {
            return Ok(());
        };
        self.commands += 1;

        if matches!(self.state, State::Pending) {
            self.open_snapshot()?;
        }

        match name.to_ascii_uppercase().as_slice() {
            // Single-database snapshot: every key lands in db 0.
            b"SELECT" => resp::write_ok(&mut self.peer).context("failed to acknowledge SELECT"),
            b"RESTORE" | b"RESTORE-ASKING" => self.restore(args),
            _ => {
                let reply = format!("ERR unknown command '{}'", String::from_utf8_lossy(name));
                resp::write_error(&mut self.peer, &reply).context("failed to send error reply")
            }
        }
    }

    /// Finalizes the snapshot (if any) and returns the session summary.
    pub fn close(mut self) -> SessionSummary {
        self.finish();
        SessionSummary {
            identity: self.identity.clone(),
            path: self.path.clone(),
            commands: self.commands,
            keys: self.keys,
            finalized: self.finalized,
            error: self.error.clone(),
        }
    }

    fn restore(&mut self, args: &[Vec<u8>]) -> Result<()> {
        let payload = match parse_restore(args, self.options.unwrap) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(identity = %self.identity, error = %e, "rejected RESTORE");
                return resp::write_error(&mut self.peer, &e.to_string())
                    .context("failed to send error reply");
            }
        };

        let State::Active(snapshot) = &mut self.state else {
            anyhow::bail!("no active snapshot");
        };
        snapshot
            .encoder
            .write_raw_key_value(payload.type_tag, payload.key, payload.value)
            .with_context(|| format!("failed to write key to {}", snapshot.path.display()))?;
        self.keys += 1;

        debug!(
            identity = %self.identity,
            key = %String::from_utf8_lossy(payload.key),
            type_tag = payload.type_tag,
            dump_version = ?dump_version(&args[3][1..]),
            "captured key"
        );

        resp::write_ok(&mut self.peer).context("failed to acknowledge RESTORE")
    }

    /// Creates the snapshot file and writes header, aux fields and the db 0
    /// frame.
    fn open_snapshot(&mut self) -> Result<()> {
        let (path, file) = create_snapshot_file(&self.options.data_dir, &self.identity, Local::now())
            .with_context(|| {
                format!(
                    "failed to create snapshot for {} under {}",
                    self.identity,
                    self.options.data_dir.display()
                )
            })?;
        info!(identity = %self.identity, path = %path.display(), "snapshot opened");

        let mut snapshot = Snapshot {
            path: path.clone(),
            encoder: RdbEncoder::with_compression(BufWriter::new(file), self.options.compress),
        };
        let preamble = write_preamble(&mut snapshot.encoder);

        // Active even if the preamble failed, so close still finalizes it.
        self.path = Some(path);
        self.state = State::Active(snapshot);
        preamble.context("failed to write snapshot preamble")
    }

    /// Moves to `Closed`, finalizing the snapshot if one is open. Runs at
    /// most once; later calls are no-ops.
    fn finish(&mut self) {
        let State::Active(mut snapshot) = std::mem::replace(&mut self.state, State::Closed) else {
            return;
        };

        let result = match snapshot.encoder.finalize() {
            Ok(writer) => {
                self.finalized = true;
                writer
                    .into_inner()
                    .map_err(|e| e.into_error())
                    .and_then(|file| file.sync_all())
                    .context("failed to sync snapshot")
            }
            Err(e) => Err(anyhow::Error::from(e).context("failed to write snapshot trailer")),
        };

        match result {
            Ok(()) => info!(
                identity = %self.identity,
                path = %snapshot.path.display(),
                keys = self.keys,
                bytes = snapshot.encoder.bytes_written(),
                "snapshot finalized"
            ),
            Err(e) => {
                error!(
                    identity = %self.identity,
                    path = %snapshot.path.display(),
                    error = %format!("{e:#}"),
                    "failed to finalize snapshot"
                );
                self.error.get_or_insert_with(|| format!("{e:#}"));
            }
        }
    }
}

impl<W: Write> Drop for Session<W> {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Header, producer aux fields and the db 0 frame.
fn write_preamble<W: Write>(enc: &mut RdbEncoder<W>) -> Result<(), rdb::RdbError> {
    enc.write_header()?;
    for (key, value) in PRODUCER_AUX {
        enc.write_aux(key.as_bytes(), value.as_bytes())?;
    }
    enc.write_database_frame(0, 0, 0)
}
