/// Accept loop: one OS thread per inbound connection.
///
/// Sessions share nothing but the filesystem namespace; each one writes only
/// its own file inside its identity directory.
use std::io::{self, BufReader};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{info, warn};

use crate::{Session, SessionOptions, SessionSummary};

/// Accepts connections forever, running a [`Session`] for each on its own
/// thread. Accept errors are logged and the loop keeps going.
///
/// Returns only if the listener cannot report its local address.
pub fn serve(listener: TcpListener, options: Arc<SessionOptions>) -> io::Result<()> {
    let local = listener.local_addr()?;
    info!(addr = %local, data_dir = %options.data_dir.display(), "interception listener ready");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => spawn_session(stream, Arc::clone(&options)),
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }
    Ok(())
}

fn spawn_session(stream: TcpStream, options: Arc<SessionOptions>) {
    let name = match stream.peer_addr() {
        Ok(addr) => format!("session-{addr}"),
        Err(_) => "session".to_string(),
    };
    let spawned = thread::Builder::new()
        .name(name)
        .spawn(move || handle_connection(stream, options));
    if let Err(e) = spawned {
        warn!(error = %e, "failed to spawn session thread");
    }
}

/// Runs one session to completion on the calling thread.
pub fn handle_connection(stream: TcpStream, options: Arc<SessionOptions>) -> io::Result<SessionSummary> {
    let peer = stream.peer_addr().ok();
    let writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let session = Session::new(options, peer, writer);
    info!(peer = ?peer, identity = %session.identity(), "connection accepted");

    let summary = session.run(&mut reader);
    info!(
        peer = ?peer,
        identity = %summary.identity,
        commands = summary.commands,
        keys = summary.keys,
        finalized = summary.finalized,
        "connection closed"
    );
    Ok(summary)
}
