//! # Session - migration traffic interception
//!
//! Accepts connections from a store that is migrating keys to us, and writes
//! every key it pushes into a standalone snapshot instead of applying it.
//!
//! ## Architecture
//!
//! ```text
//! source store (MIGRATE)
//!   |
//!   v
//! ┌───────────────────────────────────────────────┐
//! │ server.rs   accept loop, one thread per conn  │
//! │   |                                           │
//! │   v                                           │
//! │ session.rs  read_command → dispatch           │
//! │   SELECT            → +OK                     │
//! │   RESTORE           → payload.rs unwrap       │
//! │                     → RdbEncoder key write    │
//! │                     → +OK                     │
//! │   anything else     → -ERR unknown command    │
//! │   EOF / error       → finalize snapshot       │
//! └───────────────────────────────────────────────┘
//!   |
//!   v
//! <data_dir>/<identity>/<YYYYmmddHHMMSS>.rdb
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module       | Purpose                                            |
//! |--------------|----------------------------------------------------|
//! | [`identity`] | identity resolution, snapshot file creation        |
//! | [`payload`]  | `RESTORE` argument extraction, dump suffix removal |
//! | [`session`]  | `Session` state machine                            |
//! | [`server`]   | blocking accept loop                               |

pub mod identity;
pub mod payload;
pub mod server;
mod session;

pub use config::UnwrapStrategy;
pub use server::{handle_connection, serve};
pub use session::{Session, SessionSummary};

use config::Config;
use std::path::PathBuf;

/// Aux fields written at the top of every snapshot, in this order.
pub const PRODUCER_AUX: [(&str, &str); 3] = [
    ("redis-ver", "4.0.6"),
    ("redis-bits", "64"),
    ("aof-preamble", "0"),
];

/// Settings shared by every session, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Root directory; one subdirectory per identity.
    pub data_dir: PathBuf,
    /// Identity used instead of the peer address.
    pub identity: Option<String>,
    /// Whether keys may be LZF-compressed.
    pub compress: bool,
    pub unwrap: UnwrapStrategy,
}

impl SessionOptions {
    /// Session settings with defaults for everything but the directory.
    pub fn new<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            identity: None,
            compress: true,
            unwrap: UnwrapStrategy::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.rdb_dir.clone(),
            identity: config.identity.clone(),
            compress: config.compress,
            unwrap: config.unwrap,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_unwrap(mut self, unwrap: UnwrapStrategy) -> Self {
        self.unwrap = unwrap;
        self
    }
}

#[cfg(test)]
mod tests;
