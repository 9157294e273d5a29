//! # Catalog - read-only HTTP view of captured snapshots
//!
//! Serves the snapshot tree written by the interception sessions:
//!
//! ```text
//! <data_dir>/
//!   <identity>/
//!     20240102150405.rdb
//!     20240102150405-1.rdb
//! ```
//!
//! ## Routes
//!
//! | Route                          | Response                                   |
//! |--------------------------------|--------------------------------------------|
//! | `GET /hosts`                   | identity directory names, sorted           |
//! | `GET /list?host=<id>`          | snapshot file names of one identity        |
//! | `GET /rdb/:host/:file`         | raw snapshot bytes                         |
//! | `GET /keys?host=<id>&file=<f>` | `[{"db", "key", "type"}]` of one snapshot  |
//!
//! Every name taken from a request must be a single path component;
//! anything else is answered with 400 before touching the filesystem.

mod error;
mod handlers;

pub use error::CatalogError;
pub use handlers::KeyEntry;

use axum::routing::get;
use axum::Router;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Extension of the files listed by `/list`.
pub const SNAPSHOT_SUFFIX: &str = "rdb";

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct CatalogState {
    pub data_dir: PathBuf,
}

impl CatalogState {
    /// Resolves `host` (and optionally `file`) under the data directory after
    /// validating each as a plain name.
    pub(crate) fn resolve(&self, host: &str, file: Option<&str>) -> Result<PathBuf, CatalogError> {
        let mut path = self.data_dir.join(valid_name(host)?);
        if let Some(file) = file {
            path.push(valid_name(file)?);
        }
        Ok(path)
    }
}

/// Builds the catalog router over `data_dir`.
pub fn router<P: Into<PathBuf>>(data_dir: P) -> Router {
    let state = Arc::new(CatalogState {
        data_dir: data_dir.into(),
    });
    Router::new()
        .route("/hosts", get(handlers::hosts))
        .route("/list", get(handlers::list))
        .route("/rdb/:host/:file", get(handlers::download))
        .route("/keys", get(handlers::keys))
        .with_state(state)
}

/// Serves the catalog on `listener` until the server fails.
pub async fn serve(listener: tokio::net::TcpListener, data_dir: &Path) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, data_dir = %data_dir.display(), "catalog listener ready");
    axum::serve(listener, router(data_dir)).await
}

/// Accepts `name` only if it is one non-empty path component.
pub fn valid_name(name: &str) -> Result<&str, CatalogError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        Err(CatalogError::InvalidName(name.to_string()))
    } else {
        Ok(name)
    }
}
