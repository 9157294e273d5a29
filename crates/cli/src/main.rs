//! # safedel - capture migrated keys into standalone snapshots
//!
//! Listens where a migrating store expects a peer node. Every connection is
//! an interception session: `SELECT` and `RESTORE` are acknowledged, and the
//! restored keys are written to `<RDB_DIR>/<identity>/<timestamp>.rdb`
//! instead of being stored. A second listener serves a read-only catalog of
//! the captured files over HTTP.
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! SAFEDEL_RDB_DIR         snapshot root           (default: "./data", RDB_DIR also read)
//! SAFEDEL_LISTEN          interception listener   (default: "0.0.0.0:3333")
//! SAFEDEL_CATALOG_LISTEN  catalog listener        (default: "0.0.0.0:8081", empty = off)
//! SAFEDEL_IDENTITY        fixed session identity  (default: peer IP)
//! SAFEDEL_COMPRESS        LZF string compression  (default: "true")
//! SAFEDEL_UNWRAP          dump suffix removal     (default: "trailer", or "scan")
//! RUST_LOG                log filter              (default: "info")
//! ```
//!
//! ## Example
//!
//! ```text
//! $ SAFEDEL_RDB_DIR=/var/lib/safedel cargo run -p cli
//! $ redis-cli -p 6379 MIGRATE 127.0.0.1 3333 "" 0 5000 KEYS k1 k2
//! $ curl 'localhost:8081/list?host=127.0.0.1'
//! ["20240102150405.rdb"]
//! ```

use anyhow::{anyhow, Context, Result};
use config::Config;
use session::SessionOptions;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    info!(
        rdb_dir = %config.rdb_dir.display(),
        listen = %config.listen_addr,
        catalog = ?config.catalog_addr,
        identity = ?config.identity,
        compress = config.compress,
        unwrap = %config.unwrap,
        "safedel starting"
    );

    let listener = TcpListener::bind(&config.listen_addr)
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    let options = Arc::new(SessionOptions::from_config(&config));
    let accept = thread::Builder::new()
        .name("accept".to_string())
        .spawn(move || session::serve(listener, options))
        .context("failed to spawn accept thread")?;

    if let Some(addr) = &config.catalog_addr {
        run_catalog(addr, &config.rdb_dir)?;
    }

    accept
        .join()
        .map_err(|_| anyhow!("accept thread panicked"))?
        .context("interception listener failed")
}

/// Runs the catalog on its own tokio runtime; blocks until it stops.
fn run_catalog(addr: &str, data_dir: &Path) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start catalog runtime")?;
    runtime.block_on(async {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind catalog on {addr}"))?;
        catalog::serve(listener, data_dir)
            .await
            .context("catalog server failed")
    })
}
