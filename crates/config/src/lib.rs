//! # Config
//!
//! Process configuration, read once at startup and passed by value to the
//! components that need it. Nothing here is global.
//!
//! ```text
//! SAFEDEL_RDB_DIR         snapshot root directory     (default: "./data", falls back to RDB_DIR)
//! SAFEDEL_LISTEN          interception listener       (default: "0.0.0.0:3333")
//! SAFEDEL_CATALOG_LISTEN  catalog HTTP listener       (default: "0.0.0.0:8081", empty disables)
//! SAFEDEL_IDENTITY        identity override           (default: unset, use the peer address)
//! SAFEDEL_COMPRESS        LZF string compression      (default: "true")
//! SAFEDEL_UNWRAP          dump payload unwrap         (default: "trailer", or "scan")
//! ```

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_RDB_DIR: &str = "./data";
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3333";
pub const DEFAULT_CATALOG_LISTEN: &str = "0.0.0.0:8081";

/// Errors produced while loading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// How the version/checksum suffix of a dump payload is located.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnwrapStrategy {
    /// The last 10 bytes are a 2-byte version and an 8-byte checksum.
    #[default]
    Trailer,
    /// Cut at the first `0x09 0x00` pair (legacy behaviour).
    MarkerScan,
}

impl FromStr for UnwrapStrategy {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trailer" => Ok(Self::Trailer),
            "scan" | "marker" | "marker-scan" => Ok(Self::MarkerScan),
            _ => Err("expected \"trailer\" or \"scan\""),
        }
    }
}

impl fmt::Display for UnwrapStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trailer => f.write_str("trailer"),
            Self::MarkerScan => f.write_str("scan"),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Root directory; each session identity gets a subdirectory.
    pub rdb_dir: PathBuf,
    /// Address the interception listener binds to.
    pub listen_addr: String,
    /// Address the catalog listener binds to; `None` disables the catalog.
    pub catalog_addr: Option<String>,
    /// Identity used for every session instead of the peer address.
    pub identity: Option<String>,
    /// Whether strings may be LZF-compressed in snapshots.
    pub compress: bool,
    pub unwrap: UnwrapStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rdb_dir: PathBuf::from(DEFAULT_RDB_DIR),
            listen_addr: DEFAULT_LISTEN.to_string(),
            catalog_addr: Some(DEFAULT_CATALOG_LISTEN.to_string()),
            identity: None,
            compress: true,
            unwrap: UnwrapStrategy::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let rdb_dir = lookup("SAFEDEL_RDB_DIR")
            .or_else(|| lookup("RDB_DIR"))
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.rdb_dir);

        let listen_addr = lookup("SAFEDEL_LISTEN")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.listen_addr);

        let catalog_addr = match lookup("SAFEDEL_CATALOG_LISTEN") {
            Some(v) if v.trim().is_empty() => None,
            Some(v) => Some(v),
            None => defaults.catalog_addr,
        };

        let identity = lookup("SAFEDEL_IDENTITY").filter(|v| !v.trim().is_empty());

        let compress = match lookup("SAFEDEL_COMPRESS") {
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                key: "SAFEDEL_COMPRESS",
                value: v,
                reason: "expected a boolean",
            })?,
            None => defaults.compress,
        };

        let unwrap = match lookup("SAFEDEL_UNWRAP") {
            Some(v) => v.parse().map_err(|reason| ConfigError::Invalid {
                key: "SAFEDEL_UNWRAP",
                value: v.clone(),
                reason,
            })?,
            None => defaults.unwrap,
        };

        Ok(Self {
            rdb_dir,
            listen_addr,
            catalog_addr,
            identity,
            compress,
            unwrap,
        })
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
