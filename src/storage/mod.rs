//! Persistence layer.
//!
//! All durable state lives in JSON files under the agent's state directory:
//! - `ledger.json`: capital ledger (see `engine::ledger`)
//! - `positions.json`: every position, open and closed
//! - `trades.json`: reporting-only trade history
//!
//! Writes go to a sibling temp file first and are renamed into place, so a
//! crash mid-write never leaves a truncated state file behind.

pub mod positions;
pub mod trades;

pub use positions::PositionStore;
pub use trades::{DailySummary, TradeHistory};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const LEDGER_FILE: &str = "ledger.json";
pub const POSITIONS_FILE: &str = "positions.json";
pub const TRADES_FILE: &str = "trades.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to serialise state for {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Serialise `value` and atomically replace the file at `path`.
/// The parent directory must already exist.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(value).map_err(|source| StorageError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = temp_path(path);
    std::fs::write(&tmp, json).map_err(|source| StorageError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), "State saved");
    Ok(())
}

/// Load a JSON file. Returns `None` if the file doesn't exist (fresh start).
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    if !path.exists() {
        info!(path = %path.display(), "No saved state found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value = serde_json::from_str(&json).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// Create the state directory if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), StorageError> {
    std::fs::create_dir_all(dir).map_err(|source| StorageError::Io {
        path: dir.to_path_buf(),
        source,
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
