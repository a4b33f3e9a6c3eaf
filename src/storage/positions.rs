//! Position store: the durable record of open and closed positions, plus
//! the per-process duplicate-signal guard.
//!
//! Positions are keyed by id. Each position is only ever mutated by the
//! monitor that owns it, so the store lock is held just long enough to
//! apply one transition and persist the snapshot.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::{load_json, save_json, StorageError};
use crate::types::{Position, PositionStatus};

#[derive(Default)]
struct Inner {
    positions: BTreeMap<Uuid, Position>,
    /// Tokens already taken by an acquisition in this process.
    claimed: HashSet<String>,
}

pub struct PositionStore {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

impl PositionStore {
    /// Store that never touches disk (tests, previews).
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            path: None,
        }
    }

    /// Load positions from `path`, starting empty if the file is absent.
    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let positions: Vec<Position> = load_json(path)?.unwrap_or_default();
        let open = positions.iter().filter(|p| p.is_open()).count();
        info!(path = %path.display(), total = positions.len(), open, "Position store loaded");

        let inner = Inner {
            positions: positions.into_iter().map(|p| (p.id, p)).collect(),
            claimed: HashSet::new(),
        };
        Ok(Self {
            inner: Mutex::new(inner),
            path: Some(path.to_path_buf()),
        })
    }

    /// Take `token_id` for an acquisition. Returns false if it was already taken.
    pub async fn claim(&self, token_id: &str) -> bool {
        self.inner.lock().await.claimed.insert(token_id.to_string())
    }

    pub async fn is_claimed(&self, token_id: &str) -> bool {
        self.inner.lock().await.claimed.contains(token_id)
    }

    /// Record a freshly opened position and persist.
    ///
    /// The position is kept in memory even if the write fails, so its
    /// monitor can still run; the next successful write includes it.
    pub async fn open(&self, position: Position) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.claimed.insert(position.token_id.clone());
        inner.positions.insert(position.id, position);
        self.persist(&inner)
    }

    /// Transition a position to a closed status and persist.
    ///
    /// Returns the updated position, or `None` if the id is unknown or the
    /// position was already closed.
    pub async fn close(
        &self,
        id: Uuid,
        status: PositionStatus,
    ) -> Result<Option<Position>, StorageError> {
        let mut inner = self.inner.lock().await;
        let closed = match inner.positions.get_mut(&id) {
            Some(position) => {
                if !position.close(status) {
                    warn!(id = %id, status = %position.status(), "Position already closed");
                    return Ok(None);
                }
                position.clone()
            }
            None => return Ok(None),
        };
        self.persist(&inner)?;
        Ok(Some(closed))
    }

    pub async fn get(&self, id: Uuid) -> Option<Position> {
        self.inner.lock().await.positions.get(&id).cloned()
    }

    pub async fn open_positions(&self) -> Vec<Position> {
        let inner = self.inner.lock().await;
        let mut open: Vec<Position> = inner.positions.values().filter(|p| p.is_open()).cloned().collect();
        open.sort_by_key(|p| p.opened_at);
        open
    }

    /// Closed positions, oldest close first.
    pub async fn closed_positions(&self) -> Vec<Position> {
        let inner = self.inner.lock().await;
        let mut closed: Vec<Position> = inner.positions.values().filter(|p| !p.is_open()).cloned().collect();
        closed.sort_by_key(|p| (p.closed_at(), p.opened_at));
        closed
    }

    /// Re-write the snapshot (used on shutdown and after a failed write).
    pub async fn flush(&self) -> Result<(), StorageError> {
        let inner = self.inner.lock().await;
        self.persist(&inner)
    }

    fn persist(&self, inner: &Inner) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let snapshot: Vec<&Position> = inner.positions.values().collect();
        save_json(&snapshot, path)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
