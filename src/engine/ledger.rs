//! Capital ledger: the compounding balance that sizes every buy.
//!
//! All mutations go through one async mutex and are persisted before the
//! lock is released, so concurrent monitors closing at the same moment
//! cannot lose updates.
//!
//! Capital committed to open positions is *reserved* at acquisition time;
//! sizing reads `available = balance − reservations`, never the raw balance.
//! The realised delta is applied exactly once per position id, when its
//! closing sell confirms, and the reservation is released in the same update.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::storage::{load_json, save_json, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger write failed, update kept in memory: {0}")]
    Persistence(#[from] StorageError),

    #[error("ledger halted until pending state is persisted: {0}")]
    Halted(StorageError),
}

/// Persisted ledger state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    pub balance_usd: Decimal,
    /// Positions durably opened.
    pub cycle_count: u64,
    pub realized_pnl_usd: Decimal,
    pub wins: u64,
    pub losses: u64,
    /// Positions whose delta has been applied.
    #[serde(default)]
    applied: HashSet<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerState {
    fn seeded(starting_capital: Decimal) -> Self {
        Self {
            balance_usd: starting_capital,
            cycle_count: 0,
            realized_pnl_usd: Decimal::ZERO,
            wins: 0,
            losses: 0,
            applied: HashSet::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Point-in-time view for reports and the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    pub balance_usd: Decimal,
    pub available_usd: Decimal,
    pub reserved_usd: Decimal,
    pub cycle_count: u64,
    pub realized_pnl_usd: Decimal,
    pub wins: u64,
    pub losses: u64,
    pub halted: bool,
}

struct Inner {
    state: LedgerState,
    reservations: HashMap<Uuid, Decimal>,
    /// State changed in memory but the last write failed.
    dirty: bool,
}

impl Inner {
    fn reserved(&self) -> Decimal {
        self.reservations.values().copied().sum()
    }

    fn available(&self) -> Decimal {
        (self.state.balance_usd - self.reserved()).max(Decimal::ZERO)
    }
}

pub struct CapitalLedger {
    inner: Mutex<Inner>,
    path: Option<PathBuf>,
}

/// Convert a USD float to cents.
pub fn to_usd(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default().round_dp(2)
}

impl CapitalLedger {
    pub fn in_memory(starting_capital: Decimal) -> Self {
        Self::with_state(LedgerState::seeded(starting_capital), None)
    }

    /// Load from `path`, seeding from `starting_capital` when no ledger exists.
    pub fn load(path: &Path, starting_capital: Decimal) -> Result<Self, LedgerError> {
        let state = match load_json::<LedgerState>(path)? {
            Some(state) => {
                info!(
                    balance = format!("${:.2}", state.balance_usd),
                    cycles = state.cycle_count,
                    pnl = format!("${:.2}", state.realized_pnl_usd),
                    "Ledger resumed from disk"
                );
                state
            }
            None => {
                info!(balance = format!("${:.2}", starting_capital), "Ledger seeded");
                LedgerState::seeded(starting_capital)
            }
        };
        Ok(Self::with_state(state, Some(path.to_path_buf())))
    }

    fn with_state(state: LedgerState, path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state,
                reservations: HashMap::new(),
                dirty: false,
            }),
            path,
        }
    }

    pub async fn read_balance(&self) -> Decimal {
        self.inner.lock().await.state.balance_usd
    }

    /// Balance not committed to open positions.
    pub async fn available(&self) -> Decimal {
        self.inner.lock().await.available()
    }

    /// Commit `amount_usd` of available capital to position `id`.
    /// Returns false if the amount is non-positive or exceeds what is available.
    pub async fn reserve(&self, id: Uuid, amount_usd: Decimal) -> bool {
        let mut inner = self.inner.lock().await;
        if amount_usd <= Decimal::ZERO || amount_usd > inner.available() {
            return false;
        }
        inner.reservations.insert(id, amount_usd);
        true
    }

    /// Re-establish the reservation of a position resumed after restart.
    /// Unconditional: the capital was already committed before the restart.
    pub async fn restore_reservation(&self, id: Uuid, amount_usd: Decimal) {
        let mut inner = self.inner.lock().await;
        if !inner.state.applied.contains(&id) {
            inner.reservations.insert(id, amount_usd.max(Decimal::ZERO));
        }
    }

    /// Forget applied ids of positions that are no longer open. Only an
    /// open position can be monitored again, so only its id still guards
    /// against a second delta. Persisted with the next write.
    pub async fn retain_applied(&self, open_ids: &HashSet<Uuid>) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.state.applied.len();
        inner.state.applied.retain(|id| open_ids.contains(id));
        let pruned = before - inner.state.applied.len();
        if pruned > 0 {
            info!(pruned, kept = inner.state.applied.len(), "Pruned applied ledger ids");
        }
        pruned
    }

    /// Drop the reservation for `id` (failed buy, position without balance).
    pub async fn release(&self, id: Uuid) -> Option<Decimal> {
        self.inner.lock().await.reservations.remove(&id)
    }

    /// Apply the realised P&L of position `id`, at most once.
    ///
    /// Returns `Ok(false)` if the delta for `id` was already applied.
    /// On a failed write the delta stays applied in memory and is reported
    /// as [`LedgerError::Persistence`]; every later call first retries the
    /// pending write and fails with [`LedgerError::Halted`] while it keeps
    /// failing.
    pub async fn apply_delta(&self, id: Uuid, amount_usd: Decimal) -> Result<bool, LedgerError> {
        let mut inner = self.inner.lock().await;

        if inner.dirty {
            match self.persist(&mut inner) {
                Ok(()) => info!("Pending ledger state persisted, resuming updates"),
                Err(e) => return Err(LedgerError::Halted(e)),
            }
        }

        if inner.state.applied.contains(&id) {
            inner.reservations.remove(&id);
            warn!(id = %id, "Delta already applied, ignoring");
            return Ok(false);
        }

        let delta = amount_usd.round_dp(2);
        let before = inner.state.balance_usd;
        inner.state.balance_usd = (before + delta).max(Decimal::ZERO);
        inner.state.realized_pnl_usd += delta;
        if delta >= Decimal::ZERO {
            inner.state.wins += 1;
        } else {
            inner.state.losses += 1;
        }
        inner.state.applied.insert(id);
        inner.reservations.remove(&id);

        info!(
            id = %id,
            delta = format!("${:.2}", delta),
            before = format!("${:.2}", before),
            after = format!("${:.2}", inner.state.balance_usd),
            "Ledger updated"
        );

        self.persist(&mut inner)?;
        Ok(true)
    }

    /// Count a durably opened position. Returns the new cycle count.
    pub async fn record_open(&self) -> Result<u64, LedgerError> {
        let mut inner = self.inner.lock().await;
        inner.state.cycle_count += 1;
        let cycles = inner.state.cycle_count;
        self.persist(&mut inner)?;
        Ok(cycles)
    }

    /// Write the current state. Clears the halted condition on success.
    pub async fn flush(&self) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().await;
        self.persist(&mut inner)?;
        Ok(())
    }

    pub async fn is_halted(&self) -> bool {
        self.inner.lock().await.dirty
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        let inner = self.inner.lock().await;
        LedgerSnapshot {
            balance_usd: inner.state.balance_usd,
            available_usd: inner.available(),
            reserved_usd: inner.reserved(),
            cycle_count: inner.state.cycle_count,
            realized_pnl_usd: inner.state.realized_pnl_usd,
            wins: inner.state.wins,
            losses: inner.state.losses,
            halted: inner.dirty,
        }
    }

    fn persist(&self, inner: &mut Inner) -> Result<(), StorageError> {
        let Some(path) = &self.path else {
            inner.dirty = false;
            return Ok(());
        };
        inner.state.updated_at = Utc::now();
        match save_json(&inner.state, path) {
            Ok(()) => {
                inner.dirty = false;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Ledger write failed");
                inner.dirty = true;
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
