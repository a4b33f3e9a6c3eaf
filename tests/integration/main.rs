//! End-to-end lifecycle tests against a scripted gateway.

mod lifecycle;
mod mock_gateway;

use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use mock_gateway::ScriptedGateway;
use sniper::engine::acquisition::AcquisitionSettings;
use sniper::engine::executor::{RetryPolicy, SwapExecutor};
use sniper::engine::ledger::CapitalLedger;
use sniper::engine::monitor::MonitorSettings;
use sniper::engine::rate_gate::RateGate;
use sniper::engine::{EngineSettings, Services};
use sniper::gateway::paper::PaperSigner;
use sniper::notify::LogNotifier;
use sniper::storage::{self, PositionStore, TradeHistory};

pub const SOL_PRICE: f64 = 100.0;

/// Wire services around a scripted gateway. With `state_dir` the ledger
/// and stores are loaded from (and persisted to) that directory.
pub fn services(
    gateway: &Arc<ScriptedGateway>,
    capital: Decimal,
    max_per_day: u32,
    state_dir: Option<&Path>,
) -> Arc<Services> {
    let (ledger, positions, trades) = match state_dir {
        Some(dir) => (
            CapitalLedger::load(&dir.join(storage::LEDGER_FILE), capital).unwrap(),
            PositionStore::load(&dir.join(storage::POSITIONS_FILE)).unwrap(),
            TradeHistory::load(&dir.join(storage::TRADES_FILE)).unwrap(),
        ),
        None => (
            CapitalLedger::in_memory(capital),
            PositionStore::in_memory(),
            TradeHistory::in_memory(),
        ),
    };

    Arc::new(Services {
        prices: gateway.clone(),
        holdings: gateway.clone(),
        executor: Arc::new(SwapExecutor::new(
            gateway.clone(),
            Arc::new(PaperSigner::default()),
            RetryPolicy::new(3, Duration::from_millis(100)),
        )),
        ledger: Arc::new(ledger),
        gate: Arc::new(RateGate::new(max_per_day)),
        positions: Arc::new(positions),
        trades: Arc::new(trades),
        notifier: Arc::new(LogNotifier),
    })
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        acquisition: AcquisitionSettings {
            sizing_fraction: 0.8,
            buy_fee_pct: 1.0,
            take_profit_pct: 40.0,
            stop_loss_pct: 20.0,
            settle_delay: Duration::from_millis(100),
        },
        monitor: MonitorSettings {
            poll_interval: Duration::from_secs(1),
            log_every_polls: 5,
            sell_fee_pct: 1.0,
        },
        drain_timeout: Duration::from_secs(5),
    }
}

pub fn temp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sniper-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}
