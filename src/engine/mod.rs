//! Core engine: the signal dispatch loop and the exit monitor supervisor.
//!
//! One consumer takes token signals off the queue in arrival order and
//! runs each through the [`AcquisitionController`]. Every opened position
//! gets its own [`ExitMonitor`] task, held in a `JoinSet` so shutdown can
//! drain them before the ledger and stores are flushed.

pub mod acquisition;
pub mod executor;
pub mod ledger;
pub mod monitor;
pub mod rate_gate;

use chrono::{DateTime, Local, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::gateway::{HoldingsSource, PriceFeed};
use crate::notify::{self, format_daily_report, format_failure, format_quota_exhausted, Notifier};
use crate::storage::{PositionStore, TradeHistory};
use crate::types::Position;

use acquisition::{AcquireError, AcquisitionController, AcquisitionSettings};
use executor::SwapExecutor;
use ledger::{to_usd, CapitalLedger};
use monitor::{ExitMonitor, MonitorExit, MonitorSettings};
use rate_gate::{GateDecision, RateGate};

/// Everything the acquisition controller and the monitors share.
///
/// Owned by the process root and handed out as `Arc<Services>`.
pub struct Services {
    pub prices: Arc<dyn PriceFeed>,
    pub holdings: Arc<dyn HoldingsSource>,
    pub executor: Arc<SwapExecutor>,
    pub ledger: Arc<CapitalLedger>,
    pub gate: Arc<RateGate>,
    pub positions: Arc<PositionStore>,
    pub trades: Arc<TradeHistory>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub acquisition: AcquisitionSettings,
    pub monitor: MonitorSettings,
    pub drain_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            acquisition: AcquisitionSettings::from(&cfg.trading),
            monitor: MonitorSettings::from_config(&cfg.monitor, &cfg.trading),
            drain_timeout: cfg.monitor.drain_timeout(),
        }
    }
}

/// What happened to the monitors during shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Monitors that finished within the drain timeout.
    pub drained: usize,
    /// Monitors still running at the timeout and aborted.
    pub aborted: usize,
    /// Ledger and stores were all written successfully.
    pub flushed: bool,
}

pub struct Engine {
    services: Arc<Services>,
    acquisition: AcquisitionController,
    monitor_settings: MonitorSettings,
    drain_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
    monitors: JoinSet<(Uuid, MonitorExit)>,
}

impl Engine {
    pub fn new(services: Arc<Services>, settings: EngineSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            acquisition: AcquisitionController::new(Arc::clone(&services), settings.acquisition),
            services,
            monitor_settings: settings.monitor,
            drain_timeout: settings.drain_timeout,
            shutdown_tx,
            monitors: JoinSet::new(),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Number of monitor tasks still running.
    pub fn active_monitors(&self) -> usize {
        self.monitors.len()
    }

    /// Restart recovery: re-claim, re-reserve and re-monitor every OPEN
    /// position found in the store.
    pub async fn resume(&mut self) -> usize {
        let open = self.services.positions.open_positions().await;
        let count = open.len();
        let open_ids: HashSet<Uuid> = open.iter().map(|p| p.id).collect();
        self.services.ledger.retain_applied(&open_ids).await;
        for position in open {
            self.services.positions.claim(&position.token_id).await;
            self.services
                .ledger
                .restore_reservation(position.id, to_usd(position.cost_usd))
                .await;
            info!(
                token = %position.token_id,
                position = %position,
                "Resuming monitor for open position"
            );
            self.spawn_monitor(position);
        }
        if count > 0 {
            info!(count, "Open positions resumed");
        }
        count
    }

    fn spawn_monitor(&mut self, position: Position) {
        let id = position.id;
        let monitor = ExitMonitor::new(
            Arc::clone(&self.services),
            self.monitor_settings.clone(),
            position,
            self.shutdown_tx.subscribe(),
        );
        self.monitors.spawn(async move { (id, monitor.run().await) });
    }

    /// Consume signals until `shutdown` resolves, or until the queue is
    /// closed and every monitor has finished. Then drain and flush.
    pub async fn run<F>(mut self, mut signals: mpsc::Receiver<String>, shutdown: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut queue_open = true;
        let mut quota_notified = false;

        info!(
            max_per_day = self.services.gate.max_per_day(),
            monitors = self.monitors.len(),
            "Dispatch loop started"
        );

        loop {
            // Checking the gate performs the midnight reset; report it at once.
            let decision = self.services.gate.check();
            self.report_rollover(false).await;

            if !queue_open && self.monitors.is_empty() {
                info!("Signal queue closed and no open monitors");
                break;
            }

            // Quota used up: sleep until the reset instead of taking signals.
            if let GateDecision::Exhausted { until } = decision {
                if !quota_notified {
                    warn!(until = %until, "Daily buy quota exhausted");
                    let msg = format_quota_exhausted(self.services.gate.max_per_day(), until);
                    notify::deliver(&self.services.notifier, msg);
                    quota_notified = true;
                }
                tokio::select! {
                    _ = &mut shutdown => break,
                    Some(joined) = self.monitors.join_next(), if !self.monitors.is_empty() => {
                        log_monitor_exit(joined);
                    }
                    _ = tokio::time::sleep(until_duration(until)) => {}
                }
                continue;
            }
            quota_notified = false;

            let next_reset = self.services.gate.next_reset();
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting signals");
                    break;
                }
                Some(joined) = self.monitors.join_next(), if !self.monitors.is_empty() => {
                    log_monitor_exit(joined);
                }
                signal = signals.recv(), if queue_open => match signal {
                    Some(token_id) => self.dispatch(&token_id).await,
                    None => {
                        info!("Signal queue closed");
                        queue_open = false;
                    }
                },
                _ = tokio::time::sleep(until_duration(next_reset)) => {}
            }
        }

        signals.close();
        // A rollover noticed by the last acquisition must not be lost.
        self.report_rollover(true).await;
        self.drain().await
    }

    async fn dispatch(&mut self, token_id: &str) {
        info!(token = %token_id, "Signal received");
        match self.acquisition.acquire(token_id).await {
            Ok(position) => self.spawn_monitor(position),
            Err(AcquireError::Persistence { position, source }) => {
                // The buy went through; the position must still be watched.
                error!(token = %token_id, error = %source, "Monitoring unpersisted position");
                self.spawn_monitor(*position);
            }
            Err(AcquireError::DuplicateSignal(_)) => {
                info!(token = %token_id, "Duplicate signal ignored");
            }
            Err(e @ AcquireError::QuoteOrSwapFailed(_)) => {
                warn!(token = %token_id, error = %e, "Acquisition failed");
                let msg = format_failure(token_id, "buy", &e.to_string());
                notify::deliver(&self.services.notifier, msg);
            }
            Err(e) => warn!(token = %token_id, error = %e, "Acquisition skipped"),
        }
    }

    /// Send the daily report if the gate rolled over since the last check.
    /// With `wait` the send completes before returning.
    async fn report_rollover(&self, wait: bool) {
        let Some(rollover) = self.services.gate.take_rollover() else {
            return;
        };
        let since: DateTime<Utc> = rollover.window_start.with_timezone(&Utc);
        let summary = self.services.trades.summary_since(since).await;
        let snapshot = self.services.ledger.snapshot().await;
        info!(
            buys = rollover.previous_buys,
            closes = summary.closes,
            pnl = format!("${:+.2}", summary.realized_pnl_usd),
            balance = format!("${:.2}", snapshot.balance_usd),
            "Daily report"
        );
        let msg = format_daily_report(&summary, &snapshot);
        if wait {
            notify::send_bounded(self.services.notifier.as_ref(), &msg).await;
        } else {
            notify::deliver(&self.services.notifier, msg);
        }
    }

    /// Stop monitors at their next safe point, wait for them, then flush.
    async fn drain(mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        self.shutdown_tx.send_replace(true);

        let pending = self.monitors.len();
        if pending > 0 {
            info!(
                monitors = pending,
                timeout_secs = self.drain_timeout.as_secs(),
                "Draining monitors"
            );
        }
        let monitors = &mut self.monitors;
        let drained = &mut report.drained;
        let finished = tokio::time::timeout(self.drain_timeout, async {
            while let Some(joined) = monitors.join_next().await {
                log_monitor_exit(joined);
                *drained += 1;
            }
        })
        .await;
        if finished.is_err() {
            report.aborted = self.monitors.len();
            warn!(aborted = report.aborted, "Drain timed out, aborting remaining monitors");
            self.monitors.shutdown().await;
        }

        report.flushed = self.flush().await;
        let snapshot = self.services.ledger.snapshot().await;
        info!(
            balance = format!("${:.2}", snapshot.balance_usd),
            cycles = snapshot.cycle_count,
            pnl = format!("${:+.2}", snapshot.realized_pnl_usd),
            drained = report.drained,
            aborted = report.aborted,
            "Engine stopped"
        );
        report
    }

    async fn flush(&self) -> bool {
        let mut ok = true;
        if let Err(e) = self.services.ledger.flush().await {
            error!(error = %e, "Failed to save ledger");
            ok = false;
        }
        if let Err(e) = self.services.positions.flush().await {
            error!(error = %e, "Failed to save positions");
            ok = false;
        }
        if let Err(e) = self.services.trades.flush().await {
            error!(error = %e, "Failed to save trade history");
            ok = false;
        }
        ok
    }
}

fn log_monitor_exit(joined: Result<(Uuid, MonitorExit), JoinError>) {
    match joined {
        Ok((id, MonitorExit::Closed { reason, profit_usd, .. })) => info!(
            id = %id,
            reason = %reason,
            profit = format!("${profit_usd:+.2}"),
            "Monitor finished"
        ),
        Ok((id, MonitorExit::AbortedNoBalance)) => info!(id = %id, "Monitor aborted, no balance"),
        Ok((id, MonitorExit::Stopped)) => info!(id = %id, "Monitor stopped"),
        Err(e) if e.is_cancelled() => warn!("Monitor task cancelled"),
        Err(e) => error!(error = %e, "Monitor task panicked"),
    }
}

fn until_duration(until: DateTime<Local>) -> Duration {
    (until - Local::now()).to_std().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::RetryPolicy;
    use crate::gateway::paper::{PaperSigner, PaperWallet};
    use crate::gateway::MockPriceFeed;
    use crate::notify::{LogNotifier, MockNotifier};
    use crate::types::{Holding, OpenRequest, Quote};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn flat_prices(price: f64) -> MockPriceFeed {
        let mut mock = MockPriceFeed::new();
        mock.expect_quote().returning(move |_| {
            Ok(Quote {
                price_usd: price,
                market_cap_usd: 50_000.0,
                liquidity_usd: 10_000.0,
            })
        });
        mock
    }

    fn services(prices: MockPriceFeed, notifier: Arc<dyn Notifier>, max_per_day: u32) -> (Arc<Services>, Arc<PaperWallet>) {
        services_with_gate(prices, notifier, RateGate::new(max_per_day))
    }

    fn services_with_gate(
        prices: MockPriceFeed,
        notifier: Arc<dyn Notifier>,
        gate: RateGate,
    ) -> (Arc<Services>, Arc<PaperWallet>) {
        let prices: Arc<dyn PriceFeed> = Arc::new(prices);
        let wallet = Arc::new(PaperWallet::new(Arc::clone(&prices)));
        let services = Arc::new(Services {
            prices,
            holdings: wallet.clone(),
            executor: Arc::new(SwapExecutor::new(
                wallet.clone(),
                Arc::new(PaperSigner::default()),
                RetryPolicy::new(3, Duration::from_millis(10)),
            )),
            ledger: Arc::new(CapitalLedger::in_memory(dec!(10))),
            gate: Arc::new(gate),
            positions: Arc::new(PositionStore::in_memory()),
            trades: Arc::new(TradeHistory::in_memory()),
            notifier,
        });
        (services, wallet)
    }

    fn settings() -> EngineSettings {
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

    const TOKEN_A: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";
    const TOKEN_B: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    #[tokio::test(start_paused = true)]
    async fn test_resume_reclaims_and_reserves() {
        let (svc, wallet) = services(flat_prices(1.0), Arc::new(LogNotifier), 10);
        let position = Position::open(OpenRequest {
            id: Uuid::new_v4(),
            token_id: TOKEN_A.into(),
            entry_price: 1.0,
            holding: Holding { amount: 2_000_000, decimals: 6 },
            cost_usd: 4.0,
            buy_signature: "sig".into(),
            take_profit_pct: 40.0,
            stop_loss_pct: 20.0,
        });
        svc.positions.open(position.clone()).await.unwrap();
        wallet.credit(TOKEN_A, 2_000_000);

        let mut engine = Engine::new(svc.clone(), settings());
        assert_eq!(engine.resume().await, 1);
        assert_eq!(engine.active_monitors(), 1);
        assert!(svc.positions.is_claimed(TOKEN_A).await);
        assert_eq!(svc.ledger.available().await, dec!(6));

        let (_tx, rx) = mpsc::channel(4);
        let report = engine
            .run(rx, tokio::time::sleep(Duration::from_secs(3)))
            .await;
        assert_eq!(report, ShutdownReport { drained: 1, aborted: 0, flushed: true });
        assert!(svc.positions.get(position.id).await.unwrap().is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_opens_position_and_monitor() {
        let (svc, _wallet) = services(flat_prices(1.0), Arc::new(LogNotifier), 10);
        let engine = Engine::new(svc.clone(), settings());

        let (tx, rx) = mpsc::channel(4);
        tx.send(TOKEN_A.to_string()).await.unwrap();
        tx.send(TOKEN_A.to_string()).await.unwrap();
        let report = engine
            .run(rx, tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert_eq!(report.drained, 1);
        let open = svc.positions.open_positions().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].cost_usd, 8.0);
        assert_eq!(svc.gate.buys_today(), 1);
        assert_eq!(svc.ledger.snapshot().await.cycle_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_queue_without_monitors_stops() {
        let (svc, _wallet) = services(flat_prices(1.0), Arc::new(LogNotifier), 10);
        let engine = Engine::new(svc, settings());
        let (tx, rx) = mpsc::channel::<String>(1);
        drop(tx);

        let report = engine.run(rx, std::future::pending()).await;
        assert_eq!(report, ShutdownReport { drained: 0, aborted: 0, flushed: true });
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhausted_notifies_once() {
        let quota_messages = Arc::new(AtomicUsize::new(0));
        let counter = quota_messages.clone();
        let mut notifier = MockNotifier::new();
        notifier.expect_name().return_const("mock");
        notifier.expect_send().returning(move |msg| {
            if msg.starts_with("*Daily limit reached*") {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        let (svc, _wallet) = services(flat_prices(1.0), Arc::new(notifier), 1);
        let engine = Engine::new(svc.clone(), settings());

        let (tx, rx) = mpsc::channel(4);
        tx.send(TOKEN_A.to_string()).await.unwrap();
        tx.send(TOKEN_B.to_string()).await.unwrap();
        let _report = engine
            .run(rx, tokio::time::sleep(Duration::from_secs(30)))
            .await;

        assert_eq!(quota_messages.load(Ordering::SeqCst), 1);
        assert_eq!(svc.gate.buys_today(), 1);
        assert!(svc.positions.is_claimed(TOKEN_A).await);
        assert!(!svc.positions.is_claimed(TOKEN_B).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_daily_report_sent_on_quiet_rollover() {
        let reports = Arc::new(AtomicUsize::new(0));
        let counter = reports.clone();
        let mut notifier = MockNotifier::new();
        notifier.expect_name().return_const("mock");
        notifier.expect_send().returning(move |msg| {
            if msg.starts_with("*Daily Report*") {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        // Started two days ago: the window is already over, and no signal
        // or monitor event will ever wake the loop.
        let gate = RateGate::new_at(5, Local::now() - chrono::Duration::days(2));
        let (svc, _wallet) = services_with_gate(flat_prices(1.0), Arc::new(notifier), gate);
        let engine = Engine::new(svc.clone(), settings());

        let (_tx, rx) = mpsc::channel::<String>(4);
        let report = engine
            .run(rx, tokio::time::sleep(Duration::from_secs(3600)))
            .await;

        assert!(report.flushed);
        assert_eq!(reports.load(Ordering::SeqCst), 1);
        assert!(svc.gate.take_rollover().is_none());
    }
}
