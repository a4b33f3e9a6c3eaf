//! Exit monitor: one polling task per open position.
//!
//! ```text
//! WATCHING ──price ≥ TP──▶ CLOSING_TP ──sell ok──▶ CLOSED
//!    │     ──price ≤ SL──▶ CLOSING_SL ──sell ok──▶ CLOSED
//!    │                        └──sell failed──▶ WATCHING
//!    └──live balance 0──▶ ABORTED_NO_BALANCE
//! ```
//!
//! Every poll reads price first, then live holdings. A failed read of
//! either is retried on the next poll and never treated as an exit signal.
//! Shutdown is only observed between polls, never while a sell is in flight.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::executor::SwapError;
use super::ledger::{to_usd, LedgerError};
use super::Services;
use crate::config::{MonitorConfig, TradingConfig};
use crate::gateway::OrderRequest;
use crate::notify::{self, format_exit, format_failure, format_no_balance};
use crate::types::{ExitReason, Holding, Position, PositionStatus, SellInfo};

/// Where a monitor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Watching,
    Closing(ExitReason),
    AbortedNoBalance,
    Closed,
}

/// How a monitor task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorExit {
    Closed {
        reason: ExitReason,
        profit_usd: f64,
        profit_pct: f64,
        signature: String,
    },
    AbortedNoBalance,
    /// Shutdown requested; the position stays open for the next start.
    Stopped,
}

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub log_every_polls: u32,
    pub sell_fee_pct: f64,
}

impl MonitorSettings {
    pub fn from_config(monitor: &MonitorConfig, trading: &TradingConfig) -> Self {
        Self {
            poll_interval: monitor.poll_interval(),
            log_every_polls: monitor.log_every_polls.max(1),
            sell_fee_pct: trading.sell_fee_pct,
        }
    }
}

/// Exit signal for `price`. Take-profit wins when both thresholds match.
pub fn evaluate(price: f64, position: &Position) -> Option<ExitReason> {
    if price >= position.take_profit_price() {
        Some(ExitReason::TakeProfit)
    } else if price <= position.stop_loss_price() {
        Some(ExitReason::StopLoss)
    } else {
        None
    }
}

/// Realised `(profit_usd, profit_pct)` for selling `quantity` whole tokens.
pub fn realized_profit(entry_price: f64, exit_price: f64, quantity: f64) -> (f64, f64) {
    let profit_usd = (exit_price - entry_price) * quantity;
    let profit_pct = (exit_price / entry_price - 1.0) * 100.0;
    (profit_usd, profit_pct)
}

pub struct ExitMonitor {
    services: Arc<Services>,
    settings: MonitorSettings,
    position: Position,
    state: MonitorState,
    shutdown: watch::Receiver<bool>,
}

impl ExitMonitor {
    pub fn new(
        services: Arc<Services>,
        settings: MonitorSettings,
        position: Position,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            services,
            settings,
            position,
            state: MonitorState::Watching,
            shutdown,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    /// Poll until the position is closed, aborted, or shutdown is requested.
    pub async fn run(mut self) -> MonitorExit {
        let token = self.position.token_id.clone();
        info!(token = %token, position = %self.position, "Monitor started");
        let mut polls: u64 = 0;

        loop {
            if self.stop_requested() {
                info!(token = %token, "Monitor stopping for shutdown, position stays open");
                return MonitorExit::Stopped;
            }
            polls += 1;

            let quote = match self.services.prices.quote(&token).await {
                Ok(q) if q.is_usable() => q,
                Ok(q) => {
                    debug!(token = %token, price = q.price_usd, "Unusable price, waiting");
                    if self.pause().await {
                        return MonitorExit::Stopped;
                    }
                    continue;
                }
                Err(e) => {
                    debug!(token = %token, error = %e, "Price unavailable, waiting");
                    if self.pause().await {
                        return MonitorExit::Stopped;
                    }
                    continue;
                }
            };

            let holding = match self.services.holdings.holding(&token).await {
                Ok(h) => h,
                Err(e) => {
                    warn!(token = %token, error = %e, "Holdings read failed, waiting");
                    if self.pause().await {
                        return MonitorExit::Stopped;
                    }
                    continue;
                }
            };

            if holding.is_empty() {
                return self.abort_no_balance().await;
            }

            let price = quote.price_usd;
            if polls % u64::from(self.settings.log_every_polls) == 0 {
                let (_, pct) = realized_profit(self.position.entry_price, price, 1.0);
                info!(
                    token = %self.position.display_name(),
                    price = format!("${price:.10}"),
                    change = format!("{pct:+.2}%"),
                    tp = format!("${:.10}", self.position.take_profit_price()),
                    sl = format!("${:.10}", self.position.stop_loss_price()),
                    polls,
                    "Watching"
                );
            }

            if let Some(reason) = evaluate(price, &self.position) {
                self.transition(MonitorState::Closing(reason));
                match self.close(reason, price, holding).await {
                    Ok(exit) => return exit,
                    Err(e) => {
                        warn!(token = %token, reason = %reason, error = %e, "Exit sell failed, still watching");
                        notify::deliver(
                            &self.services.notifier,
                            format_failure(&token, "sell", &e.to_string()),
                        );
                        self.transition(MonitorState::Watching);
                    }
                }
            }

            if self.pause().await {
                return MonitorExit::Stopped;
            }
        }
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            debug!(token = %self.position.token_id, from = ?self.state, to = ?next, "Monitor transition");
            self.state = next;
        }
    }

    fn stop_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep one poll interval. Returns true if shutdown was requested meanwhile.
    async fn pause(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.settings.poll_interval) => false,
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }

    async fn abort_no_balance(mut self) -> MonitorExit {
        let s = Arc::clone(&self.services);
        let token = self.position.token_id.clone();
        warn!(token = %token, "Live balance is zero, closing without a sell");
        self.transition(MonitorState::AbortedNoBalance);

        if let Err(e) = s.positions.close(self.position.id, PositionStatus::ClosedNoBalance).await {
            error!(token = %token, error = %e, "Position close not persisted");
        }
        s.ledger.release(self.position.id).await;
        notify::deliver(&s.notifier, format_no_balance(&token));
        MonitorExit::AbortedNoBalance
    }

    /// Sell the full live balance and settle the position.
    async fn close(
        &mut self,
        reason: ExitReason,
        price: f64,
        holding: Holding,
    ) -> Result<MonitorExit, SwapError> {
        let s = Arc::clone(&self.services);
        let token = self.position.token_id.clone();
        info!(
            token = %token,
            reason = %reason,
            price = format!("${price:.10}"),
            amount = holding.amount,
            "Exit triggered, selling live balance"
        );

        let request = OrderRequest::sell(&token, holding.amount, &s.executor.taker());
        let outcome = s.executor.execute(&request).await?;

        let quantity = holding.ui_amount();
        let (profit_usd, profit_pct) = realized_profit(self.position.entry_price, price, quantity);
        let fee_usd = price * quantity * self.settings.sell_fee_pct / 100.0;

        self.settle_ledger(to_usd(profit_usd)).await;

        let sell = SellInfo {
            reason,
            price_usd: price,
            quantity: holding.amount,
            profit_usd,
            profit_pct,
            fee_usd,
            signature: outcome.signature.clone(),
            time: Utc::now(),
        };
        if let Err(e) = s.trades.record_sell(&token, sell.clone()).await {
            warn!(token = %token, error = %e, "Failed to record sell in trade history");
        }
        if let Err(e) = s.positions.close(self.position.id, reason.closed_status()).await {
            error!(token = %token, error = %e, "Position close not persisted");
        }
        self.transition(MonitorState::Closed);

        info!(
            token = %self.position.display_name(),
            reason = %reason,
            profit = format!("${profit_usd:+.2}"),
            pct = format!("{profit_pct:+.1}%"),
            signature = %outcome.signature,
            "Position closed"
        );
        notify::deliver(&s.notifier, format_exit(&token, &sell));

        Ok(MonitorExit::Closed {
            reason,
            profit_usd,
            profit_pct,
            signature: outcome.signature,
        })
    }

    /// Apply the confirmed sell's P&L to the ledger. The sell already
    /// happened, so this keeps retrying until the update is durable.
    async fn settle_ledger(&self, delta: rust_decimal::Decimal) {
        let s = &self.services;
        let retry = s.executor.retry_policy();
        let id = self.position.id;
        let mut attempt: u32 = 0;

        loop {
            match s.ledger.apply_delta(id, delta).await {
                Ok(_) => return,
                Err(LedgerError::Persistence(e)) => {
                    // Applied in memory; only the write is outstanding.
                    error!(id = %id, error = %e, "Ledger delta not persisted, retrying flush");
                    loop {
                        attempt = (attempt + 1).min(retry.max_attempts);
                        tokio::time::sleep(retry.delay_for(attempt)).await;
                        match s.ledger.flush().await {
                            Ok(()) => return,
                            Err(e) => warn!(id = %id, error = %e, "Ledger flush still failing"),
                        }
                    }
                }
                Err(LedgerError::Halted(e)) => {
                    warn!(id = %id, error = %e, "Ledger halted, delta deferred");
                    attempt = (attempt + 1).min(retry.max_attempts);
                    tokio::time::sleep(retry.delay_for(attempt)).await;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
