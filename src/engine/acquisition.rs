//! Acquisition controller: token signal → sized, confirmed buy → open position.
//!
//! Steps for one signal:
//! 1. duplicate guard (token already taken in this process)
//! 2. daily quota
//! 3. token + SOL quotes (no buy on missing market data)
//! 4. sizing from *available* capital, reserved under the new position id
//! 5. swap with bounded retry
//! 6. settle delay, then live holdings
//! 7. trade record + durable position open
//! 8. quota and cycle counters, only after the position is persisted

use chrono::{DateTime, Local, Utc};
use rust_decimal::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::SwapError;
use super::ledger::to_usd;
use super::rate_gate::GateDecision;
use super::Services;
use crate::config::TradingConfig;
use crate::gateway::{GatewayError, OrderRequest};
use crate::notify::{self, format_buy};
use crate::storage::StorageError;
use crate::types::{
    token_display_name, BuyInfo, Holding, OpenRequest, Position, LAMPORTS_PER_SOL, SOL_MINT,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("duplicate signal for {0}")]
    DuplicateSignal(String),

    #[error("daily quota exhausted until {until}")]
    QuotaExhausted { until: DateTime<Local> },

    #[error("no usable market data: {0}")]
    NoMarketData(GatewayError),

    #[error("computed buy size rejected (available ${available})")]
    SizingRejected { available: Decimal },

    #[error(transparent)]
    QuoteOrSwapFailed(#[from] SwapError),

    /// The buy filled and the position is live in memory, but the store
    /// write failed. Its monitor must still run.
    #[error("position {} opened but not persisted: {source}", .position.id)]
    Persistence {
        position: Box<Position>,
        source: StorageError,
    },
}

// ---------------------------------------------------------------------------
// Sizing
// ---------------------------------------------------------------------------

/// Buy size derived from available capital.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuySizing {
    /// Capital committed (gross, before fee).
    pub spend_usd: f64,
    pub fee_usd: f64,
    pub net_usd: f64,
    /// Net spend in lamports of SOL.
    pub lamports: u64,
}

/// `spend = available × fraction`, less the buy fee, converted to lamports
/// at `sol_price_usd`. Never exceeds `available_usd`.
pub fn size_buy(available_usd: f64, sizing_fraction: f64, buy_fee_pct: f64, sol_price_usd: f64) -> BuySizing {
    let valid = available_usd.is_finite()
        && available_usd > 0.0
        && sol_price_usd.is_finite()
        && sol_price_usd > 0.0;
    if !valid {
        return BuySizing {
            spend_usd: 0.0,
            fee_usd: 0.0,
            net_usd: 0.0,
            lamports: 0,
        };
    }

    let fraction = sizing_fraction.clamp(0.0, 1.0);
    let spend_usd = available_usd * fraction;
    let fee_usd = spend_usd * (buy_fee_pct / 100.0);
    let net_usd = spend_usd - fee_usd;
    let lamports = (net_usd / sol_price_usd * LAMPORTS_PER_SOL).floor().max(0.0) as u64;

    BuySizing {
        spend_usd,
        fee_usd,
        net_usd,
        lamports,
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub sizing_fraction: f64,
    pub buy_fee_pct: f64,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
    pub settle_delay: Duration,
}

impl From<&TradingConfig> for AcquisitionSettings {
    fn from(cfg: &TradingConfig) -> Self {
        Self {
            sizing_fraction: cfg.sizing_fraction,
            buy_fee_pct: cfg.buy_fee_pct,
            take_profit_pct: cfg.take_profit_pct,
            stop_loss_pct: cfg.stop_loss_pct(),
            settle_delay: cfg.settle_delay(),
        }
    }
}

pub struct AcquisitionController {
    services: Arc<Services>,
    settings: AcquisitionSettings,
}

impl AcquisitionController {
    pub fn new(services: Arc<Services>, settings: AcquisitionSettings) -> Self {
        Self { services, settings }
    }

    /// Turn a token signal into an open position.
    pub async fn acquire(&self, token_id: &str) -> Result<Position, AcquireError> {
        let s = &self.services;

        if s.positions.is_claimed(token_id).await {
            return Err(AcquireError::DuplicateSignal(token_id.to_string()));
        }
        if let GateDecision::Exhausted { until } = s.gate.check() {
            return Err(AcquireError::QuotaExhausted { until });
        }
        // From here on the token stays claimed whatever the outcome.
        if !s.positions.claim(token_id).await {
            return Err(AcquireError::DuplicateSignal(token_id.to_string()));
        }

        let quote = s.prices.quote(token_id).await.map_err(AcquireError::NoMarketData)?;
        if !quote.is_usable() {
            return Err(AcquireError::NoMarketData(GatewayError::InvalidMarketData(format!(
                "price {} for {token_id}",
                quote.price_usd
            ))));
        }
        let sol = s.prices.quote(SOL_MINT).await.map_err(AcquireError::NoMarketData)?;
        if !sol.is_usable() {
            return Err(AcquireError::NoMarketData(GatewayError::InvalidMarketData(format!(
                "SOL price {}",
                sol.price_usd
            ))));
        }

        let available = s.ledger.available().await;
        let sizing = size_buy(
            available.to_f64().unwrap_or(0.0),
            self.settings.sizing_fraction,
            self.settings.buy_fee_pct,
            sol.price_usd,
        );
        let cost = to_usd(sizing.spend_usd);
        let id = Uuid::new_v4();
        if sizing.lamports == 0 || !s.ledger.reserve(id, cost).await {
            info!(token = %token_id, available = format!("${:.2}", available), "Buy size rejected");
            return Err(AcquireError::SizingRejected { available });
        }

        info!(
            token = %token_id,
            quote = %quote,
            available = format!("${:.2}", available),
            spend = format!("${:.2}", sizing.spend_usd),
            sol_price = format!("${:.2}", sol.price_usd),
            lamports = sizing.lamports,
            "Compound buy"
        );

        let request = OrderRequest::buy(token_id, sizing.lamports, &s.executor.taker());
        let outcome = match s.executor.execute(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                s.ledger.release(id).await;
                error!(token = %token_id, error = %e, "Buy failed");
                return Err(e.into());
            }
        };

        tokio::time::sleep(self.settings.settle_delay).await;
        let holding = self.read_holding(token_id).await;

        let buy = BuyInfo {
            name: token_display_name(token_id),
            market_cap_usd: quote.market_cap_usd,
            gross_usd: sizing.spend_usd,
            net_usd: sizing.net_usd,
            fee_usd: sizing.fee_usd,
            price_usd: quote.price_usd,
            lamports: sizing.lamports,
            signature: outcome.signature.clone(),
            time: Utc::now(),
        };
        if let Err(e) = s.trades.record_buy(token_id, buy.clone()).await {
            warn!(token = %token_id, error = %e, "Failed to record buy in trade history");
        }

        let position = Position::open(OpenRequest {
            id,
            token_id: token_id.to_string(),
            entry_price: quote.price_usd,
            holding,
            cost_usd: cost.to_f64().unwrap_or(sizing.spend_usd),
            buy_signature: outcome.signature,
            take_profit_pct: self.settings.take_profit_pct,
            stop_loss_pct: self.settings.stop_loss_pct,
        });

        if let Err(source) = s.positions.open(position.clone()).await {
            error!(token = %token_id, error = %source, "Position not persisted");
            return Err(AcquireError::Persistence {
                position: Box::new(position),
                source,
            });
        }

        let buys_today = s.gate.record_buy();
        let cycle = match s.ledger.record_open().await {
            Ok(cycle) => cycle,
            Err(e) => {
                error!(error = %e, "Cycle count not persisted");
                s.ledger.snapshot().await.cycle_count
            }
        };

        info!(
            token = %token_id,
            position = %position,
            buys_today,
            cycle,
            "Position opened"
        );
        notify::deliver(&s.notifier, format_buy(token_id, &buy));

        Ok(position)
    }

    /// Live balance after the buy. A read that keeps failing opens the
    /// position with an unknown (zero) quantity; the monitor re-reads live
    /// holdings on every poll anyway.
    async fn read_holding(&self, token_id: &str) -> Holding {
        let s = &self.services;
        let retry = s.executor.retry_policy();
        for attempt in 1..=retry.max_attempts {
            match s.holdings.holding(token_id).await {
                Ok(holding) => {
                    if holding.is_empty() {
                        warn!(token = %token_id, "No tokens received");
                    }
                    return holding;
                }
                Err(e) => {
                    warn!(token = %token_id, attempt, error = %e, "Holdings read failed");
                    if attempt < retry.max_attempts {
                        tokio::time::sleep(retry.delay_for(attempt)).await;
                    }
                }
            }
        }
        Holding::empty(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
