//! Shared types for the SNIPER agent.
//!
//! These types form the data model used across all modules.
//! They are kept free of I/O so that gateway, storage, and engine
//! modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Wrapped SOL mint. Every buy spends it and every sell returns to it.
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Spot snapshot for a token from the price gateway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_usd: f64,
}

impl Quote {
    /// A quote is only actionable with a finite, positive price.
    pub fn is_usable(&self) -> bool {
        self.price_usd.is_finite() && self.price_usd > 0.0
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${:.10} | mcap ${:.0} | liq ${:.0}",
            self.price_usd, self.market_cap_usd, self.liquidity_usd,
        )
    }
}

/// Live wallet balance of one token, in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub amount: u64,
    pub decimals: u8,
}

impl Holding {
    pub fn empty(decimals: u8) -> Self {
        Self { amount: 0, decimals }
    }

    pub fn is_empty(&self) -> bool {
        self.amount == 0
    }

    /// Decimal-adjusted amount (whole tokens).
    pub fn ui_amount(&self) -> f64 {
        self.amount as f64 / 10f64.powi(self.decimals as i32)
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Lifecycle status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Open,
    ClosedTp,
    ClosedSl,
    ClosedNoBalance,
}

impl PositionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, PositionStatus::Open)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::ClosedTp => write!(f, "CLOSED_TP"),
            PositionStatus::ClosedSl => write!(f, "CLOSED_SL"),
            PositionStatus::ClosedNoBalance => write!(f, "CLOSED_NO_BALANCE"),
        }
    }
}

/// Why a position was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
}

impl ExitReason {
    /// Terminal position status for a confirmed exit with this reason.
    pub fn closed_status(&self) -> PositionStatus {
        match self {
            ExitReason::TakeProfit => PositionStatus::ClosedTp,
            ExitReason::StopLoss => PositionStatus::ClosedSl,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::TakeProfit => write!(f, "TAKE PROFIT"),
            ExitReason::StopLoss => write!(f, "STOP LOSS"),
        }
    }
}

/// One open (or archived) trade.
///
/// Thresholds are derived once in [`Position::open`] and have no setters;
/// status only moves forward through [`Position::close`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub token_id: String,
    /// Price per whole token at fill time (USD).
    pub entry_price: f64,
    /// Base units held when the position was opened.
    pub quantity: u64,
    pub decimals: u8,
    /// USD committed from the ledger for this buy.
    pub cost_usd: f64,
    pub buy_signature: String,
    pub opened_at: DateTime<Utc>,
    take_profit_price: f64,
    stop_loss_price: f64,
    status: PositionStatus,
    closed_at: Option<DateTime<Utc>>,
}

/// Inputs for opening a position after a confirmed buy.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub id: Uuid,
    pub token_id: String,
    pub entry_price: f64,
    pub holding: Holding,
    pub cost_usd: f64,
    pub buy_signature: String,
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

impl Position {
    /// Open a position; thresholds are `entry_price * (1 ± pct/100)`.
    pub fn open(req: OpenRequest) -> Self {
        let (take_profit_price, stop_loss_price) =
            exit_thresholds(req.entry_price, req.take_profit_pct, req.stop_loss_pct);
        Self {
            id: req.id,
            token_id: req.token_id,
            entry_price: req.entry_price,
            quantity: req.holding.amount,
            decimals: req.holding.decimals,
            cost_usd: req.cost_usd,
            buy_signature: req.buy_signature,
            opened_at: Utc::now(),
            take_profit_price,
            stop_loss_price,
            status: PositionStatus::Open,
            closed_at: None,
        }
    }

    pub fn take_profit_price(&self) -> f64 {
        self.take_profit_price
    }

    pub fn stop_loss_price(&self) -> f64 {
        self.stop_loss_price
    }

    pub fn status(&self) -> PositionStatus {
        self.status
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Transition OPEN → closed status. Returns false (and changes nothing)
    /// if the position is already closed or `status` is `Open`.
    pub fn close(&mut self, status: PositionStatus) -> bool {
        if !self.is_open() || status.is_open() {
            return false;
        }
        self.status = status;
        self.closed_at = Some(Utc::now());
        true
    }

    /// Short display name used in reports (`TKN_` + last six characters).
    pub fn display_name(&self) -> String {
        token_display_name(&self.token_id)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} entry=${:.10} TP=${:.10} SL=${:.10} qty={}",
            self.status,
            self.display_name(),
            self.entry_price,
            self.take_profit_price,
            self.stop_loss_price,
            self.quantity,
        )
    }
}

/// `(take_profit_price, stop_loss_price)` for an entry price and percentages.
pub fn exit_thresholds(entry_price: f64, take_profit_pct: f64, stop_loss_pct: f64) -> (f64, f64) {
    (
        entry_price * (1.0 + take_profit_pct / 100.0),
        entry_price * (1.0 - stop_loss_pct / 100.0),
    )
}

pub fn token_display_name(token_id: &str) -> String {
    let start = token_id.len().saturating_sub(6);
    format!("TKN_{}", token_id.get(start..).unwrap_or(token_id))
}

// ---------------------------------------------------------------------------
// Trade history
// ---------------------------------------------------------------------------

/// Buy side of a trade record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyInfo {
    pub name: String,
    pub market_cap_usd: f64,
    pub gross_usd: f64,
    pub net_usd: f64,
    pub fee_usd: f64,
    pub price_usd: f64,
    pub lamports: u64,
    pub signature: String,
    pub time: DateTime<Utc>,
}

/// Sell side of a trade record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellInfo {
    pub reason: ExitReason,
    pub price_usd: f64,
    pub quantity: u64,
    pub profit_usd: f64,
    pub profit_pct: f64,
    pub fee_usd: f64,
    pub signature: String,
    pub time: DateTime<Utc>,
}

/// Reporting-only history entry keyed by token id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub token_id: String,
    pub buy: BuyInfo,
    #[serde(default)]
    pub sell: Option<SellInfo>,
}

impl TradeRecord {
    pub fn is_closed(&self) -> bool {
        self.sell.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
