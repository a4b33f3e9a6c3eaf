//! Dashboard API route handlers.
//!
//! All endpoints return JSON. Reads go straight to the live ledger, gate
//! and stores; nothing is cached here.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::engine::Services;
use crate::signals::{SignalSender, SubmitOutcome};
use crate::types::{Position, TradeRecord};

/// Most recent entries returned by the list endpoints.
const LIST_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct DashboardState {
    pub agent_name: String,
    pub dry_run: bool,
    pub services: Arc<Services>,
    pub signals: SignalSender,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(agent_name: String, dry_run: bool, services: Arc<Services>, signals: SignalSender) -> Self {
        Self {
            agent_name,
            dry_run,
            services,
            signals,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub agent: String,
    pub mode: &'static str,
    pub balance_usd: Decimal,
    pub available_usd: Decimal,
    pub reserved_usd: Decimal,
    pub realized_pnl_usd: Decimal,
    pub cycle_count: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub ledger_halted: bool,
    pub buys_today: u32,
    pub max_buys_per_day: u32,
    pub next_reset: String,
    pub open_positions: usize,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionsResponse {
    pub open: Vec<Position>,
    pub closed: Vec<Position>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalRequest {
    pub token_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalResponse {
    pub token_id: String,
    pub outcome: &'static str,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let s = &state.services;
    let ledger = s.ledger.snapshot().await;
    let closed = ledger.wins + ledger.losses;
    let win_rate = if closed > 0 {
        ledger.wins as f64 / closed as f64
    } else {
        0.0
    };

    Json(StatusResponse {
        agent: state.agent_name.clone(),
        mode: if state.dry_run { "paper" } else { "live" },
        balance_usd: ledger.balance_usd,
        available_usd: ledger.available_usd,
        reserved_usd: ledger.reserved_usd,
        realized_pnl_usd: ledger.realized_pnl_usd,
        cycle_count: ledger.cycle_count,
        wins: ledger.wins,
        losses: ledger.losses,
        win_rate,
        ledger_halted: ledger.halted,
        buys_today: s.gate.buys_today(),
        max_buys_per_day: s.gate.max_per_day(),
        next_reset: s.gate.next_reset().to_rfc3339(),
        open_positions: s.positions.open_positions().await.len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/positions
pub async fn get_positions(State(state): State<AppState>) -> Json<PositionsResponse> {
    let positions = &state.services.positions;
    let mut closed = positions.closed_positions().await;
    let start = closed.len().saturating_sub(LIST_LIMIT);
    Json(PositionsResponse {
        open: positions.open_positions().await,
        closed: closed.split_off(start),
    })
}

/// GET /api/trades
pub async fn get_trades(State(state): State<AppState>) -> Json<Vec<TradeRecord>> {
    let mut trades = state.services.trades.all().await;
    let start = trades.len().saturating_sub(LIST_LIMIT);
    Json(trades.split_off(start))
}

/// POST /api/signals
pub async fn post_signal(
    State(state): State<AppState>,
    Json(req): Json<SignalRequest>,
) -> (StatusCode, Json<SignalResponse>) {
    let outcome = state.signals.submit(&req.token_id).await;
    let (status, label) = match outcome {
        SubmitOutcome::Queued => (StatusCode::ACCEPTED, "queued"),
        SubmitOutcome::Duplicate => (StatusCode::CONFLICT, "duplicate"),
        SubmitOutcome::Invalid => (StatusCode::BAD_REQUEST, "invalid"),
        SubmitOutcome::Closed => (StatusCode::SERVICE_UNAVAILABLE, "closed"),
    };
    (
        status,
        Json(SignalResponse {
            token_id: req.token_id.trim().to_string(),
            outcome: label,
        }),
    )
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
