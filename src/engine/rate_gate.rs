//! Rate gate: caps acquisitions per local calendar day.
//!
//! The counter resets exactly once per day, on the first check at or after
//! the next local midnight. Every method has an `_at` variant taking an
//! explicit clock so the day boundary can be exercised in tests.

use chrono::{DateTime, Duration, Local, TimeZone};
use std::sync::Mutex;
use tracing::info;

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allowed,
    /// A new day started on this check; the gate is open again.
    Reset {
        previous_buys: u32,
        /// Start of the window that just ended.
        window_start: DateTime<Local>,
    },
    /// Quota used up until `until`.
    Exhausted { until: DateTime<Local> },
}

/// A finished daily window, kept until the engine reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRollover {
    pub previous_buys: u32,
    pub window_start: DateTime<Local>,
    pub window_end: DateTime<Local>,
}

impl GateDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, GateDecision::Exhausted { .. })
    }
}

#[derive(Debug)]
struct GateState {
    buys_today: u32,
    window_start: DateTime<Local>,
    next_reset: DateTime<Local>,
    rollover: Option<DayRollover>,
}

#[derive(Debug)]
pub struct RateGate {
    max_per_day: u32,
    state: Mutex<GateState>,
}

impl RateGate {
    pub fn new(max_per_day: u32) -> Self {
        Self::new_at(max_per_day, Local::now())
    }

    pub fn new_at(max_per_day: u32, now: DateTime<Local>) -> Self {
        Self {
            max_per_day,
            state: Mutex::new(GateState {
                buys_today: 0,
                window_start: now,
                next_reset: next_local_midnight(now),
                rollover: None,
            }),
        }
    }

    pub fn max_per_day(&self) -> u32 {
        self.max_per_day
    }

    pub fn check(&self) -> GateDecision {
        self.check_at(Local::now())
    }

    pub fn check_at(&self, now: DateTime<Local>) -> GateDecision {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if now >= state.next_reset {
            let previous_buys = state.buys_today;
            let window_start = state.window_start;
            state.rollover = Some(DayRollover {
                previous_buys,
                window_start,
                window_end: state.next_reset,
            });
            state.buys_today = 0;
            state.window_start = state.next_reset;
            state.next_reset = next_local_midnight(now);
            info!(
                previous_buys,
                next_reset = %state.next_reset,
                "Daily buy quota reset"
            );
            return GateDecision::Reset {
                previous_buys,
                window_start,
            };
        }

        if state.buys_today >= self.max_per_day {
            GateDecision::Exhausted {
                until: state.next_reset,
            }
        } else {
            GateDecision::Allowed
        }
    }

    pub fn allow(&self) -> bool {
        self.check().is_allowed()
    }

    pub fn allow_at(&self, now: DateTime<Local>) -> bool {
        self.check_at(now).is_allowed()
    }

    /// Count a durably opened position against today's quota.
    pub fn record_buy(&self) -> u32 {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.buys_today += 1;
        state.buys_today
    }

    /// Take the most recent unreported day rollover, if any.
    pub fn take_rollover(&self) -> Option<DayRollover> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).rollover.take()
    }

    pub fn buys_today(&self) -> u32 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).buys_today
    }

    pub fn next_reset(&self) -> DateTime<Local> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).next_reset
    }
}

/// First instant of the next local calendar day after `now`.
///
/// If midnight does not exist locally (a DST jump at midnight) the first
/// valid instant after it is used.
pub fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    let Some(midnight) = now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return now + Duration::hours(24);
    };
    (0..=2)
        .find_map(|h| Local.from_local_datetime(&(midnight + Duration::hours(h))).earliest())
        .unwrap_or_else(|| now + Duration::hours(24))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
