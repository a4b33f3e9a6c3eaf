//! Notification sink.
//!
//! Human-readable messages for every lifecycle transition: buy filled,
//! take-profit / stop-loss hit, quota exhausted, daily report.
//! Delivery runs in the background, is bounded by a timeout and never
//! reports failure to callers.

pub mod telegram;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::engine::ledger::LedgerSnapshot;
use crate::storage::DailySummary;
use crate::types::{token_display_name, BuyInfo, SellInfo};

pub use telegram::TelegramNotifier;

/// Upper bound on a single delivery.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport error: {0}")]
    Transport(String),

    #[error("notification rejected: HTTP {0}")]
    Rejected(u16),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;

    fn name(&self) -> &'static str;
}

/// Fallback sink when no chat is configured: messages go to the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        info!(target: "sniper::notify", "{message}");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Queue `message` for delivery without waiting on the sink.
pub fn deliver(notifier: &Arc<dyn Notifier>, message: impl Into<String>) {
    let notifier = Arc::clone(notifier);
    let message = message.into();
    tokio::spawn(async move { send_bounded(notifier.as_ref(), &message).await });
}

/// Send `message`, swallowing and logging any failure or timeout.
pub async fn send_bounded(notifier: &dyn Notifier, message: &str) {
    match tokio::time::timeout(DELIVERY_TIMEOUT, notifier.send(message)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(sink = notifier.name(), error = %e, "Notification failed"),
        Err(_) => warn!(sink = notifier.name(), "Notification timed out"),
    }
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

fn tx_link(signature: &str) -> String {
    let short: String = signature.chars().take(8).collect();
    format!("[{short}...](https://solscan.io/tx/{signature})")
}

pub fn format_buy(token_id: &str, buy: &BuyInfo) -> String {
    format!(
        "*BUY* {}\nCA: `{}`\nMCAP: ${:.0}\nNet: ${:.2}\nTX: {}",
        buy.name,
        token_id,
        buy.market_cap_usd,
        buy.net_usd,
        tx_link(&buy.signature),
    )
}

pub fn format_exit(token_id: &str, sell: &SellInfo) -> String {
    format!(
        "*{} HIT*\nCoin: {}\nCA: `{}`\nProfit: *${:+.2}* ({:+.1}%)\nTX: {}",
        sell.reason,
        token_display_name(token_id),
        token_id,
        sell.profit_usd,
        sell.profit_pct,
        tx_link(&sell.signature),
    )
}

pub fn format_no_balance(token_id: &str) -> String {
    format!(
        "*NO BALANCE*\nCoin: {}\nCA: `{}`\nPosition closed without a sell.",
        token_display_name(token_id),
        token_id,
    )
}

/// Retries exhausted for a buy or sell.
pub fn format_failure(token_id: &str, action: &str, error: &str) -> String {
    format!(
        "*{} FAILED*\nCoin: {}\nCA: `{}`\nError: {}",
        action.to_uppercase(),
        token_display_name(token_id),
        token_id,
        error,
    )
}

pub fn format_quota_exhausted(max_per_day: u32, until: DateTime<Local>) -> String {
    format!(
        "*Daily limit reached*\nBuys: {max_per_day}/{max_per_day}\nResumes: {}",
        until.format("%Y-%m-%d %H:%M"),
    )
}

pub fn format_daily_report(summary: &DailySummary, ledger: &LedgerSnapshot) -> String {
    format!(
        "*Daily Report*\nBuys: {}\nCloses: {} ({}W / {}L)\nRealised: ${:+.2}\nFees: ${:.2}\nBalance: ${:.2}\nCycle: {}",
        summary.buys,
        summary.closes,
        summary.wins,
        summary.losses,
        summary.realized_pnl_usd,
        summary.fees_usd,
        ledger.balance_usd,
        ledger.cycle_count,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExitReason;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_deliver_swallows_failures() {
        let mut mock = MockNotifier::new();
        mock.expect_name().return_const("mock");
        mock.expect_send()
            .times(1)
            .returning(|_| Err(NotifyError::Rejected(500)));
        send_bounded(&mock, "hello").await;
    }

    struct SlowSink {
        started: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for SlowSink {
        async fn send(&self, _message: &str) -> Result<(), NotifyError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deliver_does_not_wait_for_sink() {
        let slow = Arc::new(SlowSink { started: AtomicUsize::new(0) });
        let sink: Arc<dyn Notifier> = slow.clone();

        let before = tokio::time::Instant::now();
        deliver(&sink, "hello");
        assert_eq!(before.elapsed(), Duration::ZERO);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(slow.started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_format_exit() {
        let sell = SellInfo {
            reason: ExitReason::TakeProfit,
            price_usd: 1.41,
            quantity: 1_000_000,
            profit_usd: 3.28,
            profit_pct: 41.0,
            fee_usd: 0.11,
            signature: "5KtPn1abcdefgh".into(),
            time: Utc::now(),
        };
        let msg = format_exit("7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr", &sell);
        assert!(msg.starts_with("*TAKE PROFIT HIT*"));
        assert!(msg.contains("TKN_YmW2hr"));
        assert!(msg.contains("$+3.28"));
        assert!(msg.contains("(+41.0%)"));
        assert!(msg.contains("[5KtPn1ab...](https://solscan.io/tx/5KtPn1abcdefgh)"));
    }

    #[test]
    fn test_format_failure() {
        let msg = format_failure("7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr", "sell", "slippage");
        assert!(msg.starts_with("*SELL FAILED*"));
        assert!(msg.ends_with("Error: slippage"));
    }

    #[test]
    fn test_format_daily_report() {
        let summary = DailySummary {
            buys: 4,
            closes: 3,
            wins: 2,
            losses: 1,
            realized_pnl_usd: -0.5,
            fees_usd: 0.3,
        };
        let ledger = LedgerSnapshot {
            balance_usd: dec!(10.30),
            available_usd: dec!(2.00),
            reserved_usd: dec!(8.30),
            cycle_count: 12,
            realized_pnl_usd: dec!(-0.5),
            wins: 2,
            losses: 1,
            halted: false,
        };
        let msg = format_daily_report(&summary, &ledger);
        assert!(msg.contains("Closes: 3 (2W / 1L)"));
        assert!(msg.contains("Realised: $-0.50"));
        assert!(msg.contains("Balance: $10.30"));
        assert!(msg.contains("Cycle: 12"));
    }
}
