//! Trade history: append-only buy/sell records for reporting.
//!
//! Not authoritative for position state; a failed write here is logged
//! by callers and never blocks trading.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::{load_json, save_json, StorageError};
use crate::types::{BuyInfo, SellInfo, TradeRecord};

/// Activity between two gate resets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailySummary {
    pub buys: usize,
    pub closes: usize,
    pub wins: usize,
    pub losses: usize,
    pub realized_pnl_usd: f64,
    pub fees_usd: f64,
}

pub struct TradeHistory {
    records: Mutex<Vec<TradeRecord>>,
    path: Option<PathBuf>,
}

impl TradeHistory {
    pub fn in_memory() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            path: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, StorageError> {
        let records: Vec<TradeRecord> = load_json(path)?.unwrap_or_default();
        info!(path = %path.display(), records = records.len(), "Trade history loaded");
        Ok(Self {
            records: Mutex::new(records),
            path: Some(path.to_path_buf()),
        })
    }

    pub async fn record_buy(&self, token_id: &str, buy: BuyInfo) -> Result<(), StorageError> {
        let mut records = self.records.lock().await;
        records.push(TradeRecord {
            token_id: token_id.to_string(),
            buy,
            sell: None,
        });
        self.persist(&records)
    }

    /// Attach the sell leg to the most recent open record for `token_id`.
    /// Returns `Ok(false)` if there is no open record to close.
    pub async fn record_sell(&self, token_id: &str, sell: SellInfo) -> Result<bool, StorageError> {
        let mut records = self.records.lock().await;
        let Some(record) = records
            .iter_mut()
            .rev()
            .find(|r| r.token_id == token_id && r.sell.is_none())
        else {
            warn!(token = %token_id, "No open trade record to attach sell to");
            return Ok(false);
        };
        record.sell = Some(sell);
        self.persist(&records)?;
        Ok(true)
    }

    pub async fn all(&self) -> Vec<TradeRecord> {
        self.records.lock().await.clone()
    }

    /// Summarise buys and closes at or after `since`.
    pub async fn summary_since(&self, since: DateTime<Utc>) -> DailySummary {
        let records = self.records.lock().await;
        let mut summary = DailySummary::default();
        for record in records.iter() {
            if record.buy.time >= since {
                summary.buys += 1;
                summary.fees_usd += record.buy.fee_usd;
            }
            if let Some(sell) = record.sell.as_ref().filter(|s| s.time >= since) {
                summary.closes += 1;
                summary.realized_pnl_usd += sell.profit_usd;
                summary.fees_usd += sell.fee_usd;
                if sell.profit_usd >= 0.0 {
                    summary.wins += 1;
                } else {
                    summary.losses += 1;
                }
            }
        }
        summary
    }

    pub async fn flush(&self) -> Result<(), StorageError> {
        let records = self.records.lock().await;
        self.persist(&records)
    }

    fn persist(&self, records: &[TradeRecord]) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => save_json(records, path),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::temp_dir;
    use crate::types::ExitReason;
    use chrono::Duration;

    fn buy(time: DateTime<Utc>) -> BuyInfo {
        BuyInfo {
            name: "TKN_abcdef".into(),
            market_cap_usd: 25_000.0,
            gross_usd: 8.64,
            net_usd: 8.55,
            fee_usd: 0.09,
            price_usd: 0.001,
            lamports: 57_000_000,
            signature: "buy-sig".into(),
            time,
        }
    }

    fn sell(profit: f64, time: DateTime<Utc>) -> SellInfo {
        SellInfo {
            reason: if profit >= 0.0 { ExitReason::TakeProfit } else { ExitReason::StopLoss },
            price_usd: 0.0014,
            quantity: 1_000,
            profit_usd: profit,
            profit_pct: 40.0,
            fee_usd: 0.1,
            signature: "sell-sig".into(),
            time,
        }
    }

    #[tokio::test]
    async fn test_sell_attaches_to_open_record() {
        let history = TradeHistory::in_memory();
        history.record_buy("A", buy(Utc::now())).await.unwrap();
        assert!(history.record_sell("A", sell(1.0, Utc::now())).await.unwrap());
        assert!(!history.record_sell("A", sell(1.0, Utc::now())).await.unwrap());

        let all = history.all().await;
        assert_eq!(all.len(), 1);
        assert!(all[0].is_closed());
    }

    #[tokio::test]
    async fn test_summary_window() {
        let history = TradeHistory::in_memory();
        let now = Utc::now();
        let yesterday = now - Duration::days(1);

        history.record_buy("OLD", buy(yesterday)).await.unwrap();
        history.record_sell("OLD", sell(3.0, yesterday)).await.unwrap();
        history.record_buy("A", buy(now)).await.unwrap();
        history.record_sell("A", sell(2.0, now)).await.unwrap();
        history.record_buy("B", buy(now)).await.unwrap();
        history.record_sell("B", sell(-0.5, now)).await.unwrap();
        history.record_buy("C", buy(now)).await.unwrap();

        let s = history.summary_since(now - Duration::hours(1)).await;
        assert_eq!(s.buys, 3);
        assert_eq!(s.closes, 2);
        assert_eq!(s.wins, 1);
        assert_eq!(s.losses, 1);
        assert!((s.realized_pnl_usd - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_persists_across_reload() {
        let path = temp_dir().join(crate::storage::TRADES_FILE);
        let history = TradeHistory::load(&path).unwrap();
        history.record_buy("A", buy(Utc::now())).await.unwrap();

        let reloaded = TradeHistory::load(&path).unwrap();
        let all = reloaded.all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].buy.lamports, 57_000_000);
        assert!(!all[0].is_closed());
    }
}
