//! Signal → buy → monitor → exit → ledger, through the public engine API.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

use crate::mock_gateway::ScriptedGateway;
use crate::{services, settings, temp_dir, SOL_PRICE};
use sniper::engine::acquisition::{AcquireError, AcquisitionController};
use sniper::engine::ledger::CapitalLedger;
use sniper::engine::Engine;
use sniper::storage::{self, PositionStore};
use sniper::types::{ExitReason, PositionStatus};

const TOKEN_A: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";
const TOKEN_B: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

fn queue(tokens: &[&str]) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    for token in tokens {
        tx.try_send(token.to_string()).unwrap();
    }
    rx
}

#[tokio::test(start_paused = true)]
async fn test_take_profit_cycle() {
    let gateway = Arc::new(ScriptedGateway::new(SOL_PRICE));
    // Entry quote, then one price per poll.
    gateway.script_prices(TOKEN_A, &[1.00, 0.95, 1.10, 1.41]);
    gateway.set_fill(TOKEN_A, 8_000_000);
    let svc = services(&gateway, dec!(10), 50, None);

    let report = Engine::new(svc.clone(), settings())
        .run(queue(&[TOKEN_A]), std::future::pending())
        .await;
    assert_eq!(report.drained, 0);
    assert!(report.flushed);

    let buys = gateway.buys();
    assert_eq!(buys.len(), 1);
    assert!((buys[0].amount as i64 - 79_200_000).abs() <= 1);

    let sells = gateway.sells();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].amount, 8_000_000);
    assert_eq!(gateway.balance(TOKEN_A), 0);

    let closed = svc.positions.closed_positions().await;
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].status(), PositionStatus::ClosedTp);
    assert!((closed[0].take_profit_price() - 1.40).abs() < 1e-9);
    assert!((closed[0].stop_loss_price() - 0.80).abs() < 1e-9);

    let ledger = svc.ledger.snapshot().await;
    assert_eq!(ledger.balance_usd, dec!(13.28));
    assert_eq!(ledger.reserved_usd, Decimal::ZERO);
    assert_eq!(ledger.cycle_count, 1);
    assert_eq!(ledger.wins, 1);
    assert_eq!(svc.gate.buys_today(), 1);

    let trades = svc.trades.all().await;
    assert_eq!(trades.len(), 1);
    let sell = trades[0].sell.as_ref().unwrap();
    assert_eq!(sell.reason, ExitReason::TakeProfit);
    assert!((sell.profit_pct - 41.0).abs() < 1e-6);
    assert!((sell.profit_usd - 3.28).abs() < 1e-6);
    assert!((trades[0].buy.net_usd - 7.92).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_buy_failures_leave_no_position() {
    let gateway = Arc::new(ScriptedGateway::new(SOL_PRICE));
    gateway.script_prices(TOKEN_A, &[1.0]);
    gateway.fail_next_submits(3);
    let svc = services(&gateway, dec!(10), 50, None);

    let controller = AcquisitionController::new(svc.clone(), settings().acquisition);
    let err = controller.acquire(TOKEN_A).await.unwrap_err();

    assert!(matches!(err, AcquireError::QuoteOrSwapFailed(_)));
    assert_eq!(gateway.submit_calls(), 3);
    assert!(gateway.buys().is_empty());
    assert!(svc.positions.open_positions().await.is_empty());
    assert_eq!(svc.gate.buys_today(), 0);
    assert_eq!(svc.ledger.available().await, dec!(10));
    assert_eq!(svc.ledger.snapshot().await.cycle_count, 0);

    // The token stays claimed after a failed attempt.
    assert!(matches!(
        controller.acquire(TOKEN_A).await,
        Err(AcquireError::DuplicateSignal(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_repeated_signal_opens_one_position() {
    let gateway = Arc::new(ScriptedGateway::new(SOL_PRICE));
    gateway.script_prices(TOKEN_A, &[1.0, 1.0, 1.0, 1.5]);
    let svc = services(&gateway, dec!(10), 50, None);

    Engine::new(svc.clone(), settings())
        .run(queue(&[TOKEN_A, TOKEN_A, TOKEN_A]), std::future::pending())
        .await;

    assert_eq!(gateway.buys().len(), 1);
    assert_eq!(svc.positions.closed_positions().await.len(), 1);
    assert_eq!(svc.gate.buys_today(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_zero_balance_aborts_without_sell() {
    let gateway = Arc::new(ScriptedGateway::new(SOL_PRICE));
    gateway.script_prices(TOKEN_A, &[1.0, 2.0]);
    gateway.set_fill(TOKEN_A, 0);
    let svc = services(&gateway, dec!(10), 50, None);

    Engine::new(svc.clone(), settings())
        .run(queue(&[TOKEN_A]), std::future::pending())
        .await;

    assert_eq!(gateway.buys().len(), 1);
    // Only the buy was ever submitted.
    assert_eq!(gateway.submit_calls(), 1);
    assert!(gateway.sells().is_empty());

    let closed = svc.positions.closed_positions().await;
    assert_eq!(closed[0].status(), PositionStatus::ClosedNoBalance);
    assert_eq!(closed[0].quantity, 0);
    let ledger = svc.ledger.snapshot().await;
    assert_eq!(ledger.balance_usd, dec!(10));
    assert_eq!(ledger.reserved_usd, Decimal::ZERO);
    assert_eq!(ledger.wins + ledger.losses, 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_positions_share_reserved_capital() {
    let gateway = Arc::new(ScriptedGateway::new(SOL_PRICE));
    gateway.script_prices(TOKEN_A, &[1.0, 1.0, 1.0, 1.0, 1.5]);
    gateway.script_prices(TOKEN_B, &[1.0, 1.0, 1.0, 1.5]);
    gateway.set_fill(TOKEN_A, 8_000_000);
    gateway.set_fill(TOKEN_B, 1_600_000);
    let svc = services(&gateway, dec!(10), 50, None);

    Engine::new(svc.clone(), settings())
        .run(queue(&[TOKEN_A, TOKEN_B]), std::future::pending())
        .await;

    let mut costs: Vec<f64> = svc
        .positions
        .closed_positions()
        .await
        .iter()
        .map(|p| p.cost_usd)
        .collect();
    costs.sort_by(|a, b| a.partial_cmp(b).unwrap());
    // The second buy is sized from what the first left available.
    assert_eq!(costs, vec![1.6, 8.0]);

    let ledger = svc.ledger.snapshot().await;
    assert_eq!(ledger.balance_usd, dec!(14.80));
    assert_eq!(ledger.realized_pnl_usd, dec!(4.80));
    assert_eq!(ledger.wins, 2);
    assert_eq!(ledger.cycle_count, 2);
    assert_eq!(ledger.reserved_usd, Decimal::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_price_outage_does_not_exit() {
    let gateway = Arc::new(ScriptedGateway::new(SOL_PRICE));
    gateway.script_prices(TOKEN_A, &[1.0]);
    gateway.set_fill(TOKEN_A, 2_000_000);
    let svc = services(&gateway, dec!(10), 50, None);

    let engine = Engine::new(svc.clone(), settings());
    let handle = tokio::spawn(engine.run(queue(&[TOKEN_A]), std::future::pending()));

    tokio::time::sleep(Duration::from_secs(3)).await;
    gateway.set_price_outage(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(gateway.sells().is_empty());
    assert_eq!(svc.positions.open_positions().await.len(), 1);

    gateway.script_prices(TOKEN_A, &[0.7]);
    gateway.set_price_outage(false);
    let report = assert_ok!(handle.await);
    assert!(report.flushed);

    let closed = svc.positions.closed_positions().await;
    assert_eq!(closed[0].status(), PositionStatus::ClosedSl);
    assert_eq!(svc.ledger.read_balance().await, dec!(9.40));
}

#[tokio::test(start_paused = true)]
async fn test_restart_resumes_open_position() {
    let dir = temp_dir();
    let gateway = Arc::new(ScriptedGateway::new(SOL_PRICE));
    gateway.script_prices(TOKEN_A, &[1.0]);
    gateway.set_fill(TOKEN_A, 8_000_000);

    // First run: buy, watch a flat price, shut down with the position open.
    let svc = services(&gateway, dec!(10), 50, Some(&dir));
    let report = Engine::new(svc.clone(), settings())
        .run(queue(&[TOKEN_A]), tokio::time::sleep(Duration::from_secs(5)))
        .await;
    assert_eq!(report.drained, 1);
    assert!(report.flushed);
    drop(svc);

    let reloaded = assert_ok!(PositionStore::load(&dir.join(storage::POSITIONS_FILE)));
    assert_eq!(reloaded.open_positions().await.len(), 1);

    // Second run: same state directory, price falls through the stop.
    gateway.script_prices(TOKEN_A, &[0.5]);
    let svc = services(&gateway, dec!(999), 50, Some(&dir));
    assert_eq!(svc.ledger.read_balance().await, dec!(10));

    let mut engine = Engine::new(svc.clone(), settings());
    assert_eq!(engine.resume().await, 1);
    assert_eq!(svc.ledger.available().await, dec!(2));
    assert!(svc.positions.is_claimed(TOKEN_A).await);

    engine.run(queue(&[TOKEN_A]), std::future::pending()).await;

    assert_eq!(gateway.buys().len(), 1);
    assert_eq!(gateway.sells().len(), 1);
    let ledger = assert_ok!(CapitalLedger::load(&dir.join(storage::LEDGER_FILE), dec!(999)));
    let snapshot = ledger.snapshot().await;
    assert_eq!(snapshot.balance_usd, dec!(6));
    assert_eq!(snapshot.cycle_count, 1);
    assert_eq!(snapshot.losses, 1);

    std::fs::remove_dir_all(&dir).ok();
}
