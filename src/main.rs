//! SNIPER: signal-driven token acquisition agent.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores ledger and positions from disk, resumes monitors for open
//! positions, and runs the dispatch loop with graceful shutdown.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{error, info, warn};

use sniper::config::AppConfig;
use sniper::dashboard::{self, DashboardState};
use sniper::engine::executor::{RetryPolicy, SwapExecutor};
use sniper::engine::ledger::{to_usd, CapitalLedger};
use sniper::engine::rate_gate::RateGate;
use sniper::engine::{Engine, EngineSettings, Services};
use sniper::gateway::jupiter::JupiterClient;
use sniper::gateway::paper::{PaperSigner, PaperWallet};
use sniper::gateway::signer::WalletSigner;
use sniper::gateway::{HoldingsSource, OrderSigner, PriceFeed, SwapGateway};
use sniper::notify::{LogNotifier, Notifier, TelegramNotifier};
use sniper::signals;
use sniper::storage::{self, PositionStore, TradeHistory};

const BANNER: &str = r#"
 ____  _   _ ___ ____  _____ ____
/ ___|| \ | |_ _|  _ \| ____|  _ \
\___ \|  \| || || |_) |  _| | |_) |
 ___) | |\  || ||  __/| |___|  _ <
|____/|_| \_|___|_|   |_____|_| \_\

  Signal-driven token acquisition agent
  v0.1.0
"#;

struct Gateways {
    prices: Arc<dyn PriceFeed>,
    holdings: Arc<dyn HoldingsSource>,
    swaps: Arc<dyn SwapGateway>,
    signer: Arc<dyn OrderSigner>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".into());
    let cfg = AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        dry_run = cfg.agent.dry_run,
        max_buys_per_day = cfg.trading.max_buys_per_day,
        take_profit_pct = cfg.trading.take_profit_pct,
        stop_loss_pct = cfg.trading.stop_loss_pct(),
        "SNIPER starting up"
    );

    // -- Restore state ---------------------------------------------------

    let state_dir = &cfg.agent.state_dir;
    storage::ensure_dir(state_dir)?;

    let ledger = CapitalLedger::load(
        &state_dir.join(storage::LEDGER_FILE),
        to_usd(cfg.trading.starting_capital_usd),
    )
    .context("Failed to load capital ledger")?;
    let positions = PositionStore::load(&state_dir.join(storage::POSITIONS_FILE))
        .context("Failed to load positions")?;
    let trades = TradeHistory::load(&state_dir.join(storage::TRADES_FILE))
        .context("Failed to load trade history")?;

    let snapshot = ledger.snapshot().await;
    info!(
        balance = format!("${:.2}", snapshot.balance_usd),
        cycles = snapshot.cycle_count,
        pnl = format!("${:+.2}", snapshot.realized_pnl_usd),
        "Ledger loaded"
    );

    // -- Initialise components -------------------------------------------

    let gateways = build_gateways(&cfg, &positions).await?;
    let notifier = build_notifier(&cfg);
    info!(
        gateway = gateways.swaps.name(),
        wallet = %gateways.signer.public_key(),
        notifier = notifier.name(),
        "Gateways ready"
    );

    let services = Arc::new(Services {
        prices: gateways.prices,
        holdings: gateways.holdings,
        executor: Arc::new(SwapExecutor::new(
            gateways.swaps,
            gateways.signer,
            RetryPolicy::from(&cfg.retry),
        )),
        ledger: Arc::new(ledger),
        gate: Arc::new(RateGate::new(cfg.trading.max_buys_per_day)),
        positions: Arc::new(positions),
        trades: Arc::new(trades),
        notifier,
    });

    let mut engine = Engine::new(Arc::clone(&services), EngineSettings::from_config(&cfg));
    engine.resume().await;

    // -- Signal sources --------------------------------------------------

    let (sender, receiver) = signals::channel(cfg.signals.queue_capacity);

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            cfg.agent.name.clone(),
            cfg.agent.dry_run,
            Arc::clone(&services),
            sender.clone(),
        ));
        dashboard::spawn_dashboard(state, cfg.dashboard.port).await?;
    }

    if cfg.signals.stdin {
        let stdin_sender = sender.clone();
        tokio::spawn(async move {
            let queued = signals::read_lines(BufReader::new(tokio::io::stdin()), stdin_sender).await;
            info!(queued, "Stdin signal source closed");
        });
    }
    // The queue closes once every producer is gone.
    drop(sender);

    // -- Main loop -------------------------------------------------------

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received.");
    };

    info!("Entering dispatch loop. Press Ctrl+C to stop.");
    let report = engine.run(receiver, shutdown).await;

    if !report.flushed {
        bail!("State was not fully saved on shutdown");
    }
    info!(
        drained = report.drained,
        aborted = report.aborted,
        "SNIPER shut down cleanly."
    );
    Ok(())
}

/// Paper wallet over live prices in dry-run mode, Jupiter otherwise.
async fn build_gateways(cfg: &AppConfig, positions: &PositionStore) -> Result<Gateways> {
    if cfg.agent.dry_run {
        let signer = PaperSigner::default();
        let feed: Arc<dyn PriceFeed> =
            Arc::new(JupiterClient::new(&cfg.jupiter, signer.public_key())?);
        let wallet = Arc::new(PaperWallet::new(Arc::clone(&feed)));

        // Paper balances are not persisted; re-seed them for resumed positions.
        for position in positions.open_positions().await {
            wallet.credit(&position.token_id, position.quantity);
        }

        warn!("Dry-run mode: swaps are simulated, prices are live");
        return Ok(Gateways {
            prices: feed,
            holdings: wallet.clone(),
            swaps: wallet,
            signer: Arc::new(signer),
        });
    }

    let key = cfg.wallet_key()?;
    let signer = WalletSigner::from_secret(&key).context("Invalid wallet key")?;
    let client = Arc::new(JupiterClient::new(&cfg.jupiter, signer.public_key())?);
    Ok(Gateways {
        prices: client.clone(),
        holdings: client.clone(),
        swaps: client,
        signer: Arc::new(signer),
    })
}

/// Telegram when both env vars resolve, otherwise the log.
fn build_notifier(cfg: &AppConfig) -> Arc<dyn Notifier> {
    let resolve = |name: &Option<String>| {
        name.as_deref()
            .and_then(|env| AppConfig::resolve_env(env).ok())
            .filter(|v| !v.is_empty())
    };

    match (
        resolve(&cfg.alerts.telegram_bot_token_env),
        resolve(&cfg.alerts.telegram_chat_id_env),
    ) {
        (Some(token), Some(chat_id)) => match TelegramNotifier::new(SecretString::new(token), chat_id) {
            Ok(telegram) => Arc::new(telegram),
            Err(e) => {
                warn!(error = %e, "Telegram unavailable, notifications go to the log");
                Arc::new(LogNotifier)
            }
        },
        _ => {
            info!("Telegram not configured, notifications go to the log");
            Arc::new(LogNotifier)
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sniper=info"));

    let json_logging = std::env::var("SNIPER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
