//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (wallet key, Telegram credentials) are referenced by env-var
//! name in the config and resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub jupiter: JupiterConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// Paper-trade against live prices instead of sending swaps.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    /// Directory holding `ledger.json`, `positions.json`, `trades.json`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TradingConfig {
    pub starting_capital_usd: f64,
    /// Share of available capital committed to each buy.
    pub sizing_fraction: f64,
    pub buy_fee_pct: f64,
    pub sell_fee_pct: f64,
    pub take_profit_pct: f64,
    /// Magnitude is used, so `-20` and `20` are equivalent.
    pub stop_loss_pct: f64,
    pub max_buys_per_day: u32,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl TradingConfig {
    pub fn stop_loss_pct(&self) -> f64 {
        self.stop_loss_pct.abs()
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub log_every_polls: u32,
    pub drain_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            log_every_polls: 5,
            drain_timeout_secs: 30,
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` waits `n × backoff_ms` before retrying.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct JupiterConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub wallet_key_env: String,
    #[serde(default)]
    pub referral_account: Option<String>,
    #[serde(default)]
    pub referral_fee_bps: Option<u16>,
}

impl Default for JupiterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://lite-api.jup.ag".into(),
            timeout_secs: 15,
            wallet_key_env: "SNIPER_WALLET_KEY".into(),
            referral_account: None,
            referral_fee_bps: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SignalsConfig {
    /// Read token ids from stdin, one per line.
    pub stdin: bool,
    pub queue_capacity: usize,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            stdin: true,
            queue_capacity: 256,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}

fn default_settle_delay_ms() -> u64 {
    3000
}

impl AppConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the lifecycle engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.trading;
        if !(t.starting_capital_usd.is_finite() && t.starting_capital_usd >= 0.0) {
            bail!("trading.starting_capital_usd must be >= 0");
        }
        if !(t.sizing_fraction > 0.0 && t.sizing_fraction <= 1.0) {
            bail!("trading.sizing_fraction must be in (0, 1], got {}", t.sizing_fraction);
        }
        for (name, pct) in [("buy_fee_pct", t.buy_fee_pct), ("sell_fee_pct", t.sell_fee_pct)] {
            if !(0.0..100.0).contains(&pct) {
                bail!("trading.{name} must be in [0, 100), got {pct}");
            }
        }
        if t.take_profit_pct <= 0.0 {
            bail!("trading.take_profit_pct must be positive");
        }
        let sl = t.stop_loss_pct();
        if !(sl > 0.0 && sl < 100.0) {
            bail!("trading.stop_loss_pct magnitude must be in (0, 100), got {}", t.stop_loss_pct);
        }
        if t.max_buys_per_day == 0 {
            bail!("trading.max_buys_per_day must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.monitor.poll_interval_ms == 0 {
            bail!("monitor.poll_interval_ms must be positive");
        }
        if self.signals.queue_capacity == 0 {
            bail!("signals.queue_capacity must be at least 1");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve the wallet private key into a secret.
    pub fn wallet_key(&self) -> Result<SecretString> {
        Self::resolve_env(&self.jupiter.wallet_key_env).map(SecretString::new)
    }
}
