//! Swap executor.
//!
//! Submits one swap through the gateway with bounded retry. Each attempt
//! builds a fresh order, signs it, submits it, and checks the explicit
//! status field. Buys and sells share this path.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::gateway::{GatewayError, OrderRequest, OrderSigner, SwapGateway};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Linear step: attempt `n` is followed by a wait of `n × backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Wait after the failed `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff * attempt
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self::new(cfg.max_attempts, Duration::from_millis(cfg.backoff_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    pub signature: String,
    /// Attempts used, including the successful one.
    pub attempts: u32,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum SwapError {
    #[error("swap failed after {attempts} attempts: {last_error}")]
    Exhausted {
        attempts: u32,
        last_error: GatewayError,
    },
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct SwapExecutor {
    gateway: Arc<dyn SwapGateway>,
    signer: Arc<dyn OrderSigner>,
    retry: RetryPolicy,
}

impl SwapExecutor {
    pub fn new(gateway: Arc<dyn SwapGateway>, signer: Arc<dyn OrderSigner>, retry: RetryPolicy) -> Self {
        Self {
            gateway,
            signer,
            retry,
        }
    }

    /// Wallet address used as order taker.
    pub fn taker(&self) -> String {
        self.signer.public_key()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Execute `request`, retrying up to the policy's attempt limit.
    pub async fn execute(&self, request: &OrderRequest) -> Result<SwapOutcome, SwapError> {
        let side = if request.is_buy() { "BUY" } else { "SELL" };
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.try_once(request).await {
                Ok(signature) => {
                    info!(
                        side,
                        gateway = self.gateway.name(),
                        attempt,
                        signature = %signature,
                        "Swap confirmed"
                    );
                    return Ok(SwapOutcome {
                        signature,
                        attempts: attempt,
                    });
                }
                Err(e) if attempt >= self.retry.max_attempts => {
                    warn!(side, attempts = attempt, error = %e, "Swap failed, attempts exhausted");
                    return Err(SwapError::Exhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        side,
                        attempt,
                        max = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Swap attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One build → sign → submit round. Only an explicit success status
    /// with a signature counts as a fill.
    async fn try_once(&self, request: &OrderRequest) -> Result<String, GatewayError> {
        let order = self.gateway.build_order(request).await?;
        let signed = self.signer.sign(&order)?;
        let result = self.gateway.submit(&signed).await?;

        if !result.is_success() {
            return Err(GatewayError::OrderRejected(
                result
                    .error
                    .unwrap_or_else(|| format!("status '{}'", result.status)),
            ));
        }
        result
            .signature
            .filter(|s| !s.is_empty())
            .ok_or_else(|| GatewayError::OrderRejected("success status without signature".into()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
