//! Gateway integrations.
//!
//! Defines the collaborator traits the lifecycle engine consumes and
//! provides implementations for:
//! - Jupiter lite API: live quotes, holdings, ultra swap orders
//! - Paper wallet: dry-run holdings and swaps against live quotes
//!
//! Every gateway-facing failure is converted into [`GatewayError`] here,
//! so nothing transport-specific leaks into the engine.

pub mod jupiter;
pub mod paper;
pub mod signer;

use async_trait::async_trait;
use serde::Deserialize;

use crate::types::{Holding, Quote, SOL_MINT};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("invalid market data: {0}")]
    InvalidMarketData(String),

    #[error("order rejected by gateway: {0}")]
    OrderRejected(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transient(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Exact-in swap request, amount in base units of `input_mint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub taker: String,
}

impl OrderRequest {
    /// Spend `lamports` of SOL on `token_id`.
    pub fn buy(token_id: &str, lamports: u64, taker: &str) -> Self {
        Self {
            input_mint: SOL_MINT.to_string(),
            output_mint: token_id.to_string(),
            amount: lamports,
            taker: taker.to_string(),
        }
    }

    /// Swap `amount` base units of `token_id` back to SOL.
    pub fn sell(token_id: &str, amount: u64, taker: &str) -> Self {
        Self {
            input_mint: token_id.to_string(),
            output_mint: SOL_MINT.to_string(),
            amount,
            taker: taker.to_string(),
        }
    }

    pub fn is_buy(&self) -> bool {
        self.input_mint == SOL_MINT
    }
}

/// Order as returned by the aggregator, before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedOrder {
    pub request_id: String,
    /// Base64 serialized versioned transaction.
    pub transaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedOrder {
    pub request_id: String,
    pub signed_transaction: String,
}

/// Result of submitting a signed order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmitResult {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubmitResult {
    pub fn success(signature: impl Into<String>) -> Self {
        Self {
            status: "Success".into(),
            signature: Some(signature.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: "Failed".into(),
            signature: None,
            error: Some(error.into()),
        }
    }

    /// Only an explicit success status counts; a returned transaction or
    /// signature on its own does not.
    pub fn is_success(&self) -> bool {
        self.status.eq_ignore_ascii_case("success")
    }
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Spot price / market cap / liquidity source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn quote(&self, token_id: &str) -> Result<Quote, GatewayError>;
}

/// Source of truth for live wallet balances.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HoldingsSource: Send + Sync {
    /// Current balance of `token_id`. A failed read is an error,
    /// never an empty holding.
    async fn holding(&self, token_id: &str) -> Result<Holding, GatewayError>;
}

/// Swap aggregator: build an order for the taker, then submit it signed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapGateway: Send + Sync {
    async fn build_order(&self, request: &OrderRequest) -> Result<UnsignedOrder, GatewayError>;

    async fn submit(&self, order: &SignedOrder) -> Result<SubmitResult, GatewayError>;

    /// Gateway name for logging.
    fn name(&self) -> &'static str;
}

/// Signs aggregator orders with the trading wallet.
pub trait OrderSigner: Send + Sync {
    fn sign(&self, order: &UnsignedOrder) -> Result<SignedOrder, GatewayError>;

    /// Base58 public key used as order taker.
    fn public_key(&self) -> String;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
