//! Paper wallet for dry-run mode.
//!
//! Implements holdings and swaps in memory. Prices still come from the
//! live feed, so a dry run exercises the same sizing and exit logic as a
//! funded run without sending anything on chain.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    GatewayError, HoldingsSource, OrderRequest, OrderSigner, PriceFeed, SignedOrder, SubmitResult,
    SwapGateway, UnsignedOrder,
};
use crate::types::{Holding, LAMPORTS_PER_SOL, SOL_MINT};

/// Decimals assumed for simulated token balances.
pub const PAPER_DECIMALS: u8 = 6;

pub struct PaperWallet {
    prices: Arc<dyn PriceFeed>,
    balances: Mutex<HashMap<String, u64>>,
    pending: Mutex<HashMap<String, OrderRequest>>,
}

impl PaperWallet {
    pub fn new(prices: Arc<dyn PriceFeed>) -> Self {
        Self {
            prices,
            balances: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a simulated balance (used when resuming paper positions).
    pub fn credit(&self, token_id: &str, amount: u64) {
        let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        *balances.entry(token_id.to_string()).or_insert(0) += amount;
    }

    fn balance_of(&self, token_id: &str) -> u64 {
        let balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
        balances.get(token_id).copied().unwrap_or(0)
    }

    async fn fill_buy(&self, request: &OrderRequest) -> Result<u64, GatewayError> {
        let sol = self.prices.quote(SOL_MINT).await?;
        let token = self.prices.quote(&request.output_mint).await?;
        if !sol.is_usable() || !token.is_usable() {
            return Err(GatewayError::InvalidMarketData(format!(
                "no usable price for paper fill of {}",
                request.output_mint
            )));
        }

        let spend_usd = request.amount as f64 / LAMPORTS_PER_SOL * sol.price_usd;
        let units = (spend_usd / token.price_usd * 10f64.powi(PAPER_DECIMALS as i32)).floor();
        Ok(units.max(0.0) as u64)
    }
}

#[async_trait]
impl HoldingsSource for PaperWallet {
    async fn holding(&self, token_id: &str) -> Result<Holding, GatewayError> {
        Ok(Holding {
            amount: self.balance_of(token_id),
            decimals: PAPER_DECIMALS,
        })
    }
}

#[async_trait]
impl SwapGateway for PaperWallet {
    async fn build_order(&self, request: &OrderRequest) -> Result<UnsignedOrder, GatewayError> {
        let request_id = Uuid::new_v4().to_string();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), request.clone());
        Ok(UnsignedOrder {
            request_id,
            transaction: String::new(),
        })
    }

    async fn submit(&self, order: &SignedOrder) -> Result<SubmitResult, GatewayError> {
        let request = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&order.request_id)
            .ok_or_else(|| {
                GatewayError::OrderRejected(format!("unknown request id {}", order.request_id))
            })?;

        if request.is_buy() {
            let units = self.fill_buy(&request).await?;
            if units == 0 {
                return Ok(SubmitResult::failed("paper fill rounds to zero units"));
            }
            self.credit(&request.output_mint, units);
            info!(token = %request.output_mint, units, "Paper buy filled");
        } else {
            let mut balances = self.balances.lock().unwrap_or_else(|e| e.into_inner());
            let held = balances.entry(request.input_mint.clone()).or_insert(0);
            if *held < request.amount {
                return Ok(SubmitResult::failed("insufficient paper balance"));
            }
            *held -= request.amount;
            debug!(token = %request.input_mint, sold = request.amount, left = *held, "Paper sell filled");
        }

        Ok(SubmitResult::success(format!("DRY_RUN_{}", Uuid::new_v4())))
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}

/// Signer for paper orders: nothing to sign, the order passes through.
#[derive(Debug, Clone)]
pub struct PaperSigner {
    public_key: String,
}

impl PaperSigner {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
        }
    }
}

impl Default for PaperSigner {
    fn default() -> Self {
        Self::new("PAPER_WALLET")
    }
}

impl OrderSigner for PaperSigner {
    fn sign(&self, order: &UnsignedOrder) -> Result<SignedOrder, GatewayError> {
        Ok(SignedOrder {
            request_id: order.request_id.clone(),
            signed_transaction: order.transaction.clone(),
        })
    }

    fn public_key(&self) -> String {
        self.public_key.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
