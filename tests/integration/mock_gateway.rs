//! Scripted gateway for integration testing.
//!
//! Provides deterministic `PriceFeed`, `HoldingsSource` and `SwapGateway`
//! implementations in one in-memory object. Token prices replay a script
//! (the last entry repeats), buys credit a configured fill, and failures
//! can be injected from test code.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use sniper::gateway::{
    GatewayError, HoldingsSource, OrderRequest, PriceFeed, SignedOrder, SubmitResult, SwapGateway,
    UnsignedOrder,
};
use sniper::types::{Holding, Quote, SOL_MINT};

pub const DECIMALS: u8 = 6;

pub struct ScriptedGateway {
    sol_price: f64,
    prices: Mutex<HashMap<String, VecDeque<f64>>>,
    fills: Mutex<HashMap<String, u64>>,
    balances: Mutex<HashMap<String, u64>>,
    pending: Mutex<HashMap<String, OrderRequest>>,
    filled: Mutex<Vec<OrderRequest>>,
    orders_built: AtomicU32,
    submit_calls: AtomicU32,
    failing_submits: AtomicU32,
    price_outage: AtomicBool,
}

impl ScriptedGateway {
    pub fn new(sol_price: f64) -> Self {
        Self {
            sol_price,
            prices: Mutex::new(HashMap::new()),
            fills: Mutex::new(HashMap::new()),
            balances: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            filled: Mutex::new(Vec::new()),
            orders_built: AtomicU32::new(0),
            submit_calls: AtomicU32::new(0),
            failing_submits: AtomicU32::new(0),
            price_outage: AtomicBool::new(false),
        }
    }

    /// Replace the price script for `token_id`.
    pub fn script_prices(&self, token_id: &str, prices: &[f64]) {
        self.prices
            .lock()
            .unwrap()
            .insert(token_id.to_string(), prices.iter().copied().collect());
    }

    /// Base units credited when a buy of `token_id` fills.
    pub fn set_fill(&self, token_id: &str, amount: u64) {
        self.fills.lock().unwrap().insert(token_id.to_string(), amount);
    }

    pub fn credit(&self, token_id: &str, amount: u64) {
        *self
            .balances
            .lock()
            .unwrap()
            .entry(token_id.to_string())
            .or_insert(0) += amount;
    }

    /// Make the next `n` submits report failure.
    pub fn fail_next_submits(&self, n: u32) {
        self.failing_submits.store(n, Ordering::SeqCst);
    }

    pub fn set_price_outage(&self, down: bool) {
        self.price_outage.store(down, Ordering::SeqCst);
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn buys(&self) -> Vec<OrderRequest> {
        self.filled.lock().unwrap().iter().filter(|o| o.is_buy()).cloned().collect()
    }

    pub fn sells(&self) -> Vec<OrderRequest> {
        self.filled.lock().unwrap().iter().filter(|o| !o.is_buy()).cloned().collect()
    }

    pub fn balance(&self, token_id: &str) -> u64 {
        self.balances.lock().unwrap().get(token_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PriceFeed for ScriptedGateway {
    async fn quote(&self, token_id: &str) -> Result<Quote, GatewayError> {
        if self.price_outage.load(Ordering::SeqCst) {
            return Err(GatewayError::Transient("price feed down".into()));
        }
        let price = if token_id == SOL_MINT {
            self.sol_price
        } else {
            let mut prices = self.prices.lock().unwrap();
            let script = prices
                .get_mut(token_id)
                .ok_or_else(|| GatewayError::InvalidMarketData(format!("no script for {token_id}")))?;
            match script.len() {
                0 => return Err(GatewayError::InvalidMarketData("empty script".into())),
                1 => script[0],
                _ => script.pop_front().unwrap(),
            }
        };
        Ok(Quote {
            price_usd: price,
            market_cap_usd: 42_000.0,
            liquidity_usd: 9_000.0,
        })
    }
}

#[async_trait]
impl HoldingsSource for ScriptedGateway {
    async fn holding(&self, token_id: &str) -> Result<Holding, GatewayError> {
        Ok(Holding {
            amount: self.balance(token_id),
            decimals: DECIMALS,
        })
    }
}

#[async_trait]
impl SwapGateway for ScriptedGateway {
    async fn build_order(&self, request: &OrderRequest) -> Result<UnsignedOrder, GatewayError> {
        let request_id = format!("REQ_{}", self.orders_built.fetch_add(1, Ordering::SeqCst));
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), request.clone());
        Ok(UnsignedOrder {
            request_id,
            transaction: String::new(),
        })
    }

    async fn submit(&self, order: &SignedOrder) -> Result<SubmitResult, GatewayError> {
        let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let request = self
            .pending
            .lock()
            .unwrap()
            .remove(&order.request_id)
            .ok_or_else(|| GatewayError::OrderRejected("unknown request".into()))?;

        let failing = self.failing_submits.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_submits.store(failing - 1, Ordering::SeqCst);
            return Ok(SubmitResult::failed("simulated failure"));
        }

        if request.is_buy() {
            let fill = self
                .fills
                .lock()
                .unwrap()
                .get(&request.output_mint)
                .copied()
                .unwrap_or(1_000_000);
            self.credit(&request.output_mint, fill);
        } else {
            let mut balances = self.balances.lock().unwrap();
            let balance = balances.entry(request.input_mint.clone()).or_insert(0);
            *balance = balance.saturating_sub(request.amount);
        }
        self.filled.lock().unwrap().push(request);
        Ok(SubmitResult::success(format!("SIG_{call}")))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}
