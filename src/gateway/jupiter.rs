//! Jupiter lite API integration.
//!
//! One client covers all three gateway roles:
//! - `GET  /tokens/v2/search?query={mint}`: spot price, market cap, liquidity
//! - `GET  /ultra/v1/holdings/{wallet}`: live token balances
//! - `GET  /ultra/v1/order` + `POST /ultra/v1/execute`: ultra swaps
//!
//! No API key is needed on the lite endpoints. The pooled `reqwest::Client`
//! is shared by the dispatch loop and every exit monitor.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{
    GatewayError, HoldingsSource, OrderRequest, PriceFeed, SignedOrder, SubmitResult,
    SwapGateway, UnsignedOrder,
};
use crate::config::JupiterConfig;
use crate::types::{Holding, Quote};

const GATEWAY_NAME: &str = "jupiter";

// ---------------------------------------------------------------------------
// API response types (Jupiter JSON → Rust)
// ---------------------------------------------------------------------------

/// One hit from `/tokens/v2/search`. Only the fields we use.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenSearchHit {
    #[serde(default)]
    id: String,
    #[serde(default)]
    usd_price: Option<f64>,
    #[serde(default)]
    mcap: Option<f64>,
    #[serde(default)]
    liquidity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HoldingsResponse {
    #[serde(default)]
    tokens: HashMap<String, Vec<TokenAccount>>,
}

/// Token account entry under `tokens[mint]`. `amount` is a base-unit string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenAccount {
    #[serde(default)]
    amount: Option<String>,
    #[serde(default)]
    ui_amount: Option<f64>,
    #[serde(default)]
    decimals: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    signed_transaction: &'a str,
    request_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl From<ExecuteResponse> for SubmitResult {
    fn from(r: ExecuteResponse) -> Self {
        SubmitResult {
            status: r.status,
            signature: r.signature.or(r.txid).filter(|s| !s.is_empty()),
            error: r.error,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct JupiterClient {
    http: Client,
    base_url: String,
    /// Wallet whose holdings are read.
    wallet: String,
    referral: Option<(String, u16)>,
}

impl JupiterClient {
    pub fn new(config: &JupiterConfig, wallet: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("SNIPER/0.1.0")
            .build()
            .context("Failed to build HTTP client for Jupiter")?;

        let referral = match (&config.referral_account, config.referral_fee_bps) {
            (Some(account), Some(bps)) if !account.is_empty() => Some((account.clone(), bps)),
            _ => None,
        };

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            wallet: wallet.into(),
            referral,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, GatewayError> {
        debug!(url = %url, "Jupiter GET");
        let resp = self.http.get(url).send().await?;
        let resp = check_status(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| GatewayError::InvalidMarketData(format!("unparseable response: {e}")))
    }
}

/// Map non-2xx responses: throttling and server faults are transient,
/// anything else is a rejection of the request itself.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(GatewayError::Transient(format!("HTTP {status}: {body}")))
    } else {
        Err(GatewayError::OrderRejected(format!("HTTP {status}: {body}")))
    }
}

/// Price `token_id` from search results. Only a hit whose mint matches
/// exactly counts; the search is fuzzy and may return other tokens.
fn quote_from_hits(token_id: &str, hits: Vec<TokenSearchHit>) -> Result<Quote, GatewayError> {
    let Some(hit) = hits.into_iter().find(|h| h.id == token_id) else {
        return Err(GatewayError::InvalidMarketData(format!(
            "no search result for {token_id}"
        )));
    };
    let quote = Quote {
        price_usd: hit.usd_price.unwrap_or(0.0),
        market_cap_usd: hit.mcap.unwrap_or(0.0),
        liquidity_usd: hit.liquidity.unwrap_or(0.0),
    };
    if !quote.is_usable() {
        return Err(GatewayError::InvalidMarketData(format!(
            "unusable price for {token_id}: {}",
            quote.price_usd
        )));
    }
    Ok(quote)
}

/// Sum every token account of `token_id`. A mint absent from the response
/// is a genuine zero balance.
fn holding_from_response(token_id: &str, resp: HoldingsResponse) -> Result<Holding, GatewayError> {
    let Some(accounts) = resp.tokens.get(token_id) else {
        return Ok(Holding::empty(0));
    };
    let decimals = accounts.first().map(|a| a.decimals).unwrap_or(0);

    let mut total: u64 = 0;
    for account in accounts {
        let amount = match (&account.amount, account.ui_amount) {
            (Some(raw), _) => raw.parse::<u64>().map_err(|e| {
                GatewayError::InvalidMarketData(format!("bad amount '{raw}' for {token_id}: {e}"))
            })?,
            (None, Some(ui)) => (ui * 10f64.powi(account.decimals as i32)).floor() as u64,
            (None, None) => 0,
        };
        total = total.saturating_add(amount);
    }
    Ok(Holding { amount: total, decimals })
}

#[async_trait]
impl PriceFeed for JupiterClient {
    async fn quote(&self, token_id: &str) -> Result<Quote, GatewayError> {
        let url = format!(
            "{}/tokens/v2/search?query={}",
            self.base_url,
            urlencoding::encode(token_id)
        );
        let hits: Vec<TokenSearchHit> = self.get_json(&url).await?;
        quote_from_hits(token_id, hits)
    }
}

#[async_trait]
impl HoldingsSource for JupiterClient {
    async fn holding(&self, token_id: &str) -> Result<Holding, GatewayError> {
        let url = format!("{}/ultra/v1/holdings/{}", self.base_url, self.wallet);
        let resp: HoldingsResponse = self.get_json(&url).await?;
        holding_from_response(token_id, resp)
    }
}

#[async_trait]
impl SwapGateway for JupiterClient {
    async fn build_order(&self, request: &OrderRequest) -> Result<UnsignedOrder, GatewayError> {
        let amount = request.amount.to_string();
        let mut params: Vec<(&str, String)> = vec![
            ("inputMint", request.input_mint.clone()),
            ("outputMint", request.output_mint.clone()),
            ("amount", amount),
            ("taker", request.taker.clone()),
            ("payer", request.taker.clone()),
            ("closeAuthority", request.taker.clone()),
        ];
        if let Some((account, bps)) = &self.referral {
            params.push(("referralAccount", account.clone()));
            params.push(("referralFee", bps.to_string()));
        }

        let url = format!("{}/ultra/v1/order", self.base_url);
        debug!(url = %url, input = %request.input_mint, output = %request.output_mint, amount = request.amount, "Jupiter order");
        let resp = self.http.get(&url).query(&params).send().await?;
        let order: OrderResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::OrderRejected(format!("unparseable order: {e}")))?;

        match order.transaction.filter(|t| !t.is_empty()) {
            Some(transaction) => Ok(UnsignedOrder {
                request_id: order.request_id.unwrap_or_default(),
                transaction,
            }),
            None => Err(GatewayError::OrderRejected(
                order
                    .error_message
                    .or(order.error)
                    .unwrap_or_else(|| "order has no transaction".into()),
            )),
        }
    }

    async fn submit(&self, order: &SignedOrder) -> Result<SubmitResult, GatewayError> {
        let url = format!("{}/ultra/v1/execute", self.base_url);
        let body = ExecuteRequest {
            signed_transaction: &order.signed_transaction,
            request_id: &order.request_id,
        };
        let resp = self.http.post(&url).json(&body).send().await?;
        let result: ExecuteResponse = check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Transient(format!("unparseable execute response: {e}")))?;
        Ok(result.into())
    }

    fn name(&self) -> &'static str {
        GATEWAY_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
