//! Market data client.
//!
//! Prices come from Pyth Hermes; protocol state is served from static
//! snapshots until the protocol APIs are wired; portfolios are read via
//! Solana JSON-RPC `getBalance`.
//!
//! Every fetch degrades to partial or empty data on failure. The scheduler
//! must keep running through upstream outages, so nothing in this module
//! propagates an error per-cycle — construction is the only fallible path.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use super::MarketDataProvider;
use crate::types::{Portfolio, SOL_MINT, USDC_MINT, USDT_MINT};

const PROVIDER_NAME: &str = "pyth";

/// Pyth price feed account for a known mint.
fn pyth_feed_for(mint: &str) -> Option<&'static str> {
    match mint {
        SOL_MINT => Some("H6ARHf6YXhGYeQfUzQNGk6rDNnLBQKrenN712K4AQJEG"),
        USDC_MINT => Some("Gnt27xtC473ZT2Mw5u8wZ68Z3gULkSTb5DuxJy7eJotD"),
        USDT_MINT => Some("ExzpbWgczTgd8J58BrnESndmzBrhBqk9hSxgKd1Bo3Lu"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// API response types (Hermes JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PythFeed {
    price: PythPrice,
}

/// Hermes serves the raw price as a string and a base-10 exponent.
#[derive(Debug, Deserialize)]
struct PythPrice {
    price: serde_json::Value,
    expo: i32,
}

impl PythPrice {
    fn to_decimal(&self) -> Option<Decimal> {
        let raw = match &self.price {
            serde_json::Value::String(s) => s.parse::<f64>().ok()?,
            serde_json::Value::Number(n) => n.as_f64()?,
            _ => return None,
        };
        Decimal::from_f64(raw * 10f64.powi(self.expo))
    }
}

#[derive(Debug, Deserialize)]
struct RpcBalanceResponse {
    result: Option<RpcBalanceResult>,
}

#[derive(Debug, Deserialize)]
struct RpcBalanceResult {
    value: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Market data client backed by Pyth and Solana RPC.
pub struct PythMarketData {
    http: Client,
    pyth_endpoint: String,
    rpc_url: Option<String>,
}

impl PythMarketData {
    pub fn new(pyth_endpoint: String, rpc_url: Option<String>, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("SOLSTICE/0.1.0 (defi-agent-engine)")
            .build()
            .context("Failed to build HTTP client for market data")?;

        Ok(Self {
            http,
            pyth_endpoint,
            rpc_url,
        })
    }

    // -- Internal helpers ------------------------------------------------

    async fn fetch_price(&self, feed_id: &str) -> Result<Decimal> {
        let feeds: Vec<PythFeed> = self
            .http
            .get(format!("{}/api/latest_price_feeds", self.pyth_endpoint))
            .query(&[("ids[]", feed_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        feeds
            .first()
            .and_then(|f| f.price.to_decimal())
            .context("Pyth feed returned no usable price")
    }

    async fn fetch_sol_balance(&self, rpc_url: &str, wallet: &str) -> Result<Decimal> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [wallet],
        });
        let resp: RpcBalanceResponse = self
            .http
            .post(rpc_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let lamports = resp
            .result
            .context("RPC getBalance returned no result")?
            .value;
        Ok(Decimal::from(lamports) / Decimal::from(1_000_000_000u64))
    }

    /// Static per-protocol state snapshot.
    ///
    /// TODO: replace with on-chain reads once the Marginfi/Orca/Raydium
    /// API clients land; the shape is already what the predictor consumes.
    fn protocol_snapshot(protocol: &str) -> Option<serde_json::Value> {
        match protocol {
            "marginfi" => Some(serde_json::json!({
                "total_deposits": 1_000_000,
                "total_borrows": 750_000,
                "lending_rates": { "USDC": 0.05, "SOL": 0.03 },
                "borrowing_rates": { "USDC": 0.08, "SOL": 0.06 },
            })),
            "orca" => Some(serde_json::json!({
                "pools": {
                    "SOL-USDC": { "tvl": 50_000_000, "fee_tier": 0.003, "apr": 0.15 },
                },
            })),
            "raydium" => Some(serde_json::json!({
                "farms": {
                    "RAY-SOL": { "tvl": 25_000_000, "apy": 0.25, "rewards_token": "RAY" },
                },
            })),
            _ => None,
        }
    }
}

#[async_trait]
impl MarketDataProvider for PythMarketData {
    async fn get_prices(&self, mints: &[String]) -> Result<HashMap<String, Decimal>> {
        let mut prices = HashMap::new();

        for mint in mints {
            let Some(feed_id) = pyth_feed_for(mint) else {
                debug!(mint = %mint, "No Pyth feed known for mint, skipping");
                continue;
            };
            match self.fetch_price(feed_id).await {
                Ok(price) => {
                    prices.insert(mint.clone(), price);
                }
                Err(e) => {
                    warn!(mint = %mint, error = %e, "Price fetch failed, skipping mint");
                }
            }
        }

        Ok(prices)
    }

    async fn get_protocol_state(
        &self,
        protocols: &[String],
    ) -> Result<HashMap<String, serde_json::Value>> {
        let mut state = HashMap::new();
        for protocol in protocols {
            if let Some(snapshot) = Self::protocol_snapshot(protocol) {
                state.insert(protocol.clone(), snapshot);
            } else {
                debug!(protocol = %protocol, "Unknown protocol, no state snapshot");
            }
        }
        Ok(state)
    }

    async fn get_portfolio(&self, wallet: &str) -> Result<Portfolio> {
        let Some(rpc_url) = self.rpc_url.as_deref() else {
            debug!("No RPC URL configured, returning empty portfolio");
            return Ok(Portfolio::default());
        };
        if wallet.is_empty() {
            return Ok(Portfolio::default());
        }

        match self.fetch_sol_balance(rpc_url, wallet).await {
            Ok(sol_balance) => Ok(Portfolio {
                sol_balance,
                total_value_usd: Decimal::ZERO,
                token_balances: Vec::new(),
            }),
            Err(e) => {
                warn!(wallet = %wallet, error = %e, "Portfolio fetch failed, returning empty");
                Ok(Portfolio::default())
            }
        }
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_client() -> PythMarketData {
        PythMarketData::new("https://hermes.invalid".to_string(), None, 5).unwrap()
    }

    #[test]
    fn test_pyth_feed_mapping() {
        assert!(pyth_feed_for(SOL_MINT).is_some());
        assert!(pyth_feed_for(USDC_MINT).is_some());
        assert!(pyth_feed_for("UnknownMint1111111111111111111111111111111").is_none());
    }

    #[test]
    fn test_pyth_price_string_payload() {
        let price = PythPrice {
            price: serde_json::json!("14520000000"),
            expo: -8,
        };
        let value = price.to_decimal().unwrap();
        assert!((value - dec!(145.2)).abs() < dec!(0.0001));
    }

    #[test]
    fn test_pyth_price_numeric_payload() {
        let price = PythPrice {
            price: serde_json::json!(99_995_000),
            expo: -8,
        };
        let value = price.to_decimal().unwrap();
        assert!((value - dec!(0.99995)).abs() < dec!(0.000001));
    }

    #[test]
    fn test_pyth_price_invalid_payload() {
        let price = PythPrice {
            price: serde_json::json!(null),
            expo: -8,
        };
        assert!(price.to_decimal().is_none());
    }

    #[test]
    fn test_protocol_snapshots() {
        let marginfi = PythMarketData::protocol_snapshot("marginfi").unwrap();
        assert!(marginfi["lending_rates"]["USDC"].as_f64().unwrap() > 0.0);

        let raydium = PythMarketData::protocol_snapshot("raydium").unwrap();
        assert!(raydium["farms"]["RAY-SOL"]["apy"].as_f64().unwrap() > 0.0);

        assert!(PythMarketData::protocol_snapshot("unknown").is_none());
    }

    #[tokio::test]
    async fn test_get_prices_skips_unknown_mints() {
        let client = make_client();
        // Unknown mint is skipped without touching the network.
        let prices = client
            .get_prices(&["NotARealMint111111111111111111111111111111".to_string()])
            .await
            .unwrap();
        assert!(prices.is_empty());
    }

    #[tokio::test]
    async fn test_get_protocol_state_filters_unknown() {
        let client = make_client();
        let state = client
            .get_protocol_state(&["marginfi".to_string(), "unknown".to_string()])
            .await
            .unwrap();
        assert_eq!(state.len(), 1);
        assert!(state.contains_key("marginfi"));
    }

    #[tokio::test]
    async fn test_get_portfolio_without_rpc() {
        let client = make_client();
        let portfolio = client.get_portfolio("some-wallet").await.unwrap();
        assert_eq!(portfolio.sol_balance, Decimal::ZERO);
        assert!(portfolio.token_balances.is_empty());
    }

    #[tokio::test]
    async fn test_get_portfolio_empty_wallet() {
        let client = PythMarketData::new(
            "https://hermes.invalid".to_string(),
            Some("https://rpc.invalid".to_string()),
            5,
        )
        .unwrap();
        let portfolio = client.get_portfolio("").await.unwrap();
        assert_eq!(portfolio.sol_balance, Decimal::ZERO);
    }
}
