//! Chain action executor.
//!
//! Swaps are routed through the Jupiter aggregator (quote + swap
//! transaction). Lending, liquidity, and farm actions return synthetic
//! receipts until the protocol SDKs are integrated; the receipt shape is
//! final so the engine and its callers do not change when they land.
//!
//! TODO: sign and submit the Jupiter swap transaction once agent key
//! custody is implemented; receipts currently carry a pending reference.
//!
//! Nothing here raises into the scheduler: every failure is folded into
//! an `ActionReceipt` with `success == false`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::ExecutionProvider;
use crate::types::{
    ActionReceipt, FarmAction, LendingAction, LiquidityAction, Position, Protocol,
};

const PROVIDER_NAME: &str = "jupiter";

/// Lamports per SOL, used when quoting amounts to Jupiter.
const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// API response types (Jupiter JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JupiterSwap {
    swap_transaction: Option<String>,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Execution provider routing swaps through Jupiter.
pub struct JupiterExecutor {
    http: Client,
    jupiter_base_url: String,
}

impl JupiterExecutor {
    pub fn new(jupiter_base_url: String, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("SOLSTICE/0.1.0 (defi-agent-engine)")
            .build()
            .context("Failed to build HTTP client for chain executor")?;

        Ok(Self {
            http,
            jupiter_base_url,
        })
    }

    // -- Internal helpers ------------------------------------------------

    async fn fetch_quote(
        &self,
        from_token: &str,
        to_token: &str,
        amount_lamports: u64,
        slippage_bps: u32,
    ) -> Result<serde_json::Value> {
        let amount = amount_lamports.to_string();
        let slippage = slippage_bps.to_string();
        let quote: serde_json::Value = self
            .http
            .get(format!("{}/quote", self.jupiter_base_url))
            .query(&[
                ("inputMint", from_token),
                ("outputMint", to_token),
                ("amount", amount.as_str()),
                ("slippageBps", slippage.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(quote)
    }

    async fn fetch_swap_transaction(
        &self,
        quote: &serde_json::Value,
        wallet: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "quoteResponse": quote,
            "userPublicKey": wallet,
            "wrapAndUnwrapSol": true,
        });
        let swap: JupiterSwap = self
            .http
            .post(format!("{}/swap", self.jupiter_base_url))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        swap.swap_transaction
            .context("Jupiter returned no swap transaction")
    }

    fn synthetic_tx(kind: &str, agent_id: &str) -> String {
        format!("{kind}-{agent_id}-{}", Uuid::new_v4())
    }
}

#[async_trait]
impl ExecutionProvider for JupiterExecutor {
    async fn execute_swap(
        &self,
        agent_id: &str,
        from_token: &str,
        to_token: &str,
        amount: Decimal,
        slippage_bps: u32,
    ) -> ActionReceipt {
        let amount_lamports = (amount * Decimal::from(LAMPORTS_PER_SOL))
            .to_u64()
            .unwrap_or(0);
        if amount_lamports == 0 {
            return ActionReceipt::failure("Swap amount rounds to zero");
        }

        let quote = match self
            .fetch_quote(from_token, to_token, amount_lamports, slippage_bps)
            .await
        {
            Ok(q) => q,
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Jupiter quote failed");
                return ActionReceipt::failure(format!("No swap route found: {e}"));
            }
        };

        let output_amount = quote
            .get("outAmount")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<Decimal>().ok())
            .map(|v| v / Decimal::from(LAMPORTS_PER_SOL))
            .unwrap_or(Decimal::ZERO);

        match self.fetch_swap_transaction(&quote, agent_id).await {
            Ok(_tx) => {
                info!(
                    agent_id = %agent_id,
                    from = %from_token,
                    to = %to_token,
                    amount = %amount,
                    out = %output_amount,
                    "Swap transaction prepared"
                );
                ActionReceipt::filled(
                    Self::synthetic_tx("swap", agent_id),
                    output_amount,
                    Decimal::ZERO,
                )
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "Jupiter swap build failed");
                ActionReceipt::failure(format!("Failed to build swap transaction: {e}"))
            }
        }
    }

    async fn execute_lending(
        &self,
        agent_id: &str,
        protocol: Protocol,
        action: LendingAction,
        token: &str,
        amount: Decimal,
    ) -> ActionReceipt {
        if amount <= Decimal::ZERO {
            return ActionReceipt::failure("Lending amount must be positive");
        }
        info!(
            agent_id = %agent_id,
            protocol = %protocol,
            action = ?action,
            token = %token,
            amount = %amount,
            "Executing lending action"
        );
        ActionReceipt::filled(Self::synthetic_tx("lending", agent_id), amount, Decimal::ZERO)
    }

    async fn execute_liquidity(
        &self,
        agent_id: &str,
        protocol: Protocol,
        action: LiquidityAction,
        pool_id: &str,
        amount_a: Decimal,
        amount_b: Decimal,
    ) -> ActionReceipt {
        if pool_id.is_empty() {
            return ActionReceipt::failure("Missing pool id");
        }
        info!(
            agent_id = %agent_id,
            protocol = %protocol,
            action = ?action,
            pool_id = %pool_id,
            "Executing liquidity action"
        );
        ActionReceipt::filled(
            Self::synthetic_tx("liquidity", agent_id),
            amount_a + amount_b,
            Decimal::ZERO,
        )
    }

    async fn execute_yield_farm(
        &self,
        agent_id: &str,
        protocol: Protocol,
        action: FarmAction,
        farm_id: &str,
        amount: Decimal,
    ) -> ActionReceipt {
        if farm_id.is_empty() {
            return ActionReceipt::failure("Missing farm id");
        }
        if matches!(action, FarmAction::Stake | FarmAction::Unstake) && amount <= Decimal::ZERO {
            return ActionReceipt::failure("Stake/unstake requires a positive amount");
        }
        info!(
            agent_id = %agent_id,
            protocol = %protocol,
            action = ?action,
            farm_id = %farm_id,
            amount = %amount,
            "Executing yield farm action"
        );
        ActionReceipt::filled(Self::synthetic_tx("farm", agent_id), amount, Decimal::ZERO)
    }

    async fn close_position(&self, agent_id: &str, position: &Position) -> ActionReceipt {
        info!(
            agent_id = %agent_id,
            position = %position,
            "Closing position"
        );
        ActionReceipt::filled(
            Self::synthetic_tx("close", agent_id),
            position.size,
            Decimal::ZERO,
        )
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
