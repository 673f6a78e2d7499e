//! HTTP predictor client.
//!
//! Sends a feature vector for one agent to the AI service `/predict`
//! endpoint and maps the returned yield prediction onto an actionable
//! strategy decision: action selection, confidence, risk score, execution
//! gate, and next-check timing.
//!
//! Errors propagate to the dispatcher, which owns the degraded-hold
//! policy — this client does not invent decisions when the service is
//! unreachable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use super::Predictor;
use crate::types::{
    AgentConfig, Decision, FarmAction, LendingAction, MarketContext, Position, Protocol,
    StrategyAction, SOL_MINT, USDC_MINT,
};

const MODEL_NAME: &str = "solstice-forecast-v1";

/// Response payload from the AI service.
#[derive(Debug, Deserialize)]
struct PredictResponse {
    /// Predicted per-cycle yield as a fraction.
    pred: f64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Predictor backed by the external AI service.
pub struct HttpPredictor {
    http: Client,
    base_url: String,
    api_token: Option<SecretString>,
}

impl HttpPredictor {
    pub fn new(base_url: String, timeout_secs: u64, api_token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("SOLSTICE/0.1.0 (defi-agent-engine)")
            .build()
            .context("Failed to build HTTP client for predictor")?;

        Ok(Self {
            http,
            base_url,
            api_token: api_token.map(SecretString::new),
        })
    }

    /// Feature vector sent alongside the prediction request.
    fn features(
        agent_id: &str,
        context: &MarketContext,
        positions: &HashMap<String, Position>,
        config: &AgentConfig,
    ) -> serde_json::Value {
        let now = Utc::now();
        let portfolio_value = context.portfolio.total_value_usd.to_f64().unwrap_or(0.0);

        serde_json::json!({
            "strategy_id": format!("agent_{agent_id}_{}", now.to_rfc3339()),
            "sol_price": context.price(SOL_MINT).and_then(|p| p.to_f64()).unwrap_or(0.0),
            "usdc_price": context.price(USDC_MINT).and_then(|p| p.to_f64()).unwrap_or(1.0),
            "portfolio_value": portfolio_value,
            "sol_balance": context.portfolio.sol_balance.to_f64().unwrap_or(0.0),
            "position_count": positions.len(),
            "position_risk": position_risk(positions, context.portfolio.total_value_usd),
            "risk_tolerance": config.risk_level.score(),
            "max_investment": config.max_investment.to_f64().unwrap_or(0.0),
            "min_profit_threshold": config.min_profit_threshold,
            "protocols_available": context.protocols.keys().collect::<Vec<_>>(),
            "watched_tokens": &config.watched_tokens,
            "hour_of_day": now.hour(),
            "day_of_week": now.weekday().num_days_from_monday(),
        })
    }
}

#[async_trait]
impl Predictor for HttpPredictor {
    async fn decide(
        &self,
        agent_id: &str,
        context: &MarketContext,
        positions: &HashMap<String, Position>,
        config: &AgentConfig,
    ) -> Result<Decision> {
        let features = Self::features(agent_id, context, positions, config);

        let mut request = self
            .http
            .post(format!("{}/predict", self.base_url))
            .json(&features);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response: PredictResponse = request
            .send()
            .await
            .context("Predictor request failed")?
            .error_for_status()
            .context("Predictor returned an error status")?
            .json()
            .await
            .context("Predictor returned malformed JSON")?;

        let predicted_yield = response.pred;
        let action = select_action(predicted_yield, context, config);
        let confidence = confidence_for(predicted_yield, context);
        let risk_score = risk_score_for(&action, config);
        let decision = Decision {
            should_execute: should_execute(predicted_yield, confidence, risk_score, config),
            next_check_minutes: next_check_for(predicted_yield, confidence),
            action,
            predicted_yield,
            confidence,
            risk_score,
        };

        debug!(agent_id = %agent_id, decision = %decision, "Predictor produced decision");
        Ok(decision)
    }

    fn name(&self) -> &str {
        MODEL_NAME
    }
}

// ---------------------------------------------------------------------------
// Decision shaping
// ---------------------------------------------------------------------------

/// Concentration risk of the current positions (0–1).
fn position_risk(positions: &HashMap<String, Position>, portfolio_value: Decimal) -> f64 {
    if positions.is_empty() || portfolio_value <= Decimal::ZERO {
        return 0.0;
    }
    let largest = positions
        .values()
        .map(|p| p.size)
        .max()
        .unwrap_or(Decimal::ZERO);
    let concentration = (largest / portfolio_value).to_f64().unwrap_or(0.0);
    (concentration * 2.0).min(1.0)
}

/// Map a yield prediction onto a strategy action given current holdings.
fn select_action(
    predicted_yield: f64,
    context: &MarketContext,
    config: &AgentConfig,
) -> StrategyAction {
    let sol_balance = context.portfolio.sol_balance;
    let sol_balance_f = sol_balance.to_f64().unwrap_or(0.0);
    let portfolio_value = context.portfolio.total_value_usd.to_f64().unwrap_or(0.0);
    let risk_tolerance = config.risk_level.score();
    let sol_price = context.price(SOL_MINT).unwrap_or(Decimal::ONE);

    if predicted_yield > 0.05 && risk_tolerance > 0.7 {
        // High prediction and appetite: rotate half the SOL into USDC and
        // lend it out in one sequence.
        let swap_amount = sol_balance * Decimal::new(5, 1);
        return StrategyAction::MultiHop {
            steps: vec![
                StrategyAction::Swap {
                    from_token: SOL_MINT.to_string(),
                    to_token: USDC_MINT.to_string(),
                    amount: swap_amount,
                    slippage_bps: 100,
                },
                StrategyAction::Lending {
                    action: LendingAction::Deposit,
                    token: USDC_MINT.to_string(),
                    amount: swap_amount * sol_price,
                    protocol: Protocol::Marginfi,
                },
            ],
        };
    }

    if predicted_yield > 0.02 && sol_balance_f > 5.0 {
        return StrategyAction::YieldFarming {
            action: FarmAction::Stake,
            farm_id: "RAY-SOL".to_string(),
            token: Some(SOL_MINT.to_string()),
            amount: sol_balance * Decimal::new(3, 1),
            protocol: Protocol::Raydium,
        };
    }

    if predicted_yield > 0.01 && portfolio_value > 100.0 {
        let conservative = (sol_balance * Decimal::new(4, 1))
            .min(context.portfolio.total_value_usd * Decimal::new(2, 1));
        return StrategyAction::Lending {
            action: LendingAction::Deposit,
            token: SOL_MINT.to_string(),
            amount: conservative,
            protocol: Protocol::Marginfi,
        };
    }

    if sol_balance_f > 1.0 && context.prices.len() >= 2 {
        return StrategyAction::Swap {
            from_token: SOL_MINT.to_string(),
            to_token: USDC_MINT.to_string(),
            amount: sol_balance * Decimal::new(1, 1),
            slippage_bps: 50,
        };
    }

    StrategyAction::Hold
}

/// Confidence from prediction magnitude and context quality.
fn confidence_for(predicted_yield: f64, context: &MarketContext) -> f64 {
    let mut confidence = (predicted_yield * 10.0).min(0.8);
    if context.portfolio.total_value_usd > Decimal::from(100) {
        confidence += 0.1;
    }
    if context.protocols.len() >= 3 {
        confidence += 0.1;
    }
    confidence.min(0.95)
}

/// Risk of the proposed action: family baseline plus committed-amount ratio.
fn risk_score_for(action: &StrategyAction, config: &AgentConfig) -> f64 {
    let base = match action {
        StrategyAction::Hold => 0.0,
        StrategyAction::Swap { .. } => 0.2,
        StrategyAction::Lending { .. } => 0.3,
        StrategyAction::LiquidityProvision { .. } => 0.5,
        StrategyAction::YieldFarming { .. } => 0.6,
        StrategyAction::MultiHop { .. } => 0.8,
    };

    let committed = action_amount(action);
    let amount_risk = if config.max_investment > Decimal::ZERO {
        (committed / config.max_investment).to_f64().unwrap_or(0.0)
    } else {
        0.0
    };

    (base + amount_risk.min(0.3)).min(1.0)
}

/// Total amount committed by an action, summed across steps.
fn action_amount(action: &StrategyAction) -> Decimal {
    match action {
        StrategyAction::Hold => Decimal::ZERO,
        StrategyAction::Swap { amount, .. } => *amount,
        StrategyAction::Lending { amount, .. } => *amount,
        StrategyAction::LiquidityProvision {
            amount_a, amount_b, ..
        } => *amount_a + *amount_b,
        StrategyAction::YieldFarming { amount, .. } => *amount,
        StrategyAction::MultiHop { steps } => steps.iter().map(action_amount).sum(),
    }
}

/// When to check back, in minutes. Better opportunities are re-checked
/// sooner.
fn next_check_for(predicted_yield: f64, confidence: f64) -> i64 {
    if predicted_yield > 0.05 && confidence > 0.8 {
        1
    } else if predicted_yield > 0.02 && confidence > 0.6 {
        5
    } else if predicted_yield > 0.01 {
        15
    } else {
        30
    }
}

/// Execution gate: the yield must clear the agent's threshold, the model
/// must be reasonably confident, and the action's risk must fit the
/// agent's tolerance (with a small allowance).
fn should_execute(
    predicted_yield: f64,
    confidence: f64,
    risk_score: f64,
    config: &AgentConfig,
) -> bool {
    if predicted_yield < config.min_profit_threshold {
        return false;
    }
    if confidence < 0.5 {
        return false;
    }
    if risk_score > config.risk_level.score() + 0.2 {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
