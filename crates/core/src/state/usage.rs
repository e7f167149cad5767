//! Usage ledger and budget gate.
//!
//! Cumulative token and cost totals live in a single database row. The
//! budget gate is checked once, before pipeline entry; it is the only
//! error that may reject a request outright.

use crate::models::TokenUsage;
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Per-million-token USD prices
struct ModelPricing {
    input: f64,
    output: f64,
}

/// Known model prices; unknown models cost nothing rather than guessing.
fn pricing(model_id: &str) -> Option<ModelPricing> {
    let (input, output) = match model_id {
        "gemini-3-pro-preview" => (2.0, 12.0),
        "gemini-2.5-pro" => (1.25, 10.0),
        "gemini-2.5-flash" => (0.30, 2.50),
        "gemini-2.5-flash-lite" => (0.10, 0.40),
        "gemini-2.0-flash" => (0.10, 0.40),
        "grok-3" => (3.0, 15.0),
        "gpt-4o" => (2.50, 10.0),
        "o4-mini" => (1.10, 4.40),
        _ => return None,
    };
    Some(ModelPricing { input, output })
}

/// USD cost of one call
pub fn calculate_cost(model_id: &str, usage: &TokenUsage) -> f64 {
    match pricing(model_id) {
        Some(p) => {
            (usage.input_tokens as f64 / 1_000_000.0) * p.input
                + (usage.output_tokens as f64 / 1_000_000.0) * p.output
        }
        None => 0.0,
    }
}

/// Cumulative totals across all requests
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
}

/// Persistent ledger over the usage_totals row
pub struct UsageLedger {
    conn: Arc<Mutex<Connection>>,
}

impl UsageLedger {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Record one model call's usage and its cost
    pub fn record(&self, model_id: &str, usage: &TokenUsage) -> Result<()> {
        let cost = calculate_cost(model_id, usage);
        let conn = self.lock()?;
        conn.execute(
            "UPDATE usage_totals SET total_input_tokens = total_input_tokens + ?1, \
             total_output_tokens = total_output_tokens + ?2, \
             total_cost_usd = total_cost_usd + ?3 WHERE id = 1",
            params![usage.input_tokens as i64, usage.output_tokens as i64, cost],
        )
        .context("Failed to record usage")?;
        Ok(())
    }

    pub fn totals(&self) -> Result<UsageTotals> {
        let conn = self.lock()?;
        let totals = conn.query_row(
            "SELECT total_input_tokens, total_output_tokens, total_cost_usd \
             FROM usage_totals WHERE id = 1",
            [],
            |row| {
                Ok(UsageTotals {
                    total_input_tokens: row.get::<_, i64>(0)? as u64,
                    total_output_tokens: row.get::<_, i64>(1)? as u64,
                    total_cost_usd: row.get(2)?,
                })
            },
        )?;
        Ok(totals)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock error: {}", e))
    }
}

/// Request rejected because the budget cap is already spent
#[derive(Debug, thiserror::Error)]
#[error("Budget exceeded: ${spent_usd:.2} spent of ${limit_usd:.2} limit")]
pub struct BudgetExceeded {
    pub spent_usd: f64,
    pub limit_usd: f64,
}

/// Hard spending cap checked before pipeline entry
#[derive(Debug, Clone, Copy)]
pub struct BudgetGate {
    pub max_budget_usd: f64,
}

impl Default for BudgetGate {
    fn default() -> Self {
        let max_budget_usd = std::env::var("MAX_BUDGET_USD")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5.0);
        Self { max_budget_usd }
    }
}

impl BudgetGate {
    pub fn check(&self, totals: &UsageTotals) -> Result<(), BudgetExceeded> {
        if totals.total_cost_usd >= self.max_budget_usd {
            return Err(BudgetExceeded {
                spent_usd: totals.total_cost_usd,
                limit_usd: self.max_budget_usd,
            });
        }
        Ok(())
    }
}
