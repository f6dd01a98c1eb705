//! Trade executor.
//!
//! Defines the `TradeExecutor` trait the engine submits plans through, and
//! the paper executor used until live CLOB signing is wired in.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use crate::types::{ExecutionPlan, ExecutionResult};

/// Submits an execution plan and reports a terminal status.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn execute(&self, plan: &ExecutionPlan, now: DateTime<Utc>) -> Result<ExecutionResult>;
}

/// Simulates submission: validates the plan and returns `dry_run` with a
/// synthetic transaction hash.
#[derive(Debug, Default)]
pub struct PaperExecutor;

impl PaperExecutor {
    pub fn new() -> Self {
        Self
    }

    fn validate(plan: &ExecutionPlan) -> Option<&'static str> {
        let in_range = |p: Decimal| p > Decimal::ZERO && p < dec!(1);
        if plan.size_usd() <= Decimal::ZERO {
            Some("invalid_plan: non-positive size")
        } else if !in_range(plan.yes_ask()) || !in_range(plan.no_ask()) {
            Some("invalid_plan: ask out of range")
        } else {
            None
        }
    }
}

#[async_trait]
impl TradeExecutor for PaperExecutor {
    async fn execute(&self, plan: &ExecutionPlan, now: DateTime<Utc>) -> Result<ExecutionResult> {
        if let Some(reason) = Self::validate(plan) {
            return Ok(ExecutionResult::rejected(reason));
        }

        let tx_hash = format!("dry-run-{}", uuid::Uuid::new_v4());
        info!(
            market_id = plan.market_id(),
            yes_ask = %plan.yes_ask(),
            no_ask = %plan.no_ask(),
            size = format!("${:.2}", plan.size_usd()),
            tx_hash = %tx_hash,
            at = %now.to_rfc3339(),
            "[DRY RUN] Would buy both outcomes"
        );
        Ok(ExecutionResult::dry_run(tx_hash))
    }
}
