//! Cross-outcome mispricing detection.
//!
//! A binary market whose YES and NO asks sum to less than 1 can be bought
//! on both sides for a locked-in payout of 1 per share pair. The edge is the
//! shortfall of the combined ask, in basis points.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use super::Strategy;
use crate::config::StrategySection;
use crate::types::{d, MarketSnapshot, Opportunity, BPS};

// ---------------------------------------------------------------------------
// Configuration (defaults, overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Minimum edge to report, in basis points.
    pub min_edge_bps: Decimal,
    /// Hard cap on recommended trade size.
    pub max_trade_usd: Decimal,
    /// Share of reported market liquidity one trade may consume.
    pub max_liquidity_fraction: Decimal,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            min_edge_bps: dec!(50),
            max_trade_usd: dec!(50),
            max_liquidity_fraction: dec!(0.05),
        }
    }
}

impl From<&StrategySection> for EdgeConfig {
    fn from(cfg: &StrategySection) -> Self {
        Self {
            min_edge_bps: d(cfg.min_edge_bps),
            max_trade_usd: d(cfg.max_trade_usd),
            max_liquidity_fraction: d(cfg.max_liquidity_fraction),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

pub struct CrossOutcomeStrategy {
    config: EdgeConfig,
}

impl CrossOutcomeStrategy {
    pub fn new(config: EdgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// Evaluate one snapshot; `None` when there is no tradable edge.
    pub fn evaluate(&self, snapshot: &MarketSnapshot) -> Option<Opportunity> {
        let yes_ask = snapshot.yes.best_ask;
        let no_ask = snapshot.no.best_ask;

        // A zeroed side is a failed or empty book, not a free outcome.
        if yes_ask <= Decimal::ZERO || no_ask <= Decimal::ZERO {
            return None;
        }

        let cost = yes_ask + no_ask;
        if cost >= Decimal::ONE {
            return None;
        }

        let edge_bps = (Decimal::ONE - cost) * BPS;
        if edge_bps < self.config.min_edge_bps {
            debug!(
                market_id = %snapshot.market.id,
                edge_bps = %edge_bps.round_dp(1),
                "Edge below threshold"
            );
            return None;
        }

        let liquidity = snapshot.market.liquidity_usd;
        let size = if liquidity > Decimal::ZERO {
            (liquidity * self.config.max_liquidity_fraction).min(self.config.max_trade_usd)
        } else {
            self.config.max_trade_usd
        };
        if size <= Decimal::ZERO {
            return None;
        }

        // `size` buys size/cost share pairs, each paying out 1.
        let est_profit = size * (Decimal::ONE - cost) / cost;
        let spread = (snapshot.yes.spread() + snapshot.no.spread()) / dec!(2);

        Some(Opportunity {
            market_id: snapshot.market.id.clone(),
            yes_token_id: snapshot.market.yes_token_id.clone(),
            no_token_id: snapshot.market.no_token_id.clone(),
            yes_ask,
            no_ask,
            edge_bps,
            est_profit_usd: est_profit.round_dp(6),
            recommended_size_usd: size.round_dp(2),
            liquidity_usd: liquidity,
            spread,
        })
    }
}

#[async_trait]
impl Strategy for CrossOutcomeStrategy {
    async fn find_opportunities(
        &self,
        snapshots: &[MarketSnapshot],
        _now: DateTime<Utc>,
    ) -> Result<Vec<Opportunity>> {
        Ok(snapshots.iter().filter_map(|s| self.evaluate(s)).collect())
    }

    fn name(&self) -> &str {
        "cross_outcome"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
