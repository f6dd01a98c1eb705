//! Strategy layer: opportunity detection and the risk gate.
//!
//! The engine consumes both through traits: `Strategy` turns market
//! snapshots into rankable opportunities, `risk::RiskManager` decides
//! whether each one may proceed.

pub mod edge;
pub mod risk;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{MarketSnapshot, Opportunity};

/// Detects opportunities from the current cycle's snapshots.
///
/// Implementations should be pure functions of `snapshots` and `now`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn find_opportunities(
        &self,
        snapshots: &[MarketSnapshot],
        now: DateTime<Utc>,
    ) -> Result<Vec<Opportunity>>;

    /// Strategy name for logging.
    fn name(&self) -> &str;
}
