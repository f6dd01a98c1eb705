//! Market data providers.
//!
//! Defines the `MarketDataProvider` trait consumed by the engine and
//! provides the Polymarket (Gamma + CLOB) implementation.

pub mod polymarket;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Market, OrderBookTop, ProviderError};

/// Source of active markets and per-token order book tops.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetch the list of markets to scan this cycle.
    async fn active_markets(&self) -> Result<Vec<Market>>;

    /// Fetch the best ask/bid for a single outcome token.
    ///
    /// Returns `ProviderError::NotFound` for delisted or invalid tokens;
    /// any other variant signals an infrastructure failure.
    async fn order_book_top(&self, token_id: &str) -> Result<OrderBookTop, ProviderError>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
