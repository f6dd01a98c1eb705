//! Safe order book fetch.
//!
//! Wraps a provider's single-token lookup and classifies the result:
//! a missing order book (delisted or invalid token) is recoverable and
//! yields the zeroed sentinel; anything else is fatal to the current scan.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::platforms::MarketDataProvider;
use crate::types::{ArbiterError, OrderBookTop, ProviderError};

/// Classified result of one order book lookup.
#[derive(Debug)]
pub enum FetchOutcome {
    Ok(OrderBookTop),
    Recoverable { reason: String },
    Fatal(anyhow::Error),
}

impl FetchOutcome {
    pub fn is_failed(&self) -> bool {
        !matches!(self, FetchOutcome::Ok(_))
    }

    /// Split into `(top, failed)`, propagating fatal errors.
    pub fn into_top(self) -> anyhow::Result<(OrderBookTop, bool)> {
        match self {
            FetchOutcome::Ok(top) => Ok((top, false)),
            FetchOutcome::Recoverable { .. } => Ok((OrderBookTop::ZERO, true)),
            FetchOutcome::Fatal(e) => Err(e),
        }
    }
}

pub struct SafeFetcher {
    provider: Arc<dyn MarketDataProvider>,
    timeout: Option<Duration>,
}

impl SafeFetcher {
    pub fn new(provider: Arc<dyn MarketDataProvider>, timeout: Option<Duration>) -> Self {
        Self { provider, timeout }
    }

    /// Fetch the top of book for `token_id`, a side of `market_id`.
    pub async fn fetch_top(&self, token_id: &str, market_id: &str) -> FetchOutcome {
        let lookup = self.provider.order_book_top(token_id);
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, lookup).await {
                Ok(result) => result,
                Err(_) => {
                    return FetchOutcome::Fatal(
                        ArbiterError::Timeout {
                            call: "order_book_top",
                            after_ms: limit.as_millis() as u64,
                        }
                        .into(),
                    )
                }
            },
            None => lookup.await,
        };

        match result {
            Ok(top) => FetchOutcome::Ok(top),
            Err(ProviderError::NotFound(reason)) => {
                warn!(
                    token_id,
                    market_id,
                    reason = %reason,
                    "Order book not found, using zeroed top"
                );
                FetchOutcome::Recoverable { reason }
            }
            Err(e) => FetchOutcome::Fatal(
                anyhow::Error::new(e)
                    .context(format!("order book fetch failed for token {token_id} ({market_id})")),
            ),
        }
    }
}
