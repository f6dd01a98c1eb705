//! In-memory collaborators for integration testing.
//!
//! A deterministic market data provider with controllable books, plus a
//! recording executor and decision logger. Everything is in-memory with
//! no external dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arbiter::engine::executor::TradeExecutor;
use arbiter::platforms::MarketDataProvider;
use arbiter::storage::DecisionLogger;
use arbiter::types::*;

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// A mock market data provider.
///
/// Books default to an unpriced top; tokens listed as missing answer
/// `NotFound`, tokens listed as broken answer a 500.
pub struct MockProvider {
    markets: Vec<Market>,
    books: HashMap<String, OrderBookTop>,
    missing: HashSet<String>,
    broken: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    book_calls: AtomicUsize,
    /// If set, `active_markets` returns this error.
    force_error: Arc<Mutex<Option<String>>>,
}

impl MockProvider {
    pub fn new(markets: Vec<Market>) -> Self {
        Self {
            markets,
            books: HashMap::new(),
            missing: HashSet::new(),
            broken: HashSet::new(),
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            book_calls: AtomicUsize::new(0),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the best ask for a token (best bid one cent below).
    pub fn with_ask(mut self, token_id: &str, ask: f64) -> Self {
        let ask = d(ask);
        let bid = (ask - d(0.01)).max(rust_decimal::Decimal::ZERO);
        self.books.insert(token_id.to_string(), OrderBookTop::new(ask, bid));
        self
    }

    pub fn with_missing(mut self, token_id: &str) -> Self {
        self.missing.insert(token_id.to_string());
        self
    }

    pub fn with_broken(mut self, token_id: &str) -> Self {
        self.broken.insert(token_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Highest number of concurrent `order_book_top` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn book_calls(&self) -> usize {
        self.book_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    async fn active_markets(&self) -> Result<Vec<Market>> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(self.markets.clone())
    }

    async fn order_book_top(&self, token_id: &str) -> Result<OrderBookTop, ProviderError> {
        self.book_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.missing.contains(token_id) {
            return Err(ProviderError::NotFound(format!(
                "No orderbook exists for the requested token id {token_id}"
            )));
        }
        if self.broken.contains(token_id) {
            return Err(ProviderError::Status {
                status: 500,
                body: "internal error".into(),
            });
        }
        Ok(self.books.get(token_id).copied().unwrap_or(OrderBookTop::ZERO))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Records every plan it is handed. Markets in `reject` come back
/// rejected; markets in `explode` raise an error.
#[derive(Default)]
pub struct RecordingExecutor {
    plans: Mutex<Vec<String>>,
    reject: HashMap<String, String>,
    explode: HashSet<String>,
    delay: Duration,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, market_id: &str, reason: &str) -> Self {
        self.reject.insert(market_id.to_string(), reason.to_string());
        self
    }

    pub fn exploding(mut self, market_id: &str) -> Self {
        self.explode.insert(market_id.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Market ids in submission order.
    pub fn submitted(&self) -> Vec<String> {
        self.plans.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeExecutor for RecordingExecutor {
    async fn execute(&self, plan: &ExecutionPlan, _now: DateTime<Utc>) -> Result<ExecutionResult> {
        self.plans.lock().unwrap().push(plan.market_id().to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.explode.contains(plan.market_id()) {
            return Err(anyhow!("signer unavailable"));
        }
        if let Some(reason) = self.reject.get(plan.market_id()) {
            return Ok(ExecutionResult::rejected(reason));
        }
        Ok(ExecutionResult::submitted(vec![format!(
            "0x{}",
            plan.market_id().to_lowercase()
        )]))
    }
}

// ---------------------------------------------------------------------------
// Decision logger
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryDecisionLogger {
    records: Mutex<Vec<DecisionRecord>>,
}

impl MemoryDecisionLogger {
    pub fn records(&self) -> Vec<DecisionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn reasons_for(&self, market_id: &str) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|r| r.market_id == market_id)
            .filter_map(|r| r.reason)
            .collect()
    }
}

#[async_trait]
impl DecisionLogger for MemoryDecisionLogger {
    async fn append(&self, record: &DecisionRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_books_and_failures() {
        let provider = MockProvider::new(vec![Market::new("M1", "Y1", "N1")])
            .with_ask("Y1", 0.45)
            .with_missing("N1")
            .with_broken("X");

        assert_eq!(provider.order_book_top("Y1").await.unwrap().best_ask, d(0.45));
        assert!(matches!(
            provider.order_book_top("N1").await,
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            provider.order_book_top("X").await,
            Err(ProviderError::Status { status: 500, .. })
        ));
        assert_eq!(provider.order_book_top("unknown").await.unwrap(), OrderBookTop::ZERO);
        assert_eq!(provider.book_calls(), 4);
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let provider = MockProvider::new(vec![Market::new("M1", "Y1", "N1")]);
        provider.set_error("gamma unreachable");
        assert!(provider.active_markets().await.is_err());

        provider.clear_error();
        assert_eq!(provider.active_markets().await.unwrap().len(), 1);
    }
}
