//! Polymarket integration.
//!
//! Uses the Gamma API for market discovery and the CLOB API for order book
//! tops. Both are unauthenticated reads.
//!
//! Gamma API: https://gamma-api.polymarket.com
//! CLOB API: https://clob.polymarket.com

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PolymarketSection;
use crate::platforms::MarketDataProvider;
use crate::types::{d, Market, OrderBookTop, ProviderError};

/// Body fragment the CLOB returns for unknown or delisted tokens.
const NO_ORDERBOOK: &str = "No orderbook exists";

// ---------------------------------------------------------------------------
// Gamma API response types (market discovery)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, Default)]
pub struct GammaMarket {
    #[serde(default)]
    pub question: String,
    #[serde(default, rename = "conditionId")]
    pub condition_id: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    /// Token ids as a JSON-encoded string: "[\"123\",\"456\"]"
    #[serde(default, rename = "clobTokenIds")]
    pub clob_token_ids: Option<String>,
    #[serde(default, rename = "liquidityNum")]
    pub liquidity_num: Option<f64>,
    #[serde(default, rename = "enableOrderBook")]
    pub enable_order_book: Option<bool>,
}

// ---------------------------------------------------------------------------
// CLOB API response types (order books)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct BookLevel {
    pub price: String,
    #[serde(default)]
    pub size: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BookResponse {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl BookResponse {
    /// Lowest ask and highest bid; an empty side reads as zero.
    pub fn top(&self) -> Result<OrderBookTop, ProviderError> {
        let asks = Self::prices(&self.asks)?;
        let bids = Self::prices(&self.bids)?;
        Ok(OrderBookTop {
            best_ask: asks.iter().copied().min().unwrap_or(Decimal::ZERO),
            best_bid: bids.iter().copied().max().unwrap_or(Decimal::ZERO),
        })
    }

    fn prices(levels: &[BookLevel]) -> Result<Vec<Decimal>, ProviderError> {
        levels
            .iter()
            .map(|level| {
                Decimal::from_str(level.price.trim())
                    .map_err(|e| ProviderError::Decode(format!("bad price {:?}: {e}", level.price)))
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketClient {
    http: Client,
    gamma_url: String,
    clob_url: String,
    market_limit: u32,
}

impl PolymarketClient {
    pub fn new(cfg: &PolymarketSection) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(cfg.http_timeout_secs))
            .build()
            .context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            gamma_url: cfg.gamma_url.trim_end_matches('/').to_string(),
            clob_url: cfg.clob_url.trim_end_matches('/').to_string(),
            market_limit: cfg.market_limit,
        })
    }

    /// Fetch active markets from the Gamma API.
    pub async fn fetch_gamma_markets(&self) -> Result<Vec<GammaMarket>> {
        let url = format!("{}/markets", self.gamma_url);
        debug!(url = %url, "Fetching Polymarket markets from Gamma API");

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("active", "true"),
                ("closed", "false"),
                ("limit", &self.market_limit.to_string()),
            ])
            .send()
            .await
            .context("Gamma API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Gamma API error {status}: {body}");
        }

        let markets: Vec<GammaMarket> = resp
            .json()
            .await
            .context("Failed to parse Gamma markets response")?;

        debug!(count = markets.len(), "Fetched raw Gamma markets");
        Ok(markets)
    }

    /// Convert a Gamma market into a binary `Market`.
    ///
    /// Returns `None` for closed markets, markets without an order book,
    /// and markets that do not have exactly two outcome tokens.
    pub fn convert_market(gm: &GammaMarket) -> Option<Market> {
        if gm.condition_id.is_empty() || gm.closed || gm.enable_order_book == Some(false) {
            return None;
        }

        let tokens = Self::parse_token_ids(gm.clob_token_ids.as_deref()?)?;
        let [yes, no] = <[String; 2]>::try_from(tokens).ok()?;

        Some(Market {
            id: gm.condition_id.clone(),
            yes_token_id: yes,
            no_token_id: no,
            question: gm.question.clone(),
            liquidity_usd: gm.liquidity_num.map(d).unwrap_or(Decimal::ZERO),
        })
    }

    /// Parse Gamma's JSON-in-a-string token list: "[\"1\",\"2\"]".
    pub fn parse_token_ids(s: &str) -> Option<Vec<String>> {
        let ids: Vec<String> = serde_json::from_str(s).ok()?;
        if ids.iter().any(|id| id.trim().is_empty()) {
            return None;
        }
        Some(ids)
    }

    /// Map a non-success CLOB response to the matching provider error.
    fn classify_book_error(token_id: &str, status: StatusCode, body: String) -> ProviderError {
        if status == StatusCode::NOT_FOUND || body.contains(NO_ORDERBOOK) {
            ProviderError::NotFound(token_id.to_string())
        } else {
            ProviderError::Status {
                status: status.as_u16(),
                body,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MarketDataProvider trait implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl MarketDataProvider for PolymarketClient {
    async fn active_markets(&self) -> Result<Vec<Market>> {
        let gamma_markets = self.fetch_gamma_markets().await?;
        let markets: Vec<Market> = gamma_markets
            .iter()
            .filter_map(Self::convert_market)
            .collect();

        info!(
            raw = gamma_markets.len(),
            binary = markets.len(),
            "Polymarket markets loaded"
        );
        Ok(markets)
    }

    async fn order_book_top(&self, token_id: &str) -> Result<OrderBookTop, ProviderError> {
        let url = format!("{}/book", self.clob_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_book_error(token_id, status, body));
        }

        let book: BookResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        book.top()
    }

    fn name(&self) -> &str {
        "polymarket"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
