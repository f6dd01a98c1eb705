//! Shared types for the ARBITER engine.
//!
//! These types form the data model passed between the market data
//! provider, strategy, risk manager, executor, and decision log. Nothing
//! here is persisted across cycles except `DecisionRecord`.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Basis points in one unit of price.
pub const BPS: Decimal = dec!(10000);

/// Convert an `f64` (typically from config) into a `Decimal`, falling back
/// to zero for NaN/infinite inputs.
pub fn d(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// One binary contract: a market id plus the token ids of its YES and NO
/// outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    /// Human-readable question, when the provider supplies one.
    #[serde(default)]
    pub question: String,
    /// Provider-reported liquidity in USD (zero when unknown).
    #[serde(default)]
    pub liquidity_usd: Decimal,
}

impl Market {
    pub fn new(id: &str, yes_token_id: &str, no_token_id: &str) -> Self {
        Self {
            id: id.to_string(),
            yes_token_id: yes_token_id.to_string(),
            no_token_id: no_token_id.to_string(),
            question: String::new(),
            liquidity_usd: Decimal::ZERO,
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.question.is_empty() {
            write!(f, "{} (YES {} | NO {})", self.id, self.yes_token_id, self.no_token_id)
        } else {
            write!(f, "{} [{}]", self.question, self.id)
        }
    }
}

/// Best ask and best bid for one token at fetch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrderBookTop {
    pub best_ask: Decimal,
    pub best_bid: Decimal,
}

impl OrderBookTop {
    /// Sentinel used when a side could not be fetched.
    pub const ZERO: OrderBookTop = OrderBookTop {
        best_ask: Decimal::ZERO,
        best_bid: Decimal::ZERO,
    };

    pub fn new(best_ask: Decimal, best_bid: Decimal) -> Self {
        Self { best_ask, best_bid }
    }

    /// Ask minus bid, or zero when either side of the book is empty.
    pub fn spread(&self) -> Decimal {
        if self.best_ask.is_zero() || self.best_bid.is_zero() {
            Decimal::ZERO
        } else {
            (self.best_ask - self.best_bid).max(Decimal::ZERO)
        }
    }
}

impl fmt::Display for OrderBookTop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ask={} bid={}", self.best_ask, self.best_bid)
    }
}

/// A market joined with the tops of both of its books for one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub market: Market,
    pub yes: OrderBookTop,
    pub no: OrderBookTop,
    pub yes_failed: bool,
    pub no_failed: bool,
}

impl MarketSnapshot {
    /// Number of sides whose fetch failed (0, 1, or 2).
    pub fn failed_sides(&self) -> usize {
        usize::from(self.yes_failed) + usize::from(self.no_failed)
    }

    pub fn is_complete(&self) -> bool {
        !self.yes_failed && !self.no_failed
    }
}

// ---------------------------------------------------------------------------
// Opportunities & execution
// ---------------------------------------------------------------------------

/// A detected cross-outcome arbitrage candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub market_id: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub yes_ask: Decimal,
    pub no_ask: Decimal,
    /// Mispricing of the combined asks in basis points.
    pub edge_bps: Decimal,
    pub est_profit_usd: Decimal,
    pub recommended_size_usd: Decimal,
    pub liquidity_usd: Decimal,
    pub spread: Decimal,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} yes={} no={} edge={}bps profit=${:.2} size=${:.2}",
            self.market_id,
            self.yes_ask,
            self.no_ask,
            self.edge_bps.round_dp(1),
            self.est_profit_usd,
            self.recommended_size_usd,
        )
    }
}

/// The tradable projection of an opportunity handed to the executor.
///
/// Fields are private so a plan cannot be altered once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    market_id: String,
    yes_token_id: String,
    no_token_id: String,
    yes_ask: Decimal,
    no_ask: Decimal,
    size_usd: Decimal,
    edge_bps: Decimal,
    est_profit_usd: Decimal,
}

impl ExecutionPlan {
    pub fn from_opportunity(opportunity: &Opportunity) -> Self {
        Self {
            market_id: opportunity.market_id.clone(),
            yes_token_id: opportunity.yes_token_id.clone(),
            no_token_id: opportunity.no_token_id.clone(),
            yes_ask: opportunity.yes_ask,
            no_ask: opportunity.no_ask,
            size_usd: opportunity.recommended_size_usd,
            edge_bps: opportunity.edge_bps,
            est_profit_usd: opportunity.est_profit_usd,
        }
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn yes_token_id(&self) -> &str {
        &self.yes_token_id
    }

    pub fn no_token_id(&self) -> &str {
        &self.no_token_id
    }

    pub fn yes_ask(&self) -> Decimal {
        self.yes_ask
    }

    pub fn no_ask(&self) -> Decimal {
        self.no_ask
    }

    pub fn size_usd(&self) -> Decimal {
        self.size_usd
    }

    pub fn edge_bps(&self) -> Decimal {
        self.edge_bps
    }

    pub fn est_profit_usd(&self) -> Decimal {
        self.est_profit_usd
    }
}

/// Terminal status reported by a trade executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Submitted,
    DryRun,
    Rejected,
    Failed,
}

impl ExecutionStatus {
    /// Whether the engine treats this status as a successful trade.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Submitted | ExecutionStatus::DryRun)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Submitted => "submitted",
            ExecutionStatus::DryRun => "dry_run",
            ExecutionStatus::Rejected => "rejected",
            ExecutionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub reason: Option<String>,
    #[serde(default)]
    pub tx_hashes: Vec<String>,
}

impl ExecutionResult {
    pub fn submitted(tx_hashes: Vec<String>) -> Self {
        Self {
            status: ExecutionStatus::Submitted,
            reason: None,
            tx_hashes,
        }
    }

    pub fn dry_run(tx_hash: String) -> Self {
        Self {
            status: ExecutionStatus::DryRun,
            reason: None,
            tx_hashes: vec![tx_hash],
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self {
            status: ExecutionStatus::Rejected,
            reason: Some(reason.to_string()),
            tx_hashes: Vec::new(),
        }
    }

    pub fn failed(reason: &str) -> Self {
        Self {
            status: ExecutionStatus::Failed,
            reason: Some(reason.to_string()),
            tx_hashes: Vec::new(),
        }
    }

    /// The reason to report on failure: the explicit reason, else the status.
    pub fn failure_reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| self.status.as_str().to_string())
    }
}

// ---------------------------------------------------------------------------
// Risk gate
// ---------------------------------------------------------------------------

/// Answer from the risk manager's admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl RiskDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: &str) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasCheck {
    pub ok: bool,
}

// ---------------------------------------------------------------------------
// Decision records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Skip,
    Trade,
}

impl fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionAction::Skip => write!(f, "skip"),
            DecisionAction::Trade => write!(f, "trade"),
        }
    }
}

/// One audit row per admitted-or-skipped opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Serialised as RFC 3339.
    pub timestamp: DateTime<Utc>,
    pub market_id: String,
    pub yes_ask: Decimal,
    pub no_ask: Decimal,
    pub edge_bps: Decimal,
    pub liquidity_usd: Decimal,
    pub spread: Decimal,
    pub est_profit_usd: Decimal,
    pub action: DecisionAction,
    pub reason: Option<String>,
    pub planned_size_usd: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub status: Option<ExecutionStatus>,
}

impl DecisionRecord {
    fn base(opportunity: &Opportunity, now: DateTime<Utc>, action: DecisionAction) -> Self {
        Self {
            timestamp: now,
            market_id: opportunity.market_id.clone(),
            yes_ask: opportunity.yes_ask,
            no_ask: opportunity.no_ask,
            edge_bps: opportunity.edge_bps,
            liquidity_usd: opportunity.liquidity_usd,
            spread: opportunity.spread,
            est_profit_usd: opportunity.est_profit_usd,
            action,
            reason: None,
            planned_size_usd: None,
            tx_hash: None,
            status: None,
        }
    }

    /// A skip decided before anything was submitted.
    pub fn skip(opportunity: &Opportunity, now: DateTime<Utc>, reason: &str) -> Self {
        Self {
            reason: Some(reason.to_string()),
            ..Self::base(opportunity, now, DecisionAction::Skip)
        }
    }

    /// A skip after the executor reported a non-successful status.
    pub fn failed_execution(
        opportunity: &Opportunity,
        plan: &ExecutionPlan,
        now: DateTime<Utc>,
        result: &ExecutionResult,
    ) -> Self {
        Self {
            reason: Some(result.failure_reason()),
            planned_size_usd: Some(plan.size_usd()),
            status: Some(result.status),
            ..Self::base(opportunity, now, DecisionAction::Skip)
        }
    }

    pub fn trade(
        opportunity: &Opportunity,
        plan: &ExecutionPlan,
        now: DateTime<Utc>,
        result: &ExecutionResult,
    ) -> Self {
        Self {
            planned_size_usd: Some(plan.size_usd()),
            tx_hash: result.tx_hashes.first().cloned(),
            status: Some(result.status),
            ..Self::base(opportunity, now, DecisionAction::Trade)
        }
    }
}

impl fmt::Display for DecisionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} edge={}bps profit=${:.2}",
            self.timestamp.to_rfc3339(),
            self.action,
            self.market_id,
            self.edge_bps.round_dp(1),
            self.est_profit_usd,
        )?;
        if let Some(reason) = &self.reason {
            write!(f, " reason={reason}")?;
        }
        if let Some(tx) = &self.tx_hash {
            write!(f, " tx={tx}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by a market data provider's orderbook lookup.
///
/// `NotFound` is the one recoverable case: the token is delisted or
/// invalid and the rest of the scan can proceed without it.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Order book not found for token {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Domain-specific error types for ARBITER.
#[derive(Debug, thiserror::Error)]
pub enum ArbiterError {
    #[error("{call} timed out after {after_ms}ms")]
    Timeout { call: &'static str, after_ms: u64 },

    #[error("Concurrency limiter closed")]
    LimiterClosed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
