//! Risk manager.
//!
//! Defines the admission gate the engine consults before every trade, and
//! `LimitsRiskManager`, a config-driven implementation enforcing a profit
//! floor, an open-exposure cap, per-market cooldown, a consecutive-failure
//! circuit breaker, and a gas floor.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RiskSection;
use crate::types::{d, GasCheck, Opportunity, RiskDecision};

/// Admission control consulted by the engine, one opportunity at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RiskManager: Send + Sync {
    async fn can_execute(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Result<RiskDecision>;

    async fn ensure_gas_balance(&self, now: DateTime<Utc>) -> Result<GasCheck>;

    async fn on_trade_submitted(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Result<()>;

    async fn on_trade_success(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Result<()>;

    async fn on_trade_failure(
        &self,
        opportunity: &Opportunity,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Rejection reasons
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    MinProfit,
    ExposureLimit,
    MarketCooldown,
    CircuitOpen,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MinProfit => write!(f, "MIN_PROFIT"),
            RejectionReason::ExposureLimit => write!(f, "EXPOSURE_LIMIT"),
            RejectionReason::MarketCooldown => write!(f, "MARKET_COOLDOWN"),
            RejectionReason::CircuitOpen => write!(f, "CIRCUIT_OPEN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub min_profit_usd: Decimal,
    pub max_exposure_usd: Decimal,
    pub market_cooldown: Duration,
    /// Consecutive failures that open the circuit; 0 disables the breaker.
    pub max_consecutive_failures: u32,
    pub failure_cooldown: Duration,
    pub min_gas_balance: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_profit_usd: dec!(0.10),
            max_exposure_usd: dec!(500),
            market_cooldown: Duration::minutes(5),
            max_consecutive_failures: 3,
            failure_cooldown: Duration::minutes(10),
            min_gas_balance: dec!(0.5),
        }
    }
}

impl From<&RiskSection> for RiskConfig {
    fn from(cfg: &RiskSection) -> Self {
        Self {
            min_profit_usd: d(cfg.min_profit_usd),
            max_exposure_usd: d(cfg.max_exposure_usd),
            market_cooldown: Duration::seconds(cfg.market_cooldown_secs),
            max_consecutive_failures: cfg.max_consecutive_failures,
            failure_cooldown: Duration::seconds(cfg.failure_cooldown_secs),
            min_gas_balance: d(cfg.min_gas_balance),
        }
    }
}

// ---------------------------------------------------------------------------
// Limits risk manager
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct RiskState {
    /// Reserved USD per market for submitted, not-yet-failed trades.
    exposure: HashMap<String, Decimal>,
    last_trade_at: HashMap<String, DateTime<Utc>>,
    consecutive_failures: u32,
    circuit_open_until: Option<DateTime<Utc>>,
    /// Last known gas balance; `None` until reported.
    gas_balance: Option<Decimal>,
}

impl RiskState {
    fn total_exposure(&self) -> Decimal {
        self.exposure.values().copied().sum()
    }
}

pub struct LimitsRiskManager {
    config: RiskConfig,
    state: Mutex<RiskState>,
}

impl LimitsRiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RiskState::default()),
        }
    }

    /// Record the wallet's current gas balance (native token units).
    pub async fn set_gas_balance(&self, balance: Decimal) {
        self.state.lock().await.gas_balance = Some(balance);
    }

    pub async fn total_exposure(&self) -> Decimal {
        self.state.lock().await.total_exposure()
    }

    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    fn check(&self, state: &RiskState, opp: &Opportunity, now: DateTime<Utc>) -> Result<(), RejectionReason> {
        if let Some(until) = state.circuit_open_until {
            if now < until {
                return Err(RejectionReason::CircuitOpen);
            }
        }

        if opp.est_profit_usd < self.config.min_profit_usd {
            return Err(RejectionReason::MinProfit);
        }

        if let Some(last) = state.last_trade_at.get(&opp.market_id) {
            if now - *last < self.config.market_cooldown {
                return Err(RejectionReason::MarketCooldown);
            }
        }

        if state.total_exposure() + opp.recommended_size_usd > self.config.max_exposure_usd {
            return Err(RejectionReason::ExposureLimit);
        }

        Ok(())
    }
}

#[async_trait]
impl RiskManager for LimitsRiskManager {
    async fn can_execute(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Result<RiskDecision> {
        let state = self.state.lock().await;
        Ok(match self.check(&state, opportunity, now) {
            Ok(()) => RiskDecision::allow(),
            Err(reason) => {
                debug!(market_id = %opportunity.market_id, reason = %reason, "Risk check failed");
                RiskDecision::deny(&reason.to_string())
            }
        })
    }

    async fn ensure_gas_balance(&self, _now: DateTime<Utc>) -> Result<GasCheck> {
        let state = self.state.lock().await;
        let ok = match state.gas_balance {
            Some(balance) => balance >= self.config.min_gas_balance,
            None => true,
        };
        Ok(GasCheck { ok })
    }

    async fn on_trade_submitted(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        *state
            .exposure
            .entry(opportunity.market_id.clone())
            .or_insert(Decimal::ZERO) += opportunity.recommended_size_usd;
        state.last_trade_at.insert(opportunity.market_id.clone(), now);
        Ok(())
    }

    async fn on_trade_success(&self, opportunity: &Opportunity, _now: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.consecutive_failures = 0;
        debug!(
            market_id = %opportunity.market_id,
            exposure = %state.total_exposure(),
            "Trade success recorded"
        );
        Ok(())
    }

    async fn on_trade_failure(
        &self,
        opportunity: &Opportunity,
        now: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(reserved) = state.exposure.get_mut(&opportunity.market_id) {
            *reserved = (*reserved - opportunity.recommended_size_usd).max(Decimal::ZERO);
            if reserved.is_zero() {
                state.exposure.remove(&opportunity.market_id);
            }
        }

        state.consecutive_failures += 1;
        let limit = self.config.max_consecutive_failures;
        if limit > 0 && state.consecutive_failures >= limit {
            let until = now + self.config.failure_cooldown;
            state.circuit_open_until = Some(until);
            state.consecutive_failures = 0;
            warn!(
                market_id = %opportunity.market_id,
                reason,
                until = %until.to_rfc3339(),
                "Consecutive failure limit hit, opening circuit"
            );
        } else {
            info!(
                market_id = %opportunity.market_id,
                reason,
                consecutive = state.consecutive_failures,
                "Trade failure recorded"
            );
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
