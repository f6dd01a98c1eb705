//! Scan/execute engine.
//!
//! Owns the periodic loop: each scan lists active markets, fetches both
//! order book tops per market under a concurrency cap, asks the strategy
//! for opportunities, ranks them by estimated profit, and admits them one
//! at a time through the risk manager and executor.
//!
//! Scans never overlap and opportunities within a scan are handled
//! strictly sequentially, so two opportunities can never race for the same
//! risk budget.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::EngineSection;
use crate::engine::executor::TradeExecutor;
use crate::engine::fetch::SafeFetcher;
use crate::engine::limiter::{ConcurrencyLimiter, DEFAULT_CONCURRENCY};
use crate::engine::report::{log_scan_report, ScanReport};
use crate::platforms::MarketDataProvider;
use crate::storage::DecisionLogger;
use crate::strategy::risk::RiskManager;
use crate::strategy::Strategy;
use crate::types::{
    ArbiterError, DecisionRecord, ExecutionPlan, Market, MarketSnapshot, Opportunity, OrderBookTop,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub scan_interval: Duration,
    /// Admission cap: at most this many trades active at once.
    pub max_concurrent_trades: usize,
    pub fetch_concurrency: usize,
    /// Timeout applied to every collaborator call; `None` waits forever.
    pub call_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            max_concurrent_trades: 3,
            fetch_concurrency: DEFAULT_CONCURRENCY,
            call_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl From<&EngineSection> for EngineConfig {
    fn from(cfg: &EngineSection) -> Self {
        Self {
            scan_interval: cfg.scan_interval(),
            max_concurrent_trades: cfg.max_concurrent_trades,
            fetch_concurrency: cfg.fetch_concurrency,
            call_timeout: cfg.call_timeout(),
        }
    }
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Sort by estimated profit descending; ties fall back to edge descending,
/// then market id ascending, so the order is fully reproducible.
pub fn rank_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        b.est_profit_usd
            .cmp(&a.est_profit_usd)
            .then_with(|| b.edge_bps.cmp(&a.edge_bps))
            .then_with(|| a.market_id.cmp(&b.market_id))
    });
}

// ---------------------------------------------------------------------------
// Trade slots
// ---------------------------------------------------------------------------

/// One admitted trade. Dropping it releases the slot.
struct TradeSlot<'a> {
    active: &'a AtomicUsize,
}

impl Drop for TradeSlot<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// True when the executor call itself hit the engine's call timeout.
fn is_execute_timeout(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<ArbiterError>(),
        Some(ArbiterError::Timeout { call: "execute", .. })
    )
}

/// How a single opportunity was disposed of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Traded,
    Skipped,
    Failed,
    Deferred,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    provider: Arc<dyn MarketDataProvider>,
    fetcher: SafeFetcher,
    strategy: Arc<dyn Strategy>,
    risk: Arc<dyn RiskManager>,
    executor: Arc<dyn TradeExecutor>,
    decisions: Option<Arc<dyn DecisionLogger>>,
    limiter: ConcurrencyLimiter,
    running: AtomicBool,
    /// Bumped by every `start`; a loop exits once it no longer owns the latest generation.
    generation: AtomicU64,
    active_trades: AtomicUsize,
    peak_active_trades: AtomicUsize,
    scans_completed: AtomicU64,
    /// Held for the whole of each scan so a restarted loop waits for the old one.
    scan_lock: Mutex<()>,
    last_report: RwLock<Option<ScanReport>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        provider: Arc<dyn MarketDataProvider>,
        strategy: Arc<dyn Strategy>,
        risk: Arc<dyn RiskManager>,
        executor: Arc<dyn TradeExecutor>,
    ) -> Self {
        let fetcher = SafeFetcher::new(Arc::clone(&provider), config.call_timeout);
        let limiter = ConcurrencyLimiter::new(config.fetch_concurrency);
        Self {
            config,
            provider,
            fetcher,
            strategy,
            risk,
            executor,
            decisions: None,
            limiter,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            active_trades: AtomicUsize::new(0),
            peak_active_trades: AtomicUsize::new(0),
            scans_completed: AtomicU64::new(0),
            scan_lock: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    /// Attach a decision logger for the audit trail.
    pub fn with_decision_logger(mut self, logger: Arc<dyn DecisionLogger>) -> Self {
        self.decisions = Some(logger);
        self
    }

    // -- Lifecycle -------------------------------------------------------

    /// Run the scan loop until `stop` is called.
    ///
    /// Returns immediately if a loop is already running.
    pub async fn start(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Engine already running, ignoring start");
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        info!(
            provider = self.provider.name(),
            strategy = self.strategy.name(),
            interval_ms = self.config.scan_interval.as_millis() as u64,
            max_concurrent_trades = self.config.max_concurrent_trades,
            fetch_concurrency = self.limiter.limit(),
            "Engine started"
        );

        while self.owns_loop(generation) {
            let started = Instant::now();
            let report = self.scan_once(Utc::now()).await;
            log_scan_report(&report);

            if !self.owns_loop(generation) {
                break;
            }

            let pause = self.config.scan_interval.saturating_sub(started.elapsed());
            if !pause.is_zero() {
                tokio::time::sleep(pause).await;
            }
        }

        info!(scans = self.scans_completed(), "Engine loop exited");
    }

    /// Request the loop to stop after the in-flight scan or sleep.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Engine stop requested");
        }
    }

    fn owns_loop(&self, generation: u64) -> bool {
        self.running.load(Ordering::SeqCst) && self.generation.load(Ordering::SeqCst) == generation
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn active_trades(&self) -> usize {
        self.active_trades.load(Ordering::SeqCst)
    }

    /// Highest `active_trades` value ever observed.
    pub fn peak_active_trades(&self) -> usize {
        self.peak_active_trades.load(Ordering::SeqCst)
    }

    pub fn scans_completed(&self) -> u64 {
        self.scans_completed.load(Ordering::SeqCst)
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn last_report(&self) -> Option<ScanReport> {
        self.last_report.read().await.clone()
    }

    // -- Scanning --------------------------------------------------------

    /// Run one complete scan. Never fails: a cycle-level error ends the
    /// scan early and is recorded in the report's `aborted` field.
    ///
    /// Scans are serialised: a call made while another scan is in flight
    /// waits for it to finish.
    pub async fn scan_once(&self, now: DateTime<Utc>) -> ScanReport {
        let _scan = self.scan_lock.lock().await;
        let started = Instant::now();
        let mut report = ScanReport::new(now);

        if let Err(e) = self.run_scan(now, &mut report).await {
            warn!(error = %format!("{e:#}"), "Scan failed");
            report.aborted = Some(format!("{e:#}"));
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.scans_completed.fetch_add(1, Ordering::SeqCst);
        *self.last_report.write().await = Some(report.clone());
        report
    }

    async fn run_scan(&self, now: DateTime<Utc>, report: &mut ScanReport) -> Result<()> {
        let markets = self.call("active_markets", self.provider.active_markets()).await?;
        report.markets = markets.len();

        let snapshots = self.build_snapshots(&markets).await?;
        for snap in &snapshots {
            let failed = snap.failed_sides();
            report.orderbook_failures += failed;
            if failed > 0 {
                report.markets_with_orderbook_failures += 1;
            }
        }
        report.snapshots = snapshots.len();

        let mut opportunities = self
            .call(
                "find_opportunities",
                self.strategy.find_opportunities(&snapshots, now),
            )
            .await?;
        rank_opportunities(&mut opportunities);
        report.opportunities = opportunities.len();

        match opportunities.first() {
            Some(top) => info!(
                opportunities = opportunities.len(),
                top_market = %top.market_id,
                top_edge_bps = %top.edge_bps.round_dp(1),
                top_profit = format!("${:.2}", top.est_profit_usd),
                top_size = format!("${:.2}", top.recommended_size_usd),
                orderbook_failures = report.orderbook_failures,
                markets_with_orderbook_failures = report.markets_with_orderbook_failures,
                "Scan evaluated"
            ),
            None => info!(
                opportunities = 0,
                markets = report.markets,
                orderbook_failures = report.orderbook_failures,
                markets_with_orderbook_failures = report.markets_with_orderbook_failures,
                "Scan evaluated"
            ),
        }

        for (index, opportunity) in opportunities.iter().enumerate() {
            if self.active_trades() >= self.config.max_concurrent_trades {
                report.deferred = opportunities.len() - index;
                debug!(deferred = report.deferred, "Admission cap reached, deferring the rest");
                break;
            }

            report.attempted.push(opportunity.market_id.clone());
            match self.handle_opportunity(opportunity, now).await {
                Disposition::Traded => report.traded += 1,
                Disposition::Skipped => report.skipped += 1,
                Disposition::Failed => report.failed += 1,
                Disposition::Deferred => report.deferred += 1,
            }
        }

        Ok(())
    }

    /// Fetch both sides of every market through the limiter and join them
    /// back into one snapshot per market, in market order.
    async fn build_snapshots(&self, markets: &[Market]) -> Result<Vec<MarketSnapshot>> {
        let fetches = markets.iter().flat_map(|m| {
            [
                self.fetch_side(&m.yes_token_id, &m.id),
                self.fetch_side(&m.no_token_id, &m.id),
            ]
        });
        let tops = futures::future::try_join_all(fetches).await?;

        Ok(markets
            .iter()
            .zip(tops.chunks_exact(2))
            .map(|(market, pair)| {
                let (yes, yes_failed) = pair[0];
                let (no, no_failed) = pair[1];
                MarketSnapshot {
                    market: market.clone(),
                    yes,
                    no,
                    yes_failed,
                    no_failed,
                }
            })
            .collect())
    }

    async fn fetch_side(&self, token_id: &str, market_id: &str) -> Result<(OrderBookTop, bool)> {
        self.limiter
            .with_slot(async { self.fetcher.fetch_top(token_id, market_id).await.into_top() })
            .await
    }

    // -- Opportunity handling --------------------------------------------

    /// Gate, execute, and settle one opportunity. Errors raised by the risk
    /// manager or executor are contained here so lower-ranked
    /// opportunities in the same scan still get their turn.
    async fn handle_opportunity(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Disposition {
        match self.try_handle(opportunity, now).await {
            Ok(disposition) => disposition,
            Err(e) => {
                let reason = format!("error: {e:#}");
                warn!(
                    market_id = %opportunity.market_id,
                    reason = %reason,
                    "Opportunity handling failed"
                );
                self.record(DecisionRecord::skip(opportunity, now, &reason)).await;
                Disposition::Skipped
            }
        }
    }

    async fn try_handle(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> Result<Disposition> {
        let decision = self
            .call("can_execute", self.risk.can_execute(opportunity, now))
            .await?;
        if !decision.allowed {
            let reason = decision.reason.unwrap_or_else(|| "risk_rejected".to_string());
            self.log_skip(opportunity, &reason);
            self.record(DecisionRecord::skip(opportunity, now, &reason)).await;
            return Ok(Disposition::Skipped);
        }

        let gas = self
            .call("ensure_gas_balance", self.risk.ensure_gas_balance(now))
            .await?;
        if !gas.ok {
            self.log_skip(opportunity, "low_gas");
            self.record(DecisionRecord::skip(opportunity, now, "low_gas")).await;
            return Ok(Disposition::Skipped);
        }

        let Some(slot) = self.admit() else {
            debug!(market_id = %opportunity.market_id, "No trade slot free, deferring");
            return Ok(Disposition::Deferred);
        };

        let submitted = async {
            self.call("on_trade_submitted", self.risk.on_trade_submitted(opportunity, now))
                .await?;
            let plan = ExecutionPlan::from_opportunity(opportunity);
            let result = self.call("execute", self.executor.execute(&plan, now)).await?;
            Ok::<_, anyhow::Error>((plan, result))
        }
        .await;
        drop(slot);

        let (plan, result) = match submitted {
            Ok(done) => done,
            Err(e) => {
                let reason = format!("error: {e:#}");
                if is_execute_timeout(&e) {
                    // The order may have reached the venue; the reservation stays.
                    warn!(
                        market_id = %opportunity.market_id,
                        reason = %reason,
                        size = format!("${:.2}", opportunity.recommended_size_usd),
                        "Execution outcome unknown, keeping risk reservation"
                    );
                } else {
                    warn!(
                        market_id = %opportunity.market_id,
                        reason = %reason,
                        "Execution errored"
                    );
                    self.notify_failure(opportunity, now, &reason).await;
                }
                self.record(DecisionRecord::skip(opportunity, now, &reason)).await;
                return Ok(Disposition::Failed);
            }
        };

        if result.status.is_success() {
            if let Err(e) = self
                .call("on_trade_success", self.risk.on_trade_success(opportunity, now))
                .await
            {
                warn!(market_id = %opportunity.market_id, error = %e, "on_trade_success failed");
            }
            info!(
                market_id = %opportunity.market_id,
                status = %result.status,
                edge_bps = %opportunity.edge_bps.round_dp(1),
                est_profit = format!("${:.2}", opportunity.est_profit_usd),
                size = format!("${:.2}", plan.size_usd()),
                tx_hash = result.tx_hashes.first().map(String::as_str).unwrap_or("-"),
                "Trade executed"
            );
            self.record(DecisionRecord::trade(opportunity, &plan, now, &result))
                .await;
            Ok(Disposition::Traded)
        } else {
            let reason = result.failure_reason();
            warn!(
                market_id = %opportunity.market_id,
                status = %result.status,
                reason = %reason,
                edge_bps = %opportunity.edge_bps.round_dp(1),
                est_profit = format!("${:.2}", opportunity.est_profit_usd),
                size = format!("${:.2}", plan.size_usd()),
                "Trade not executed"
            );
            self.notify_failure(opportunity, now, &reason).await;
            self.record(DecisionRecord::failed_execution(opportunity, &plan, now, &result))
                .await;
            Ok(Disposition::Failed)
        }
    }

    /// Claim a trade slot if the admission cap allows it.
    fn admit(&self) -> Option<TradeSlot<'_>> {
        let cap = self.config.max_concurrent_trades;
        self.active_trades
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < cap).then_some(n + 1))
            .ok()
            .map(|previous| {
                self.peak_active_trades.fetch_max(previous + 1, Ordering::SeqCst);
                TradeSlot {
                    active: &self.active_trades,
                }
            })
    }

    async fn notify_failure(&self, opportunity: &Opportunity, now: DateTime<Utc>, reason: &str) {
        if let Err(e) = self
            .call("on_trade_failure", self.risk.on_trade_failure(opportunity, now, reason))
            .await
        {
            warn!(market_id = %opportunity.market_id, error = %e, "on_trade_failure failed");
        }
    }

    fn log_skip(&self, opportunity: &Opportunity, reason: &str) {
        info!(
            market_id = %opportunity.market_id,
            reason,
            edge_bps = %opportunity.edge_bps.round_dp(1),
            est_profit = format!("${:.2}", opportunity.est_profit_usd),
            size = format!("${:.2}", opportunity.recommended_size_usd),
            "Skipping opportunity"
        );
    }

    /// Append to the decision log. A logging failure never blocks trading.
    async fn record(&self, record: DecisionRecord) {
        let Some(logger) = &self.decisions else {
            return;
        };
        if let Err(e) = logger.append(&record).await {
            warn!(market_id = %record.market_id, error = %format!("{e:#}"), "Failed to append decision");
        }
    }

    /// Await a collaborator call under the configured timeout.
    async fn call<T, F>(&self, name: &'static str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ArbiterError::Timeout {
                    call: name,
                    after_ms: limit.as_millis() as u64,
                }
                .into()),
            },
            None => call.await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
