//! End-to-end scan scenarios.
//!
//! Real strategy and risk manager, in-memory provider, executor and
//! decision log.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use arbiter::engine::executor::PaperExecutor;
use arbiter::engine::{Engine, EngineConfig};
use arbiter::storage::{read_decisions, JsonlDecisionLogger};
use arbiter::strategy::edge::{CrossOutcomeStrategy, EdgeConfig};
use arbiter::strategy::risk::{LimitsRiskManager, RiskConfig};
use arbiter::types::{DecisionAction, ExecutionStatus, Market};

use crate::mock_platform::{MemoryDecisionLogger, MockProvider, RecordingExecutor};

fn engine_config(cap: usize) -> EngineConfig {
    EngineConfig {
        scan_interval: Duration::from_millis(20),
        max_concurrent_trades: cap,
        fetch_concurrency: 6,
        call_timeout: Some(Duration::from_secs(5)),
    }
}

struct Harness {
    engine: Arc<Engine>,
    provider: Arc<MockProvider>,
    executor: Arc<RecordingExecutor>,
    risk: Arc<LimitsRiskManager>,
    decisions: Arc<MemoryDecisionLogger>,
}

fn harness(
    cap: usize,
    provider: MockProvider,
    executor: RecordingExecutor,
    risk: RiskConfig,
) -> Harness {
    let provider = Arc::new(provider);
    let executor = Arc::new(executor);
    let risk = Arc::new(LimitsRiskManager::new(risk));
    let decisions = Arc::new(MemoryDecisionLogger::default());

    let engine = Engine::new(
        engine_config(cap),
        provider.clone(),
        Arc::new(CrossOutcomeStrategy::new(EdgeConfig::default())),
        risk.clone(),
        executor.clone(),
    )
    .with_decision_logger(decisions.clone());

    Harness {
        engine: Arc::new(engine),
        provider,
        executor,
        risk,
        decisions,
    }
}

/// O1 has the larger edge (0.40 + 0.50); O2 the smaller (0.45 + 0.50).
/// Listed in reverse so ranking has to reorder them.
fn two_markets() -> MockProvider {
    MockProvider::new(vec![
        Market::new("O2", "Y2", "N2"),
        Market::new("O1", "Y1", "N1"),
    ])
    .with_ask("Y1", 0.40)
    .with_ask("N1", 0.50)
    .with_ask("Y2", 0.45)
    .with_ask("N2", 0.50)
}

#[tokio::test]
async fn test_full_cycle_with_paper_executor() {
    let mut path = std::env::temp_dir();
    path.push(format!("arbiter_it_{}.jsonl", uuid::Uuid::new_v4()));

    let provider = MockProvider::new(vec![
        Market::new("ARB", "Y-ARB", "N-ARB"),
        Market::new("FAIR", "Y-FAIR", "N-FAIR"),
        Market::new("GONE", "Y-GONE", "N-GONE"),
    ])
    .with_ask("Y-ARB", 0.45)
    .with_ask("N-ARB", 0.50)
    .with_ask("Y-FAIR", 0.55)
    .with_ask("N-FAIR", 0.50)
    .with_ask("Y-GONE", 0.30)
    .with_missing("N-GONE");

    let engine = Engine::new(
        engine_config(3),
        Arc::new(provider),
        Arc::new(CrossOutcomeStrategy::new(EdgeConfig::default())),
        Arc::new(LimitsRiskManager::new(RiskConfig::default())),
        Arc::new(PaperExecutor::new()),
    )
    .with_decision_logger(Arc::new(JsonlDecisionLogger::new(&path)));

    let report = engine.scan_once(Utc::now()).await;
    assert!(!report.is_aborted());
    assert_eq!(report.markets, 3);
    assert_eq!(report.snapshots, 3);
    assert_eq!(report.orderbook_failures, 1);
    assert_eq!(report.markets_with_orderbook_failures, 1);
    assert_eq!(report.opportunities, 1);
    assert_eq!(report.traded, 1);
    assert_eq!(engine.active_trades(), 0);

    let records = read_decisions(&path, 10).unwrap();
    assert_eq!(records.len(), 1);
    let trade = &records[0];
    assert_eq!(trade.market_id, "ARB");
    assert_eq!(trade.action, DecisionAction::Trade);
    assert_eq!(trade.status, Some(ExecutionStatus::DryRun));
    assert_eq!(trade.planned_size_usd, Some(dec!(50)));
    assert_eq!(trade.edge_bps, dec!(500));
    assert_eq!(trade.est_profit_usd, dec!(2.631579));
    assert!(trade.tx_hash.as_deref().unwrap().starts_with("dry-run-"));

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_fetch_concurrency_is_capped() {
    let markets: Vec<Market> = (0..12)
        .map(|i| Market::new(&format!("M{i}"), &format!("Y{i}"), &format!("N{i}")))
        .collect();
    let provider = MockProvider::new(markets).with_delay(Duration::from_millis(15));

    let h = harness(3, provider, RecordingExecutor::new(), RiskConfig::default());
    let report = h.engine.scan_once(Utc::now()).await;

    assert_eq!(report.snapshots, 12);
    assert_eq!(h.provider.book_calls(), 24);
    assert_eq!(h.provider.peak_in_flight(), 6);
    assert_eq!(h.engine.limiter().peak_in_flight(), 6);
    assert_eq!(h.engine.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_restart_during_scan_never_overlaps() {
    let provider = two_markets().with_delay(Duration::from_millis(150));
    let h = harness(3, provider, RecordingExecutor::new(), RiskConfig::default());
    let engine = h.engine.clone();

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    // Restart while the first loop is still waiting on order books.
    engine.stop();
    let second = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };

    let waited = tokio::time::timeout(Duration::from_secs(3), async {
        while engine.scans_completed() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok());

    engine.stop();
    assert!(tokio::time::timeout(Duration::from_secs(2), first).await.is_ok());
    assert!(tokio::time::timeout(Duration::from_secs(2), second).await.is_ok());

    // One scan of two markets fetches four sides at most.
    assert!(h.provider.book_calls() >= 8);
    assert_eq!(h.provider.peak_in_flight(), 4);
    assert_eq!(engine.active_trades(), 0);
}

#[tokio::test]
async fn test_higher_profit_executes_first() {
    let h = harness(3, two_markets(), RecordingExecutor::new(), RiskConfig::default());
    let report = h.engine.scan_once(Utc::now()).await;

    assert_eq!(report.attempted, vec!["O1", "O2"]);
    assert_eq!(h.executor.submitted(), vec!["O1", "O2"]);
    assert_eq!(report.traded, 2);
}

#[tokio::test]
async fn test_exposure_limit_skips_lower_ranked() {
    let risk = RiskConfig {
        max_exposure_usd: dec!(60),
        ..RiskConfig::default()
    };
    let h = harness(3, two_markets(), RecordingExecutor::new(), risk);
    let report = h.engine.scan_once(Utc::now()).await;

    assert_eq!(report.traded, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.executor.submitted(), vec!["O1"]);
    assert_eq!(h.decisions.reasons_for("O2"), vec!["EXPOSURE_LIMIT"]);
    assert_eq!(h.risk.total_exposure().await, dec!(50));
    assert_eq!(h.engine.active_trades(), 0);
}

#[tokio::test]
async fn test_rejected_execution_releases_exposure() {
    let risk = RiskConfig {
        max_exposure_usd: dec!(60),
        ..RiskConfig::default()
    };
    let executor = RecordingExecutor::new().rejecting("O1", "no_liquidity");
    let h = harness(3, two_markets(), executor, risk);
    let report = h.engine.scan_once(Utc::now()).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.traded, 1);
    assert_eq!(h.executor.submitted(), vec!["O1", "O2"]);
    assert_eq!(h.decisions.reasons_for("O1"), vec!["no_liquidity"]);
    assert_eq!(h.risk.total_exposure().await, dec!(50));

    let failed = h
        .decisions
        .records()
        .into_iter()
        .find(|r| r.market_id == "O1")
        .unwrap();
    assert_eq!(failed.action, DecisionAction::Skip);
    assert_eq!(failed.status, Some(ExecutionStatus::Rejected));
    assert_eq!(failed.planned_size_usd, Some(dec!(50)));
}

#[tokio::test]
async fn test_executor_error_does_not_stop_the_scan() {
    let executor = RecordingExecutor::new().exploding("O1");
    let h = harness(3, two_markets(), executor, RiskConfig::default());
    let report = h.engine.scan_once(Utc::now()).await;

    assert!(!report.is_aborted());
    assert_eq!(report.failed, 1);
    assert_eq!(report.traded, 1);
    assert_eq!(h.engine.active_trades(), 0);
    assert_eq!(h.risk.consecutive_failures().await, 0);

    let reasons = h.decisions.reasons_for("O1");
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].starts_with("error:"));
    assert!(reasons[0].contains("signer unavailable"));
}

#[tokio::test]
async fn test_market_cooldown_across_scans() {
    let h = harness(3, two_markets(), RecordingExecutor::new(), RiskConfig::default());
    let now = Utc::now();

    assert_eq!(h.engine.scan_once(now).await.traded, 2);
    let second = h.engine.scan_once(now + ChronoDuration::seconds(30)).await;
    assert_eq!(second.traded, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(h.decisions.reasons_for("O1"), vec!["MARKET_COOLDOWN"]);

    let later = h.engine.scan_once(now + ChronoDuration::minutes(10)).await;
    assert_eq!(later.traded, 2);
    assert_eq!(h.engine.scans_completed(), 3);
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_failures() {
    let provider = MockProvider::new(vec![
        Market::new("A", "YA", "NA"),
        Market::new("B", "YB", "NB"),
        Market::new("C", "YC", "NC"),
    ])
    .with_ask("YA", 0.30)
    .with_ask("NA", 0.50)
    .with_ask("YB", 0.40)
    .with_ask("NB", 0.50)
    .with_ask("YC", 0.45)
    .with_ask("NC", 0.50);
    let executor = RecordingExecutor::new()
        .rejecting("A", "fok_not_filled")
        .rejecting("B", "fok_not_filled");
    let risk = RiskConfig {
        max_consecutive_failures: 2,
        ..RiskConfig::default()
    };

    let h = harness(3, provider, executor, risk);
    let report = h.engine.scan_once(Utc::now()).await;

    assert_eq!(report.attempted, vec!["A", "B", "C"]);
    assert_eq!(report.failed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.executor.submitted(), vec!["A", "B"]);
    assert_eq!(h.decisions.reasons_for("C"), vec!["CIRCUIT_OPEN"]);
}

#[tokio::test]
async fn test_low_gas_blocks_submission() {
    let h = harness(3, two_markets(), RecordingExecutor::new(), RiskConfig::default());
    h.risk.set_gas_balance(dec!(0.1)).await;

    let report = h.engine.scan_once(Utc::now()).await;
    assert_eq!(report.skipped, 2);
    assert!(h.executor.submitted().is_empty());
    assert_eq!(h.decisions.reasons_for("O1"), vec!["low_gas"]);
    assert_eq!(h.risk.total_exposure().await, dec!(0));
}

#[tokio::test]
async fn test_market_listing_failure_then_recovery() {
    let h = harness(3, two_markets(), RecordingExecutor::new(), RiskConfig::default());

    h.provider.set_error("gamma unreachable");
    let failed = h.engine.scan_once(Utc::now()).await;
    assert!(failed.aborted.as_deref().unwrap().contains("gamma unreachable"));
    assert_eq!(h.provider.book_calls(), 0);

    h.provider.clear_error();
    let recovered = h.engine.scan_once(Utc::now()).await;
    assert!(!recovered.is_aborted());
    assert_eq!(recovered.traded, 2);
}

#[tokio::test]
async fn test_fatal_book_error_aborts_before_trading() {
    let provider = two_markets().with_broken("N2");
    let h = harness(3, provider, RecordingExecutor::new(), RiskConfig::default());

    let report = h.engine.scan_once(Utc::now()).await;
    assert!(report.is_aborted());
    assert!(h.executor.submitted().is_empty());
    assert!(h.decisions.records().is_empty());
    assert_eq!(h.engine.active_trades(), 0);
    assert_eq!(h.engine.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_both_sides_missing_counts_twice() {
    let provider = two_markets().with_missing("Y2").with_missing("N2");
    let h = harness(3, provider, RecordingExecutor::new(), RiskConfig::default());

    let report = h.engine.scan_once(Utc::now()).await;
    assert_eq!(report.orderbook_failures, 2);
    assert_eq!(report.markets_with_orderbook_failures, 1);
    assert_eq!(report.opportunities, 1);
    assert_eq!(h.executor.submitted(), vec!["O1"]);
}

#[tokio::test]
async fn test_cap_of_one_never_overlaps() {
    let executor = RecordingExecutor::new().with_delay(Duration::from_millis(10));
    let h = harness(1, two_markets(), executor, RiskConfig::default());

    let report = h.engine.scan_once(Utc::now()).await;
    assert_eq!(report.traded, 2);
    assert_eq!(h.engine.peak_active_trades(), 1);
    assert_eq!(h.engine.active_trades(), 0);
}

#[tokio::test]
async fn test_start_is_idempotent_and_stop_ends_loop() {
    let h = harness(3, two_markets(), RecordingExecutor::new(), RiskConfig::default());
    let engine = h.engine.clone();

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.start().await })
    };

    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while engine.scans_completed() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok());
    assert!(engine.is_running());

    // A second start while running returns at once.
    let second = tokio::time::timeout(Duration::from_millis(200), engine.start()).await;
    assert!(second.is_ok());
    assert!(engine.is_running());

    engine.stop();
    let joined = tokio::time::timeout(Duration::from_secs(2), runner).await;
    assert!(joined.is_ok());
    assert!(!engine.is_running());

    let scans = engine.scans_completed();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(engine.scans_completed(), scans);
    assert_eq!(engine.active_trades(), 0);
}
