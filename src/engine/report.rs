//! Per-scan summary.
//!
//! Every `scan_once` produces a `ScanReport`, including scans that abort
//! part way. The loop logs it and keeps the latest for the status API.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub markets: usize,
    pub snapshots: usize,
    /// Individual book sides that failed recoverably.
    pub orderbook_failures: usize,
    /// Markets with at least one failed side.
    pub markets_with_orderbook_failures: usize,
    pub opportunities: usize,
    /// Market ids in the order they were handed to the risk gate.
    pub attempted: Vec<String>,
    pub traded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Opportunities left for the next cycle once the admission cap was hit.
    pub deferred: usize,
    pub aborted: Option<String>,
    pub duration_ms: u64,
}

impl ScanReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            ..Self::default()
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

impl fmt::Display for ScanReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "markets={} snapshots={} book_failures={}/{} opps={} traded={} skipped={} failed={} deferred={} ({}ms)",
            self.markets,
            self.snapshots,
            self.orderbook_failures,
            self.markets_with_orderbook_failures,
            self.opportunities,
            self.traded,
            self.skipped,
            self.failed,
            self.deferred,
            self.duration_ms,
        )?;
        if let Some(reason) = &self.aborted {
            write!(f, " aborted: {reason}")?;
        }
        Ok(())
    }
}

/// Log the end-of-scan line.
pub fn log_scan_report(report: &ScanReport) {
    if let Some(reason) = &report.aborted {
        warn!(
            markets = report.markets,
            traded = report.traded,
            duration_ms = report.duration_ms,
            reason = %reason,
            "Scan ended early"
        );
    } else {
        debug!(
            markets = report.markets,
            opportunities = report.opportunities,
            traded = report.traded,
            skipped = report.skipped,
            failed = report.failed,
            deferred = report.deferred,
            duration_ms = report.duration_ms,
            "Scan finished"
        );
    }
}
