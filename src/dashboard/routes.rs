//! Status API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::engine::{Engine, ScanReport};
use crate::storage;
use crate::types::DecisionRecord;

/// Default and maximum number of decisions returned by `/api/decisions`.
const DEFAULT_DECISION_LIMIT: usize = 50;
const MAX_DECISION_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub engine: Arc<Engine>,
    /// Decision log to serve; `None` when decision logging is disabled.
    pub decisions_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(engine: Arc<Engine>, decisions_path: Option<PathBuf>) -> Self {
        Self {
            engine,
            decisions_path,
            started_at: Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub active_trades: usize,
    pub peak_active_trades: usize,
    pub max_concurrent_trades: usize,
    pub scans_completed: u64,
    pub fetches_in_flight: usize,
    pub uptime_secs: i64,
    pub last_scan: Option<ScanReport>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionsQuery {
    pub limit: Option<usize>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let engine = &state.engine;
    Json(StatusResponse {
        running: engine.is_running(),
        active_trades: engine.active_trades(),
        peak_active_trades: engine.peak_active_trades(),
        max_concurrent_trades: engine.config().max_concurrent_trades,
        scans_completed: engine.scans_completed(),
        fetches_in_flight: engine.limiter().in_flight(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        last_scan: engine.last_report().await,
    })
}

/// GET /api/decisions?limit=N
pub async fn get_decisions(
    State(state): State<AppState>,
    Query(query): Query<DecisionsQuery>,
) -> Result<Json<Vec<DecisionRecord>>, StatusCode> {
    let Some(path) = state.decisions_path.clone() else {
        return Ok(Json(Vec::new()));
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_DECISION_LIMIT)
        .min(MAX_DECISION_LIMIT);

    // File reads stay off the runtime's worker threads.
    let read = tokio::task::spawn_blocking(move || storage::read_decisions(&path, limit))
        .await
        .map_err(|e| {
            warn!(error = %e, "Decision log reader panicked");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    read.map(Json).map_err(|e| {
        warn!(error = %format!("{e:#}"), "Failed to read decision log");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
