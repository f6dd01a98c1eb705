//! Core engine: the scan, rank, admit, execute loop.
//!
//! `scanner::Engine` drives each cycle. Order book lookups go through
//! `fetch::SafeFetcher` under a `limiter::ConcurrencyLimiter`; trades go
//! through an `executor::TradeExecutor`.

pub mod executor;
pub mod fetch;
pub mod limiter;
pub mod report;
pub mod scanner;

pub use report::ScanReport;
pub use scanner::{Engine, EngineConfig};
