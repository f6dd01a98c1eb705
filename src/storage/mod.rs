//! Persistence layer.
//!
//! Appends decision records to a JSON Lines file, one object per line, and
//! reads the newest records back for the status API.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::DecisionRecord;

/// Sink for the engine's audit trail.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DecisionLogger: Send + Sync {
    async fn append(&self, record: &DecisionRecord) -> Result<()>;
}

/// Appends each record as one JSON line.
pub struct JsonlDecisionLogger {
    path: PathBuf,
    // Serialises writers so concurrent appends never interleave lines.
    write_lock: Mutex<()>,
}

impl JsonlDecisionLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DecisionLogger for JsonlDecisionLogger {
    async fn append(&self, record: &DecisionRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).context("Failed to serialise decision record")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open decision log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write decision log {}", self.path.display()))?;
        file.flush().await?;

        debug!(path = %self.path.display(), market_id = %record.market_id, "Decision appended");
        Ok(())
    }
}

/// Bytes read per backwards step when tailing the decision log.
const TAIL_CHUNK: u64 = 8 * 1024;

/// Read up to `limit` of the newest decision records (oldest first).
///
/// The file is read backwards from the end, so the cost follows `limit`
/// rather than the size of the log. Returns an empty list if the file does
/// not exist. Lines that fail to parse are skipped with a warning.
pub fn read_decisions(path: &Path, limit: usize) -> Result<Vec<DecisionRecord>> {
    read_tail(path, limit, TAIL_CHUNK)
}

fn read_tail(path: &Path, limit: usize, chunk: u64) -> Result<Vec<DecisionRecord>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to open decision log {}", path.display()))
        }
    };

    let mut pos = file
        .metadata()
        .with_context(|| format!("Failed to stat decision log {}", path.display()))?
        .len();
    // Bytes read but not yet known to start on a line boundary.
    let mut pending: Vec<u8> = Vec::new();
    let mut newest_first = Vec::with_capacity(limit);

    while pos > 0 && newest_first.len() < limit {
        let step = chunk.min(pos);
        pos -= step;

        let mut buf = vec![0u8; step as usize];
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(&mut buf)
            .with_context(|| format!("Failed to read decision log {}", path.display()))?;
        buf.extend_from_slice(&pending);
        pending = buf;

        let complete = if pos == 0 {
            std::mem::take(&mut pending)
        } else {
            // Everything before the first newline may continue in the previous chunk.
            match pending.iter().position(|&b| b == b'\n') {
                Some(i) => pending.split_off(i + 1),
                None => continue,
            }
        };
        collect_newest(&complete, limit, &mut newest_first);
    }

    newest_first.reverse();
    Ok(newest_first)
}

fn collect_newest(bytes: &[u8], limit: usize, out: &mut Vec<DecisionRecord>) {
    for line in bytes.split(|&b| b == b'\n').rev() {
        if out.len() >= limit {
            return;
        }
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice(line) {
            Ok(record) => out.push(record),
            Err(e) => warn!(error = %e, "Skipping malformed decision line"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
