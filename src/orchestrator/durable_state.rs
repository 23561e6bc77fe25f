//! Append-only receipt/error log and startup replay. Adapted from a
//! single serialized state-snapshot file to an append-only journal (one
//! JSON record per line), keying individual receipts for dedup rather
//! than checkpointing the whole world on every write.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{ErrorRecord, Receipt};
use crate::state::SharedMiningState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum LogLine {
    Receipt(Receipt),
    Error(ErrorRecord),
}

pub trait ReceiptLog: Send + Sync {
    fn append_receipt(&self, receipt: &Receipt) -> Result<()>;
    fn append_error(&self, error: &ErrorRecord) -> Result<()>;
    fn replay(&self) -> Result<ReplayedState>;
}

#[derive(Debug, Default)]
pub struct ReplayedState {
    pub receipts: Vec<Receipt>,
    pub errors: Vec<ErrorRecord>,
}

pub struct FileReceiptLog {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FileReceiptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    fn append_line(&self, line: &LogLine) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening receipt log at {}", self.path.display()))?;
        let json = serde_json::to_string(line)?;
        writeln!(file, "{json}")?;
        Ok(())
    }
}

impl ReceiptLog for FileReceiptLog {
    fn append_receipt(&self, receipt: &Receipt) -> Result<()> {
        self.append_line(&LogLine::Receipt(receipt.clone()))
    }

    fn append_error(&self, error: &ErrorRecord) -> Result<()> {
        self.append_line(&LogLine::Error(error.clone()))
    }

    fn replay(&self) -> Result<ReplayedState> {
        replay_path(&self.path)
    }
}

fn replay_path(path: &Path) -> Result<ReplayedState> {
    if !path.exists() {
        return Ok(ReplayedState::default());
    }
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening receipt log at {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut state = ReplayedState::default();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<LogLine>(&line) {
            Ok(LogLine::Receipt(r)) => state.receipts.push(r),
            Ok(LogLine::Error(e)) => state.errors.push(e),
            Err(e) => {
                tracing::warn!(line_no, error = %e, "skipping malformed receipt log line");
            }
        }
    }
    Ok(state)
}

/// Rebuilds `submitted_hashes`, `solved`, and the user/dev-fee counters
/// from a replayed log. Idempotent: replaying twice and applying twice
/// produces the same observable state, since every operation here is a
/// set insertion or a counter recomputed from scratch rather than an
/// increment applied blindly to stale state.
pub fn apply_replay(shared: &SharedMiningState, replayed: &ReplayedState) {
    let mut user_count = 0u32;
    let mut dev_fee_count = 0u32;

    for receipt in &replayed.receipts {
        shared.mark_solved(&receipt.address, &receipt.challenge_id);
        shared.insert_submitted_hash(receipt.hash.clone());
        if receipt.is_dev_fee {
            dev_fee_count += 1;
        } else {
            user_count += 1;
        }
    }

    shared
        .user_solutions_count
        .store(user_count, std::sync::atomic::Ordering::Release);
    shared
        .dev_fee_solutions_count
        .store(dev_fee_count, std::sync::atomic::Ordering::Release);
}
