//! Persistent run state
//!
//! Everything needed to resume a run lives here: per-tool produced
//! counts, the dedup index, the accepted records, the completion cursor
//! and the skipped items. One instance per run, owned by the active
//! controller, mutated only through these methods so the consistency
//! invariants hold at every persisted checkpoint.

pub mod fingerprint;

use crate::error::{Error, Result, SkipReason};
use chrono::{DateTime, Utc};
use fingerprint::DedupIndex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// An accepted question. Immutable once recorded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub tool_id: String,
    pub text: String,
    pub fingerprint: String,
    pub generated_at: DateTime<Utc>,
    pub accepted: bool,
}

impl QuestionRecord {
    pub fn new(tool_id: &str, text: String, fingerprint: String) -> Self {
        QuestionRecord {
            tool_id: tool_id.to_string(),
            text,
            fingerprint,
            generated_at: Utc::now(),
            accepted: true,
        }
    }
}

/// A completion-phase item that was skipped, with enough context to
/// reprocess it manually.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkippedItem {
    pub index: usize,
    pub tool_id: Option<String>,
    pub excerpt: String,
    pub reason: SkipReason,
}

/// Durable progress record for one run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunState {
    produced: BTreeMap<String, u64>,
    fingerprints: DedupIndex,
    records: Vec<QuestionRecord>,
    /// Next unprocessed item in the completion phase.
    cursor: usize,
    #[serde(default)]
    skipped: Vec<SkippedItem>,
    started_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    dirty: bool,
}

impl Default for RunState {
    fn default() -> Self {
        let now = Utc::now();
        RunState {
            produced: BTreeMap::new(),
            fingerprints: DedupIndex::new(),
            records: Vec::new(),
            cursor: 0,
            skipped: Vec::new(),
            started_at: now,
            updated_at: now,
            dirty: false,
        }
    }
}

impl RunState {
    pub fn new() -> Self {
        RunState::default()
    }

    /// Loads the state file, or starts fresh when it does not exist.
    /// A file that exists but fails to parse or breaks the consistency
    /// invariants is fatal: silently resetting would regenerate already
    /// accepted questions.
    pub fn load_or_create(path: &Path) -> Result<RunState> {
        if !path.exists() {
            info!("no state file at {}, starting fresh", path.display());
            return Ok(RunState::new());
        }
        let raw = fs::read_to_string(path)?;
        let state: RunState = serde_json::from_str(&raw).map_err(|e| Error::CorruptState {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        state.verify().map_err(|reason| Error::CorruptState {
            path: path.to_path_buf(),
            reason,
        })?;
        info!(
            "resumed state from {}: {} accepted, cursor {}",
            path.display(),
            state.records.len(),
            state.cursor
        );
        Ok(state)
    }

    /// Checks the cross-field invariants the rest of the pipeline relies
    /// on: counts match records, and records and fingerprints are two
    /// views of the same set.
    fn verify(&self) -> std::result::Result<(), String> {
        let total: u64 = self.produced.values().sum();
        if total != self.records.len() as u64 {
            return Err(format!(
                "produced counts sum to {} but {} records are stored",
                total,
                self.records.len()
            ));
        }
        if self.fingerprints.len() != self.records.len() {
            return Err(format!(
                "{} fingerprints for {} records",
                self.fingerprints.len(),
                self.records.len()
            ));
        }
        for record in &self.records {
            if !self.fingerprints.contains(&record.fingerprint) {
                return Err(format!(
                    "record fingerprint {} missing from index",
                    record.fingerprint
                ));
            }
        }
        Ok(())
    }

    /// Atomically persists the state (write-to-temp-then-rename), so a
    /// crash mid-flush never leaves a partial file behind.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        self.updated_at = Utc::now();
        crate::dataset::write_json_atomic(path, self)?;
        self.dirty = false;
        debug!("state flushed to {}", path.display());
        Ok(())
    }

    /// Accepts a question: inserts its fingerprint, stores the record and
    /// bumps the tool's produced count. Returns false (and changes
    /// nothing) when the fingerprint is already present.
    pub fn accept(&mut self, record: QuestionRecord) -> bool {
        if !self.fingerprints.insert(record.fingerprint.clone()) {
            return false;
        }
        *self.produced.entry(record.tool_id.clone()).or_insert(0) += 1;
        self.records.push(record);
        self.dirty = true;
        true
    }

    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn produced(&self) -> &BTreeMap<String, u64> {
        &self.produced
    }

    pub fn produced_for(&self, tool_id: &str) -> u64 {
        self.produced.get(tool_id).copied().unwrap_or(0)
    }

    pub fn total_produced(&self) -> u64 {
        self.produced.values().sum()
    }

    pub fn records(&self) -> &[QuestionRecord] {
        &self.records
    }

    pub fn fingerprint_count(&self) -> usize {
        self.fingerprints.len()
    }

    /// Recent fingerprints, newest last, for anti-duplicate prompt
    /// guidance.
    pub fn recent_fingerprints(&self, n: usize) -> &[String] {
        let all = self.fingerprints.ordered();
        &all[all.len().saturating_sub(n)..]
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Moves the completion cursor past a processed item. The cursor only
    /// ever advances.
    pub fn advance_cursor(&mut self, to: usize) {
        if to > self.cursor {
            self.cursor = to;
            self.dirty = true;
        }
    }

    pub fn record_skip(&mut self, item: SkippedItem) {
        self.skipped.push(item);
        self.dirty = true;
    }

    pub fn skipped(&self) -> &[SkippedItem] {
        &self.skipped
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}
