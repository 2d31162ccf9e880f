//! Phase 1 driver: quota-balanced question generation
//!
//! Runs the batch loop until every tool quota is met or a stop arrives.
//! The state file is flushed after every batch and on every exit path
//! (completion, fatal error, interrupt), so a relaunch resumes from the
//! persisted counts without regenerating anything already accepted.

use crate::catalog::{quota, Catalog};
use crate::client::{RetryPolicy, TextGenerator};
use crate::dataset::write_question_dataset;
use crate::error::{Error, Result};
use crate::pipeline::batch::BatchGenerator;
use crate::pipeline::{RunPhase, Shutdown};
use crate::state::RunState;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consecutive zero-yield batches tolerated before the run is declared
/// stalled.
const MAX_BARREN_BATCHES: u32 = 8;

pub struct GenerationController<'a> {
    api: &'a dyn TextGenerator,
    catalog: &'a Catalog,
    state: RunState,
    state_path: PathBuf,
    output_path: PathBuf,
    total: u64,
    batch_size: u64,
    batch_delay: Duration,
    retry: RetryPolicy,
    phase: RunPhase,
}

impl<'a> GenerationController<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        api: &'a dyn TextGenerator,
        catalog: &'a Catalog,
        state: RunState,
        state_path: PathBuf,
        output_path: PathBuf,
        total: u64,
        batch_size: u64,
        batch_delay: Duration,
        retry: RetryPolicy,
    ) -> Self {
        GenerationController {
            api,
            catalog,
            state,
            state_path,
            output_path,
            total,
            batch_size,
            batch_delay,
            retry,
            phase: RunPhase::Idle,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Drives the run to completion, pause or failure. State and output
    /// are flushed no matter how the run ends.
    pub async fn run(&mut self, shutdown: &mut Shutdown) -> Result<RunPhase> {
        self.phase = RunPhase::Running;
        let outcome = self.drive(shutdown).await;

        let flush = self.flush();
        match outcome {
            Ok(phase) => {
                self.phase = phase;
                flush?;
                Ok(phase)
            }
            Err(e) => {
                self.phase = RunPhase::Failed;
                if let Err(flush_err) = flush {
                    error!("flush after failure also failed: {}", flush_err);
                }
                Err(e)
            }
        }
    }

    async fn drive(&mut self, shutdown: &mut Shutdown) -> Result<RunPhase> {
        let catalog = self.catalog;
        let mut batch_num = 0u64;
        let mut barren = 0u32;

        loop {
            if shutdown.is_requested() {
                info!("[Generation] interrupt received, pausing with flush");
                return Ok(RunPhase::PausedOnSignal);
            }
            if self.state.total_produced() >= self.total {
                return Ok(RunPhase::Completed);
            }

            let remaining = quota::remaining(catalog, self.total, self.state.produced());
            let Some(tool) = quota::next_tool(catalog, &remaining) else {
                return Ok(RunPhase::Completed);
            };
            let request = self.batch_size.min(remaining[&tool.id]);
            batch_num += 1;

            info!(
                "[Generation] batch {}: {} questions for {} ({} remaining)",
                batch_num, request, tool.id, remaining[&tool.id]
            );

            let report = tokio::select! {
                biased;
                _ = shutdown.requested() => {
                    info!("[Generation] interrupt received mid-batch, discarding in-flight work");
                    return Ok(RunPhase::PausedOnSignal);
                }
                result = Self::batch_with_retry(
                    self.api, &self.retry, tool, request, &mut self.state
                ) => result?,
            };

            if report.accepted == 0 {
                barren += 1;
                if barren >= MAX_BARREN_BATCHES {
                    return Err(Error::Stalled { batches: barren });
                }
            } else {
                barren = 0;
            }

            self.flush()?;
            let produced = self.state.total_produced();
            info!(
                "[Generation] progress: {}/{} accepted ({:.1}%)",
                produced,
                self.total,
                produced as f64 / self.total as f64 * 100.0
            );

            if self.state.total_produced() < self.total && !self.batch_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = shutdown.requested() => {
                        return Ok(RunPhase::PausedOnSignal);
                    }
                    _ = tokio::time::sleep(self.batch_delay) => {}
                }
            }
        }
    }

    /// One batch with the configured retry budget. Retryable API errors
    /// back off and try again; once the budget is spent (or the error is
    /// fatal) it escalates, since a stalled quota blocks the whole run.
    async fn batch_with_retry(
        api: &dyn TextGenerator,
        retry: &RetryPolicy,
        tool: &crate::catalog::ToolSpec,
        request: u64,
        state: &mut RunState,
    ) -> Result<crate::pipeline::batch::BatchReport> {
        let generator = BatchGenerator::new(api);
        let mut attempt = 1;
        loop {
            match generator.run(tool, request, state).await {
                Ok(report) => return Ok(report),
                Err(e) if e.is_retryable() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for(attempt);
                    warn!(
                        "batch for {} failed (attempt {}/{}): {}, retrying in {:?}",
                        tool.id, attempt, retry.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(Error::Api(e)),
            }
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.state.save(&self.state_path)?;
        write_question_dataset(&self.output_path, self.total, self.state.records())
    }

    /// Per-tool distribution for the end-of-run summary.
    pub fn summary(&self) -> Vec<(String, u64, u64)> {
        let targets = quota::allocate(self.catalog, self.total);
        self.catalog
            .iter()
            .map(|t| {
                (
                    t.id.clone(),
                    self.state.produced_for(&t.id),
                    targets.get(&t.id).copied().unwrap_or(0),
                )
            })
            .collect()
    }
}
