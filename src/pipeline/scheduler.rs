//! Work distribution across partitions.
//!
//! Every partition runs on its own blocking worker; at most `concurrency`
//! run at once. Results are collected in completion order and a progress
//! line is reported as each one arrives. A failing or panicking partition
//! never stops the others.

use super::progress::{Progress, ProgressSnapshot};
use super::unit::PartitionResult;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Something that can process one partition to completion.
pub trait PartitionRunner: Send + Sync + 'static {
    /// Process `area`. Must not fail: errors are reported in the result.
    fn run_partition(&self, area: &str) -> PartitionResult;

    /// Record a failure the runner itself could not report.
    fn record_failure(&self, area: &str, message: &str);
}

/// Configuration for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of partitions processed concurrently
    pub concurrency: usize,

    /// Print the final summary
    pub print_summary: bool,

    /// Optional path to save the run summary JSON
    pub summary_output_path: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            print_summary: true,
            summary_output_path: None,
        }
    }
}

/// Runs partitions through a bounded pool of blocking workers.
pub struct Scheduler {
    runner: Arc<dyn PartitionRunner>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn PartitionRunner>, config: SchedulerConfig) -> Self {
        Self { runner, config }
    }

    /// Process every area and return one result per area.
    pub async fn run(&self, areas: Vec<String>) -> SchedulerStats {
        let total = areas.len();
        let concurrency = self.config.concurrency.max(1);
        let progress = Progress::new(total);

        tracing::info!(
            "Scheduling {} partitions ({} concurrent)",
            total,
            concurrency
        );

        let mut completions = stream::iter(areas)
            .map(|area| {
                let runner = self.runner.clone();
                async move {
                    let worker = {
                        let runner = runner.clone();
                        let area = area.clone();
                        tokio::task::spawn_blocking(move || runner.run_partition(&area))
                    };
                    match worker.await {
                        Ok(result) => result,
                        Err(e) => {
                            let result = PartitionResult::failure(
                                &area,
                                None,
                                format!("worker terminated: {}", e),
                                Duration::ZERO,
                            );
                            runner.record_failure(&area, &result.message);
                            result
                        }
                    }
                }
            })
            .buffer_unordered(concurrency);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = completions.next().await {
            if !result.is_success() {
                tracing::error!("{}", result.message);
            }
            let line = progress.record(&result);
            tracing::info!("{}", line);
            results.push(result);
        }

        let snapshot = progress.snapshot();
        if self.config.print_summary {
            progress.print_summary();
        }
        if let Some(ref path) = self.config.summary_output_path {
            if let Err(e) = snapshot.save_to_file(path) {
                tracing::warn!("Failed to save run summary to {}: {}", path, e);
            }
        }

        SchedulerStats::from_results(results, snapshot)
    }
}

/// Statistics from a scheduler run.
#[derive(Debug)]
pub struct SchedulerStats {
    /// Partitions attempted
    pub total: usize,

    pub succeeded: usize,

    pub failed: usize,

    /// One result per partition, in completion order
    pub results: Vec<PartitionResult>,

    pub snapshot: ProgressSnapshot,
}

impl SchedulerStats {
    fn from_results(results: Vec<PartitionResult>, snapshot: ProgressSnapshot) -> Self {
        let succeeded = results.iter().filter(|r| r.is_success()).count();
        Self {
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            results,
            snapshot,
        }
    }

    /// True when every partition succeeded.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn failed_areas(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| r.area.as_str())
            .collect()
    }
}

impl std::fmt::Display for SchedulerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Succeeded: {}, Failed: {}, Total: {}",
            self.succeeded, self.failed, self.total
        )
    }
}
