//! Run progress and summary.

use super::unit::PartitionResult;
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters for one scheduler run, updated once per finished partition.
#[derive(Debug)]
pub struct Progress {
    total: u64,

    /// Partitions finished, successfully or not
    pub completed: AtomicU64,

    pub succeeded: AtomicU64,

    pub failed: AtomicU64,

    /// Summed per-partition wall time (milliseconds)
    pub partition_ms: AtomicU64,

    failed_areas: Mutex<Vec<String>>,

    start_time: Option<Instant>,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total: total as u64,
            completed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            partition_ms: AtomicU64::new(0),
            failed_areas: Mutex::new(Vec::new()),
            start_time: Some(Instant::now()),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Record a finished partition and return the progress line for it.
    pub fn record(&self, result: &PartitionResult) -> String {
        if result.is_success() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
            self.failed_areas
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(result.area.clone());
        }
        self.partition_ms
            .fetch_add(result.elapsed.as_millis() as u64, Ordering::Relaxed);
        let completed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
        self.line(completed)
    }

    /// `"<completed> of <total> processed (<pct>%)"`
    pub fn line(&self, completed: u64) -> String {
        let pct = if self.total > 0 {
            completed as f64 / self.total as f64 * 100.0
        } else {
            0.0
        };
        format!("{} of {} processed ({:.1}%)", completed, self.total, pct)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |t| t.elapsed())
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let completed = self.completed.load(Ordering::Relaxed);
        let partition_ms = self.partition_ms.load(Ordering::Relaxed);
        let mut failed_areas = self
            .failed_areas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        failed_areas.sort();

        ProgressSnapshot {
            total: self.total,
            completed,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            elapsed: self.elapsed(),
            mean_partition_secs: if completed > 0 {
                partition_ms as f64 / completed as f64 / 1000.0
            } else {
                0.0
            },
            failed_areas,
        }
    }

    /// Print a final summary.
    pub fn print_summary(&self) {
        let snapshot = self.snapshot();

        println!("\n=== CSB Summary ===");
        println!("Total time: {:.1}s", snapshot.elapsed.as_secs_f64());
        println!("Partitions: {}", snapshot.total);
        println!("Succeeded: {}", snapshot.succeeded);
        println!("Failed: {}", snapshot.failed);
        println!("Mean partition time: {:.1}s", snapshot.mean_partition_secs);
        if !snapshot.failed_areas.is_empty() {
            println!("Failed areas: {}", snapshot.failed_areas.join(", "));
        }
        println!("===================\n");
    }
}

/// Snapshot of progress at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub total: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    pub mean_partition_secs: f64,
    pub failed_areas: Vec<String>,
}

impl ProgressSnapshot {
    /// Save the snapshot to a JSON file.
    pub fn save_to_file(&self, path: &str) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Run summary saved to {}", path);
        Ok(())
    }
}

impl std::fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Partitions: {} of {} completed | Succeeded: {} | Failed: {} | Elapsed: {:.1}s",
            self.completed,
            self.total,
            self.succeeded,
            self.failed,
            self.elapsed.as_secs_f64()
        )
    }
}
