//! CSB Create
//!
//! Builds crop sequence boundary polygons from yearly land-cover rasters,
//! one geographic partition at a time, many partitions in parallel.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Engine**: the [`GeoEngine`] capability trait; every raster and vector
//!   primitive is delegated to an external geoprocessing engine
//! - **Eliminate**: graduated small-polygon elimination over one layer
//! - **Pipeline**: the per-partition stage sequence with retry and repair,
//!   and the scheduler running partitions on a bounded worker pool
//! - **Partition**: area discovery and per-year raster resolution
//!
//! # Usage
//!
//! ```no_run
//! use csb_create::{run_pipeline, Config, RunRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml".as_ref())?;
//!     let request = RunRequest::new(2018, 2023, "/data/csb/2018_2023");
//!     let stats = run_pipeline(config, request).await?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crs;
pub mod eliminate;
pub mod engine;
pub mod error;
pub mod logging;
pub mod partition;
pub mod pipeline;
pub mod retry;

pub use config::Config;
pub use engine::{CommandEngine, GeoEngine};
pub use error::{CsbError, EngineError};
pub use pipeline::{Scheduler, SchedulerConfig, SchedulerStats, UnitPipeline};

use anyhow::{Context, Result};
use logging::ErrorLog;
use pipeline::PipelineSettings;
use std::path::PathBuf;
use std::sync::Arc;

/// What to process in one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub start_year: i32,
    pub end_year: i32,

    /// Root of the run: outputs and logs are written here
    pub creation_dir: PathBuf,

    /// Process only this area
    pub partial_area: Option<String>,

    /// Override the worker count derived from `cpu_fraction`
    pub concurrency: Option<usize>,
}

impl RunRequest {
    pub fn new(start_year: i32, end_year: i32, creation_dir: impl Into<PathBuf>) -> Self {
        Self {
            start_year,
            end_year,
            creation_dir: creation_dir.into(),
            partial_area: None,
            concurrency: None,
        }
    }
}

/// Discover the areas a run would process.
pub fn discover_run_areas(config: &Config, request: &RunRequest) -> Result<Vec<String>> {
    let root = config.input.raster_root(&request.creation_dir);
    let areas = partition::discover_areas(root, request.start_year, &config.input.raster_extension)
        .with_context(|| format!("Failed to discover areas under {}", root.display()))?;
    partition::select_area(areas, request.partial_area.as_deref())
}

/// Run the full pipeline with the external command engine.
pub async fn run_pipeline(config: Config, request: RunRequest) -> Result<SchedulerStats> {
    let engine: Arc<dyn GeoEngine> = Arc::new(CommandEngine::from_config(&config.engine));
    run_with_engine(config, request, engine).await
}

/// Run the full pipeline against the given engine.
pub async fn run_with_engine(
    config: Config,
    request: RunRequest,
    engine: Arc<dyn GeoEngine>,
) -> Result<SchedulerStats> {
    config.validate()?;
    if request.start_year > request.end_year {
        anyhow::bail!(
            "start year {} is after end year {}",
            request.start_year,
            request.end_year
        );
    }

    tracing::info!("Starting CSB run {}-{}", request.start_year, request.end_year);
    tracing::info!("Creation directory: {}", request.creation_dir.display());

    let areas = discover_run_areas(&config, &request)?;
    if areas.is_empty() {
        anyhow::bail!("No areas found for {}", request.start_year);
    }
    tracing::info!("Found {} areas", areas.len());

    let available = std::thread::available_parallelism().map_or(1, |n| n.get());
    let concurrency = request
        .concurrency
        .unwrap_or_else(|| config.processing.worker_count(available));

    let error_path = config.logging.error_path(&request.creation_dir);
    let error_log = Arc::new(
        ErrorLog::open(&error_path)
            .with_context(|| format!("Failed to open error log {}", error_path.display()))?,
    );

    let scheduler_config = SchedulerConfig {
        concurrency,
        print_summary: true,
        summary_output_path: config.processing.summary_output_path.clone(),
    };
    let settings = Arc::new(PipelineSettings::new(
        config,
        request.creation_dir,
        request.start_year,
        request.end_year,
    ));
    let pipeline = Arc::new(UnitPipeline::new(engine, settings, error_log));

    let stats = Scheduler::new(pipeline, scheduler_config).run(areas).await;
    tracing::info!("Run complete: {}", stats);

    Ok(stats)
}

/// Build a Tokio runtime with the specified configuration.
///
/// Partitions run on the blocking pool, which is sized to hold every worker.
pub fn build_runtime(worker_threads: Option<usize>, blocking_threads: usize) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }
    builder.max_blocking_threads(blocking_threads.max(1));

    builder.enable_all();

    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::engine::memory::MemoryEngine;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixture(areas: &[&str]) -> (TempDir, Arc<MemoryEngine>) {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(MemoryEngine::new());
        for area in areas {
            for year in 2018..=2019 {
                let year_dir = dir.path().join(year.to_string());
                std::fs::create_dir_all(&year_dir).unwrap();
                let path = year_dir.join(format!("{}_{}.tif", area, year));
                std::fs::write(&path, b"").unwrap();
                engine.add_raster(path);
            }
        }
        (dir, engine)
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.processing.field_retry = RetryConfig::fixed(2, Duration::ZERO);
        config.processing.elimination_retry = RetryConfig::fixed(2, Duration::ZERO);
        config.processing.iteration_retry = RetryConfig::fixed(2, Duration::ZERO);
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_all_areas() {
        let (dir, engine) = fixture(&["AL2", "AL10", "AL1"]);
        let mut request = RunRequest::new(2018, 2019, dir.path());
        request.concurrency = Some(2);

        let stats = run_with_engine(config(), request, engine).await.unwrap();
        assert_eq!(stats.total, 3);
        assert!(stats.all_succeeded());
        assert!(dir.path().join("log").join("AL10.log").exists());
    }

    #[tokio::test]
    async fn test_partial_area_run() {
        let (dir, engine) = fixture(&["AL1", "AL2"]);
        let mut request = RunRequest::new(2018, 2019, dir.path());
        request.partial_area = Some("AL2".to_string());

        let stats = run_with_engine(config(), request, engine.clone()).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.results[0].area, "AL2");
        assert_eq!(engine.call_count("combine"), 1);
    }

    #[tokio::test]
    async fn test_unknown_partial_area() {
        let (dir, engine) = fixture(&["AL1"]);
        let mut request = RunRequest::new(2018, 2019, dir.path());
        request.partial_area = Some("ZZ9".to_string());

        assert!(run_with_engine(config(), request, engine).await.is_err());
    }

    #[tokio::test]
    async fn test_reversed_years_rejected() {
        let (dir, engine) = fixture(&["AL1"]);
        let request = RunRequest::new(2019, 2018, dir.path());
        assert!(run_with_engine(config(), request, engine).await.is_err());
    }

    #[test]
    fn test_discover_run_areas_sorted() {
        let (dir, _engine) = fixture(&["AL10", "AL2", "AK3"]);
        let request = RunRequest::new(2018, 2019, dir.path());
        assert_eq!(
            discover_run_areas(&config(), &request).unwrap(),
            vec!["AK3", "AL2", "AL10"]
        );
    }
}
