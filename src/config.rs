//! Configuration for the CSB creation pipeline.

use crate::crs;
use crate::engine::MergeRule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Input raster configuration
    #[serde(default)]
    pub input: InputConfig,

    /// External geoprocessing engine
    #[serde(default)]
    pub engine: EngineConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Polygon elimination configuration
    #[serde(default)]
    pub elimination: EliminationConfig,

    /// Output projection
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Log file locations
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input raster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Directory holding one sub-directory of split rasters per year.
    /// Defaults to the creation directory when unset.
    #[serde(default)]
    pub split_rasters: Option<PathBuf>,

    /// Raster file extension (matched case-insensitively)
    #[serde(default = "default_raster_extension")]
    pub raster_extension: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            split_rasters: None,
            raster_extension: default_raster_extension(),
        }
    }
}

impl InputConfig {
    /// Root directory for per-year rasters.
    pub fn raster_root<'a>(&'a self, creation_dir: &'a Path) -> &'a Path {
        self.split_rasters.as_deref().unwrap_or(creation_dir)
    }
}

/// External engine executable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Program invoked once per engine operation
    #[serde(default = "default_engine_program")]
    pub program: String,

    /// Arguments placed before the operation name
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_engine_program(),
            args: Vec::new(),
        }
    }
}

/// Processing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Fraction of available CPUs used as worker count (0 < f <= 1)
    #[serde(default = "default_cpu_fraction")]
    pub cpu_fraction: f64,

    /// Pixels observed in fewer years than this are masked out
    #[serde(default = "default_min_years")]
    pub min_years: f64,

    /// Name of the years-observed field
    #[serde(default = "default_count_field")]
    pub count_field: String,

    /// Retry policy for adding the years-observed field
    #[serde(default = "default_field_retry")]
    pub field_retry: RetryConfig,

    /// Retry policy for the whole elimination (with geometry repair)
    #[serde(default = "default_elimination_retry")]
    pub elimination_retry: RetryConfig,

    /// Retry policy for one select/eliminate/make-layer iteration
    #[serde(default = "default_iteration_retry")]
    pub iteration_retry: RetryConfig,

    /// Optional path to save the run summary JSON after the run completes
    #[serde(default)]
    pub summary_output_path: Option<String>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            cpu_fraction: default_cpu_fraction(),
            min_years: default_min_years(),
            count_field: default_count_field(),
            field_retry: default_field_retry(),
            elimination_retry: default_elimination_retry(),
            iteration_retry: default_iteration_retry(),
            summary_output_path: None,
        }
    }
}

impl ProcessingConfig {
    /// Worker count for the given number of available CPUs.
    pub fn worker_count(&self, available: usize) -> usize {
        ((self.cpu_fraction * available as f64).floor() as usize).max(1)
    }
}

/// Retry configuration for transient failures.
///
/// The delay doubles after every failed attempt up to `max_backoff_ms`;
/// setting both bounds equal gives a fixed delay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryConfig {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_attempts,
            initial_backoff_ms: ms,
            max_backoff_ms: ms,
        }
    }

    fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            anyhow::bail!("{}.max_attempts must be > 0", name);
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            anyhow::bail!("{}.initial_backoff_ms must not exceed max_backoff_ms", name);
        }
        Ok(())
    }
}

/// Polygon elimination configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EliminationConfig {
    /// Area thresholds in square metres, applied smallest first
    #[serde(default = "default_thresholds")]
    pub thresholds: Vec<f64>,

    /// Neighbour that absorbs an eliminated polygon
    #[serde(default)]
    pub merge_rule: MergeRule,

    /// CRS in which elimination areas are measured
    #[serde(default = "default_elimination_crs")]
    pub coordinate_system: String,

    /// Polygons at or below this area are dropped from the exported
    /// dataset. Defaults to 9000 when absent; an explicit `null` disables
    /// the export
    #[serde(default = "default_min_final_area")]
    pub min_final_area: Option<f64>,
}

impl Default for EliminationConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            merge_rule: MergeRule::default(),
            coordinate_system: default_elimination_crs(),
            min_final_area: default_min_final_area(),
        }
    }
}

/// Output projection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// CRS vectors are projected into after vectorization
    #[serde(default = "default_output_crs")]
    pub output_crs: String,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            output_crs: default_output_crs(),
        }
    }
}

/// Log file configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory, relative to the creation directory
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Shared error log file name inside `log_dir`
    #[serde(default = "default_error_file")]
    pub error_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            error_file: default_error_file(),
        }
    }
}

impl LoggingConfig {
    pub fn log_dir(&self, creation_dir: &Path) -> PathBuf {
        creation_dir.join(&self.log_dir)
    }

    pub fn error_path(&self, creation_dir: &Path) -> PathBuf {
        self.log_dir(creation_dir).join(&self.error_file)
    }
}

impl Config {
    /// Load configuration from a YAML or JSON file.
    /// Format is auto-detected from file extension (.yaml, .yml, or .json).
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let config: Config = match ext {
            "json" => serde_json::from_str(&contents)?,
            // YAML is a superset of JSON
            _ => serde_yaml::from_str(&contents)?,
        };
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.processing;
        if !(p.cpu_fraction > 0.0 && p.cpu_fraction <= 1.0) {
            anyhow::bail!("cpu_fraction must be in (0, 1], got {}", p.cpu_fraction);
        }
        if !p.min_years.is_finite() || p.min_years < 0.0 {
            anyhow::bail!("min_years must be a non-negative number");
        }
        if p.count_field.trim().is_empty() {
            anyhow::bail!("count_field must not be empty");
        }
        p.field_retry.validate("field_retry")?;
        p.elimination_retry.validate("elimination_retry")?;
        p.iteration_retry.validate("iteration_retry")?;

        let e = &self.elimination;
        if e.thresholds.is_empty() {
            anyhow::bail!("At least one elimination threshold is required");
        }
        if e.thresholds.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            anyhow::bail!("Elimination thresholds must be positive numbers");
        }
        if let Some(min) = e.min_final_area {
            if !min.is_finite() || min < 0.0 {
                anyhow::bail!("min_final_area must be a non-negative number");
            }
        }
        if !crs::is_projected(&e.coordinate_system) {
            anyhow::bail!("Elimination CRS must be projected: {}", e.coordinate_system);
        }
        if !crs::is_projected(&self.projection.output_crs) {
            anyhow::bail!("Output CRS must be projected: {}", self.projection.output_crs);
        }

        if self.engine.program.trim().is_empty() {
            anyhow::bail!("engine.program must not be empty");
        }
        if self.input.raster_extension.trim().is_empty() {
            anyhow::bail!("raster_extension must not be empty");
        }
        Ok(())
    }
}

// Default value functions for serde
fn default_raster_extension() -> String { "tif".to_string() }
fn default_engine_program() -> String { "csb-geo-engine".to_string() }
fn default_cpu_fraction() -> f64 { 0.75 }
fn default_min_years() -> f64 { 1.1 }
fn default_count_field() -> String { "COUNT0".to_string() }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff_ms() -> u64 { 5000 }
fn default_max_backoff_ms() -> u64 { 5000 }
fn default_field_retry() -> RetryConfig { RetryConfig::fixed(5, Duration::from_secs(1)) }
fn default_elimination_retry() -> RetryConfig { RetryConfig::fixed(5, Duration::from_secs(5)) }
fn default_iteration_retry() -> RetryConfig { RetryConfig::fixed(3, Duration::from_secs(5)) }
fn default_thresholds() -> Vec<f64> { vec![1000.0, 1900.0, 2800.0, 3700.0, 4600.0, 5500.0, 6500.0, 8100.0] }
fn default_elimination_crs() -> String { crs::codes::ALBERS_ELIMINATION.to_string() }
fn default_min_final_area() -> Option<f64> { Some(9000.0) }
fn default_output_crs() -> String { crs::codes::ALBERS_USGS.to_string() }
fn default_log_dir() -> PathBuf { PathBuf::from("log") }
fn default_error_file() -> String { "overall_error.txt".to_string() }
