//! CSB Create CLI
//!
//! Builds crop sequence boundary polygons for every area of a study region.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csb_create::{build_runtime, discover_run_areas, run_pipeline, Config, RunRequest};

#[derive(Parser)]
#[command(name = "csb-create")]
#[command(about = "Create crop sequence boundary polygons from yearly rasters", long_about = None)]
struct Cli {
    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the number of concurrent partitions
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every area (or a single one) for a year range
    Run {
        start_year: i32,
        end_year: i32,

        /// Run directory; outputs and logs are written here
        creation_dir: PathBuf,

        /// Process only this area
        partial_area: Option<String>,
    },

    /// List the areas a run would process
    ListAreas {
        start_year: i32,

        /// Run directory holding the per-year rasters
        creation_dir: PathBuf,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            start_year,
            end_year,
            creation_dir,
            partial_area,
        } => {
            let mut request = RunRequest::new(start_year, end_year, creation_dir);
            request.partial_area = partial_area;
            request.concurrency = cli.concurrency;
            run_command(cli.config.as_deref(), request)?;
        }

        Commands::ListAreas {
            start_year,
            creation_dir,
        } => {
            list_areas_command(cli.config.as_deref(), start_year, creation_dir)?;
        }

        Commands::Validate => {
            validate_command(cli.config.as_deref())?;
        }

        Commands::GenerateConfig { output } => {
            generate_config_command(output)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path),
        None => Ok(Config::default()),
    }
}

fn run_command(config_path: Option<&Path>, request: RunRequest) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let available = std::thread::available_parallelism().map_or(1, |n| n.get());
    let workers = request
        .concurrency
        .unwrap_or_else(|| config.processing.worker_count(available));

    let runtime = build_runtime(None, workers)?;
    let stats = runtime.block_on(async { run_pipeline(config, request).await })?;

    if !stats.all_succeeded() {
        anyhow::bail!(
            "{} of {} partitions failed: {}",
            stats.failed,
            stats.total,
            stats.failed_areas().join(", ")
        );
    }

    Ok(())
}

fn list_areas_command(config_path: Option<&Path>, start_year: i32, creation_dir: PathBuf) -> Result<()> {
    let config = load_config(config_path)?;
    let request = RunRequest::new(start_year, start_year, creation_dir);
    let areas = discover_run_areas(&config, &request)?;

    for area in &areas {
        println!("{}", area);
    }
    println!("{} areas", areas.len());
    Ok(())
}

fn validate_command(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    println!("Configuration is valid");
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    let yaml = r#"# CSB Create Configuration

# === INPUT: per-year classification rasters ===
input:
  # Root holding <year>/<area>_<year>.tif (defaults to the creation directory)
  # split_rasters: "/data/split_rasters"

  # Raster file extension, matched case-insensitively
  raster_extension: "tif"

# === ENGINE: external geoprocessing executable ===
engine:
  # Invoked as: <program> <args...> <operation>, JSON request on stdin
  program: "csb-geo-engine"
  args: []

# === PROCESSING ===
processing:
  # Fraction of CPUs used as concurrent partitions (at least one)
  cpu_fraction: 0.75

  # Pixels observed in fewer years than this are masked out
  min_years: 1.1

  # Name of the years-observed field
  count_field: "COUNT0"

  # Adding the count field until the engine reports it
  field_retry:
    max_attempts: 5
    initial_backoff_ms: 1000
    max_backoff_ms: 1000

  # Whole elimination, restarted from the source layers
  elimination_retry:
    max_attempts: 5
    initial_backoff_ms: 5000
    max_backoff_ms: 5000

  # A single select/eliminate step
  iteration_retry:
    max_attempts: 3
    initial_backoff_ms: 5000
    max_backoff_ms: 5000

  # Save the run summary as JSON
  # summary_output_path: "csb_summary.json"

# === ELIMINATION ===
elimination:
  # Area cutoffs in square metres, processed ascending
  thresholds: [1000, 1900, 2800, 3700, 4600, 5500, 6500, 8100]

  # Neighbour absorbing an eliminated polygon: longest_border | largest_area
  merge_rule: longest_border

  # Only polygons larger than this are exported (set to null to skip export)
  min_final_area: 9000

# === PROJECTION ===
# projection:
#   output_crs: "EPSG:5070"

# === LOGGING ===
logging:
  # Relative to the creation directory
  log_dir: "log"
  error_file: "overall_error.txt"
"#;

    std::fs::write(&output, yaml)?;
    println!("Generated sample configuration at: {}", output.display());

    Ok(())
}
