//! Per-partition processing pipeline.
//!
//! ## Stages
//!
//! A partition moves strictly forward through:
//!
//! 1. `INIT`: resolve the per-year rasters and create the output workspaces
//! 2. `COMBINE`: merge the year rasters into one unique-combination raster
//! 3. `COUNT_FIELD`: add the years-observed field and populate it
//! 4. `MASK`: null out pixels observed in too few years
//! 5. `VECTORIZE` and `PROJECT`: polygons in the output CRS
//! 6. `ELIMINATE`: graduated small-polygon elimination; a topology failure
//!    detours through `REPAIR` before the next attempt
//! 7. `EXPORT`: keep polygons above the minimum final area
//!
//! Any error ends the partition; the stage it happened in is reported in
//! the [`PartitionResult`].

use crate::config::Config;
use crate::crs;
use crate::eliminate::{EliminationOutcome, EliminationThresholds, Eliminator};
use crate::engine::{
    EliminateOptions, FieldExpression, FieldType, GeoEngine, MaskCondition, Predicate, RasterRef,
    VectorRef,
};
use crate::error::{CsbError, Result};
use crate::logging::{ErrorLog, PartitionLog};
use crate::partition::{Partition, WorkspaceLayout};
use crate::pipeline::repair;
use crate::pipeline::scheduler::PartitionRunner;
use crate::retry::{Recovery, RetryPolicy};
use serde::Serialize;
use std::cell::Cell;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pipeline stage a partition is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Init,
    Combine,
    CountField,
    Mask,
    Vectorize,
    Project,
    Eliminate,
    Repair,
    Export,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "INIT",
            Stage::Combine => "COMBINE",
            Stage::CountField => "COUNT_FIELD",
            Stage::Mask => "MASK",
            Stage::Vectorize => "VECTORIZE",
            Stage::Project => "PROJECT",
            Stage::Eliminate => "ELIMINATE",
            Stage::Repair => "REPAIR",
            Stage::Export => "EXPORT",
            Stage::Done => "DONE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    Success,
    Failure,
}

/// Final report for one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionResult {
    pub area: String,

    pub status: PartitionStatus,

    pub message: String,

    /// Stage the partition ended in; `None` if the worker died
    pub stage: Option<Stage>,

    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl PartitionResult {
    pub fn success(area: &str, elapsed: Duration) -> Self {
        Self {
            area: area.to_string(),
            status: PartitionStatus::Success,
            message: format!("Finished {}", area),
            stage: Some(Stage::Done),
            elapsed,
        }
    }

    pub fn failure(area: &str, stage: Option<Stage>, error: impl fmt::Display, elapsed: Duration) -> Self {
        Self {
            area: area.to_string(),
            status: PartitionStatus::Failure,
            message: format!("CSB sub-unit {} failed with error: {}", area, error),
            stage,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PartitionStatus::Success
    }
}

/// Parameters shared by every partition of a run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub config: Config,
    pub creation_dir: PathBuf,
    pub start_year: i32,
    pub end_year: i32,
}

impl PipelineSettings {
    pub fn new(config: Config, creation_dir: impl Into<PathBuf>, start_year: i32, end_year: i32) -> Self {
        Self {
            config,
            creation_dir: creation_dir.into(),
            start_year,
            end_year,
        }
    }

    pub fn raster_root(&self) -> &Path {
        self.config.input.raster_root(&self.creation_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config.logging.log_dir(&self.creation_dir)
    }
}

/// Runs the full stage sequence for one partition at a time.
pub struct UnitPipeline {
    engine: Arc<dyn GeoEngine>,
    settings: Arc<PipelineSettings>,
    error_log: Arc<ErrorLog>,
}

impl UnitPipeline {
    pub fn new(engine: Arc<dyn GeoEngine>, settings: Arc<PipelineSettings>, error_log: Arc<ErrorLog>) -> Self {
        Self {
            engine,
            settings,
            error_log,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process one partition. Never fails: errors become a failed result.
    pub fn run(&self, area: &str) -> PartitionResult {
        let start = Instant::now();
        let log = match PartitionLog::open(&self.settings.log_dir(), area) {
            Ok(log) => log,
            Err(e) => {
                tracing::warn!(area, "Could not open partition log: {}", e);
                PartitionLog::console(area)
            }
        };

        let stage = Cell::new(Stage::Init);
        match self.execute(area, &log, &stage) {
            Ok(()) => {
                let result = PartitionResult::success(area, start.elapsed());
                log.info(format!("{} in {:.1}s", result.message, result.elapsed.as_secs_f64()));
                result
            }
            Err(e) => {
                let result = PartitionResult::failure(area, Some(stage.get()), &e, start.elapsed());
                log.error(format!("{} (stage {})", result.message, stage.get()));
                self.error_log
                    .record(area, format!("failed at {}: {}", stage.get(), e));
                result
            }
        }
    }

    fn execute(&self, area: &str, log: &PartitionLog, stage: &Cell<Stage>) -> Result<()> {
        let settings = &self.settings;
        let config = &settings.config;

        log.info(format!(
            "Starting {} for {}-{}",
            area, settings.start_year, settings.end_year
        ));
        let partition = Partition::resolve(
            area,
            settings.start_year,
            settings.end_year,
            settings.raster_root(),
            &config.input.raster_extension,
        )?;
        let layout = WorkspaceLayout::new(&settings.creation_dir, &partition);
        self.init_workspaces(&layout, log)?;

        self.enter(stage, Stage::Combine, log);
        let combined = layout.combined_raster();
        self.engine.combine(&partition.year_rasters, &combined)?;

        self.enter(stage, Stage::CountField, log);
        self.add_count_field(&combined, log)?;
        let expression = FieldExpression::CountPositive {
            fields: partition.year_fields(),
        };
        self.engine
            .calculate_field(&combined, &config.processing.count_field, &expression)?;

        self.enter(stage, Stage::Mask, log);
        let masked = layout.masked_raster();
        let condition = MaskCondition {
            field: config.processing.count_field.clone(),
            below: config.processing.min_years,
        };
        self.engine.set_null(&combined, &condition, &masked)?;

        self.enter(stage, Stage::Vectorize, log);
        let polygon_name = layout.polygon_name();
        let vectorized = layout.vectorized().feature_class(&polygon_name);
        self.engine.raster_to_polygon(&masked, &vectorized)?;

        self.enter(stage, Stage::Project, log);
        let projected = layout.projected().feature_class(&polygon_name);
        log.info(format!(
            "Projecting {} to {}",
            polygon_name,
            crs::display_name(&config.projection.output_crs)
        ));
        self.engine
            .project(&vectorized, &projected, &config.projection.output_crs)?;

        self.enter(stage, Stage::Eliminate, log);
        let outcomes = self.eliminate(&layout, log, stage)?;

        self.enter(stage, Stage::Export, log);
        self.export(&outcomes, &layout, log)?;

        self.enter(stage, Stage::Done, log);
        Ok(())
    }

    fn enter(&self, stage: &Cell<Stage>, next: Stage, log: &PartitionLog) {
        stage.set(next);
        log.debug(format!("Stage {}", next));
    }

    fn init_workspaces(&self, layout: &WorkspaceLayout, log: &PartitionLog) -> Result<()> {
        for dir in layout.raster_dirs() {
            std::fs::create_dir_all(&dir)?;
        }
        for workspace in layout.workspaces() {
            if let Some(parent) = workspace.path().parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.engine.create_workspace(&workspace)?;
            log.debug(format!("Created workspace {}", workspace));
        }
        Ok(())
    }

    /// Add the count field, retrying until the engine reports it.
    ///
    /// Existence is checked before adding so that a field added by an
    /// earlier attempt is not added twice.
    fn add_count_field(&self, table: &RasterRef, log: &PartitionLog) -> Result<()> {
        let field = self.settings.config.processing.count_field.as_str();
        let policy = RetryPolicy::from_config(&self.settings.config.processing.field_retry);

        policy.run(&format!("add field {}", field), log, |_| {
            let fields = self.engine.list_fields(table)?;
            if !fields.iter().any(|f| f == field) {
                self.engine.add_field(table, field, FieldType::Short)?;
            }

            let fields = self.engine.list_fields(table)?;
            if fields.iter().any(|f| f == field) {
                Ok(())
            } else {
                Err(CsbError::FieldNotVisible {
                    field: field.to_string(),
                    table: table.to_string(),
                })
            }
        })
    }

    /// Eliminate every polygon feature class in the projected workspace.
    ///
    /// Each attempt starts over from the source layers.
    fn eliminate(
        &self,
        layout: &WorkspaceLayout,
        log: &PartitionLog,
        stage: &Cell<Stage>,
    ) -> Result<Vec<EliminationOutcome>> {
        let config = &self.settings.config;
        let input = layout.projected();
        let sources: Vec<VectorRef> = self
            .engine
            .list_feature_classes(&input)?
            .into_iter()
            .map(|entry| entry.path)
            .collect();
        if sources.is_empty() {
            return Err(CsbError::NoSourceLayers(input.path().to_path_buf()));
        }

        let thresholds = EliminationThresholds::new(&config.elimination.thresholds)?;
        let scratch = layout.scratch();
        let options = EliminateOptions {
            rule: config.elimination.merge_rule,
            output_crs: config.elimination.coordinate_system.clone(),
        };
        let eliminator = Eliminator::new(
            self.engine.as_ref(),
            &thresholds,
            &scratch,
            options,
            RetryPolicy::from_config(&config.processing.iteration_retry),
            log,
        );

        RetryPolicy::from_config(&config.processing.elimination_retry).run_with_recovery(
            "elimination",
            log,
            |attempt| {
                stage.set(Stage::Eliminate);
                if attempt > 1 {
                    log.info(format!("Restarting elimination (attempt {})", attempt));
                }
                eliminator.run_all(&sources)
            },
            |err| {
                if !err.is_topology() {
                    return Ok(Recovery::Wait);
                }
                stage.set(Stage::Repair);
                repair::repair_sources(self.engine.as_ref(), &sources, err.failed_source(), &scratch, log)?;
                Ok(Recovery::Retry)
            },
        )
    }

    fn export(
        &self,
        outcomes: &[EliminationOutcome],
        layout: &WorkspaceLayout,
        log: &PartitionLog,
    ) -> Result<()> {
        let Some(min_area) = self.settings.config.elimination.min_final_area else {
            log.info("Final export disabled");
            return Ok(());
        };

        let output = layout.output();
        for outcome in outcomes {
            let terminal = outcome.terminal();
            let selection = self
                .engine
                .select_by_attribute(&terminal.layer, Predicate::AreaGreaterThan(min_area))?;
            let out = output.feature_class(&format!("Out_{}", outcome.source.name()));
            self.engine.export_features(&selection, &out)?;
            log.info(format!("Exported {} to {}", terminal.name(), out));
        }
        Ok(())
    }
}

impl PartitionRunner for UnitPipeline {
    fn run_partition(&self, area: &str) -> PartitionResult {
        self.run(area)
    }

    fn record_failure(&self, area: &str, message: &str) {
        self.error_log.record(area, message);
    }
}
