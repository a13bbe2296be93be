//! Graduated small-polygon elimination.
//!
//! For each threshold, ascending, the current layer is repeatedly reduced
//! by merging every polygon with `area <= threshold` into a neighbour. A
//! threshold is finished when nothing is left to select, or when an
//! iteration fails to select strictly fewer polygons than the one before
//! it (the engine could not merge them any further).

use super::chain::{LayerChain, LayerId, WorkingLayer};
use super::thresholds::{threshold_label, EliminationThresholds};
use crate::engine::{EliminateOptions, GeoEngine, LayerRef, Predicate, VectorRef, Workspace};
use crate::error::{CsbError, Result};
use crate::logging::PartitionLog;
use crate::retry::{Recovery, RetryPolicy};

/// Result of one threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdPass {
    pub threshold: f64,

    /// Elimination iterations run at this threshold
    pub iterations: u32,

    /// Polygons still at or below the threshold when it converged
    pub remaining: u64,
}

/// Result of eliminating one source feature class.
#[derive(Debug, Clone)]
pub struct EliminationOutcome {
    pub source: VectorRef,
    pub chain: LayerChain,
    pub passes: Vec<ThresholdPass>,
}

impl EliminationOutcome {
    /// Layer left after the last threshold converged.
    pub fn terminal(&self) -> &WorkingLayer {
        self.chain.get(self.chain.head())
    }

    pub fn total_iterations(&self) -> u32 {
        self.passes.iter().map(|p| p.iterations).sum()
    }
}

/// Per-threshold loop state.
#[derive(Debug, Clone, Copy)]
struct EliminationState {
    current: LayerId,
    iteration: u32,
    previous: Option<u64>,
}

/// Outcome of a single select/eliminate/make-layer step.
enum Step {
    Converged { selected: u64 },
    Advanced { layer: LayerRef, selected: u64 },
}

/// Runs elimination for one partition.
pub struct Eliminator<'a> {
    engine: &'a dyn GeoEngine,
    thresholds: &'a EliminationThresholds,
    scratch: &'a Workspace,
    options: EliminateOptions,
    retry: RetryPolicy,
    log: &'a PartitionLog,
}

impl<'a> Eliminator<'a> {
    /// `scratch` receives every intermediate feature class; `retry` bounds
    /// each individual iteration.
    pub fn new(
        engine: &'a dyn GeoEngine,
        thresholds: &'a EliminationThresholds,
        scratch: &'a Workspace,
        options: EliminateOptions,
        retry: RetryPolicy,
        log: &'a PartitionLog,
    ) -> Self {
        Self {
            engine,
            thresholds,
            scratch,
            options,
            retry,
            log,
        }
    }

    /// Eliminate every source independently, in order. A failure names the
    /// source it happened on.
    pub fn run_all(&self, sources: &[VectorRef]) -> Result<Vec<EliminationOutcome>> {
        sources
            .iter()
            .map(|source| {
                self.run(source).map_err(|e| CsbError::SourceFailed {
                    layer: source.name().to_string(),
                    source: Box::new(e),
                })
            })
            .collect()
    }

    /// Eliminate one source feature class through all thresholds.
    pub fn run(&self, source: &VectorRef) -> Result<EliminationOutcome> {
        let source_name = source.name();
        let root = self
            .engine
            .make_feature_layer(source, &format!("{}_Layer", source_name))?;
        let mut chain = LayerChain::new(root);
        let mut passes = Vec::with_capacity(self.thresholds.len());

        for threshold in self.thresholds.iter() {
            let operation = format!("eliminate {} at {}", source_name, threshold);
            let mut state = EliminationState {
                current: chain.head(),
                iteration: 0,
                previous: None,
            };

            loop {
                let next = state.iteration + 1;
                let current = chain.get(state.current).layer.clone();
                let step = self.retry.run_with_recovery(
                    &operation,
                    self.log,
                    |_| self.iterate(&current, source_name, threshold, next, state.previous),
                    // Topology failures need a repair, which happens a level up.
                    |err| Ok(if err.is_topology() { Recovery::Abort } else { Recovery::Wait }),
                )?;

                match step {
                    Step::Converged { selected } => {
                        self.log.info(format!(
                            "{} converged at {} after {} iterations ({} polygons remain at or below it)",
                            source_name, threshold, state.iteration, selected
                        ));
                        passes.push(ThresholdPass {
                            threshold,
                            iterations: state.iteration,
                            remaining: selected,
                        });
                        break;
                    }
                    Step::Advanced { layer, selected } => {
                        state.current = chain.push(state.current, layer, threshold, next, selected);
                        state.iteration = next;
                        state.previous = Some(selected);
                    }
                }
            }
        }

        let outcome = EliminationOutcome {
            source: source.clone(),
            chain,
            passes,
        };
        self.log.info(format!(
            "Eliminated {} in {} iterations, result {}",
            source_name,
            outcome.total_iterations(),
            outcome.terminal().feature_class()
        ));
        Ok(outcome)
    }

    fn iterate(
        &self,
        current: &LayerRef,
        source_name: &str,
        threshold: f64,
        iteration: u32,
        previous: Option<u64>,
    ) -> Result<Step> {
        let selection = self
            .engine
            .select_by_attribute(current, Predicate::AreaAtMost(threshold))?;
        let selected = self.engine.count(&selection)?;

        if selected == 0 {
            return Ok(Step::Converged { selected });
        }
        if let Some(previous) = previous {
            if selected >= previous {
                self.log.warn(format!(
                    "{} polygons still selected at {} (was {}), stopping",
                    selected, threshold, previous
                ));
                return Ok(Step::Converged { selected });
            }
        }

        let name = format!("{}_{}_{}", source_name, threshold_label(threshold), iteration);
        let output = self.scratch.feature_class(&name);
        self.log.debug(format!("Eliminating {} polygons into {}", selected, name));
        self.engine.eliminate(&selection, &output, &self.options)?;
        let layer = self
            .engine
            .make_feature_layer(&output, &format!("{}_Layer", name))?;

        Ok(Step::Advanced { layer, selected })
    }
}
