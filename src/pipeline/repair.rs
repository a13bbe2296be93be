//! Geometry repair after a topology failure during elimination.
//!
//! The eliminator names the source that failed, and that source is
//! repaired. When the failure carries no source, the scratch workspace is
//! scanned instead: of the sources that produced any `{source}_*` feature
//! class, the one with the fewest is assumed to have broken.

use crate::engine::{FeatureClassEntry, GeoEngine, VectorRef, Workspace};
use crate::error::{CsbError, Result};
use crate::logging::PartitionLog;

/// Which sources to repair, and the evidence for it.
#[derive(Debug, Clone, PartialEq)]
pub struct RepairPlan {
    /// Derived layer count per source, in source order
    pub derived: Vec<(VectorRef, usize)>,

    /// Sources to repair
    pub targets: Vec<VectorRef>,

    /// The failing source was named by the error rather than inferred
    pub reported: bool,
}

impl RepairPlan {
    /// More than one source shares the lowest count.
    pub fn is_ambiguous(&self) -> bool {
        self.targets.len() > 1
    }
}

/// Pick the sources to repair.
///
/// A `failed` name matching one of `sources` wins. Otherwise each scratch
/// feature class is attributed to the source with the longest matching
/// `{source}_` prefix, and the least-derived sources among those that
/// started are picked (every source when none started).
pub fn plan_repair(sources: &[VectorRef], scratch: &[FeatureClassEntry], failed: Option<&str>) -> RepairPlan {
    let prefixes: Vec<String> = sources.iter().map(|s| format!("{}_", s.name())).collect();
    let mut counts = vec![0usize; sources.len()];

    for entry in scratch {
        let owner = prefixes
            .iter()
            .enumerate()
            .filter(|(_, prefix)| entry.name.starts_with(prefix.as_str()))
            .max_by_key(|(_, prefix)| prefix.len())
            .map(|(i, _)| i);
        if let Some(i) = owner {
            counts[i] += 1;
        }
    }

    let derived: Vec<(VectorRef, usize)> = sources.iter().cloned().zip(counts).collect();

    if let Some(source) = failed.and_then(|name| sources.iter().find(|s| s.name() == name)) {
        return RepairPlan {
            derived,
            targets: vec![source.clone()],
            reported: true,
        };
    }

    let started: Vec<&(VectorRef, usize)> = derived.iter().filter(|(_, count)| *count > 0).collect();
    let targets = match started.iter().map(|(_, count)| *count).min() {
        Some(min) => started
            .iter()
            .filter(|(_, count)| *count == min)
            .map(|(source, _)| source.clone())
            .collect(),
        None => sources.to_vec(),
    };

    RepairPlan {
        derived,
        targets,
        reported: false,
    }
}

/// Repair the geometry of the failed source, or of the sources most likely
/// to be broken when `failed` is unknown.
pub fn repair_sources(
    engine: &dyn GeoEngine,
    sources: &[VectorRef],
    failed: Option<&str>,
    scratch: &Workspace,
    log: &PartitionLog,
) -> Result<RepairPlan> {
    if sources.is_empty() {
        return Err(CsbError::NoSourceLayers(scratch.path().to_path_buf()));
    }

    let entries = engine.list_feature_classes(scratch)?;
    let plan = plan_repair(sources, &entries, failed);

    if !plan.reported && sources.len() > 1 {
        let counts: Vec<String> = plan
            .derived
            .iter()
            .map(|(source, count)| format!("{}={}", source.name(), count))
            .collect();
        log.warn(format!(
            "Cannot tell which layer failed ({}), repairing {} candidate(s)",
            counts.join(", "),
            plan.targets.len()
        ));
    }

    for target in &plan.targets {
        log.info(format!("Repairing geometry of {}", target));
        engine.repair_geometry(target)?;
    }

    Ok(plan)
}
