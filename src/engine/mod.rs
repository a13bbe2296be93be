//! Geoprocessing engine capability interface.
//!
//! Every raster and vector primitive the pipeline needs (combine, masking,
//! vectorization, selection, elimination, geometry repair...) is performed
//! by an external engine. The pipeline only sequences, retries and
//! converges these calls, so it talks to the engine exclusively through
//! [`GeoEngine`].

mod command;
#[cfg(test)]
pub(crate) mod memory;

pub use command::CommandEngine;

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A raster dataset on disk (also addressable as a table for its VAT).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterRef(PathBuf);

impl RasterRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for RasterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A container of feature classes (a geodatabase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Workspace(PathBuf);

impl Workspace {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Reference to a feature class stored in this workspace.
    pub fn feature_class(&self, name: &str) -> VectorRef {
        VectorRef(self.0.join(name))
    }
}

impl fmt::Display for Workspace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// A feature class: `<workspace>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorRef(PathBuf);

impl VectorRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Feature class name (last path component).
    pub fn name(&self) -> &str {
        self.0.file_name().and_then(|n| n.to_str()).unwrap_or("")
    }

    /// Workspace holding this feature class.
    pub fn workspace(&self) -> Workspace {
        Workspace(self.0.parent().map(Path::to_path_buf).unwrap_or_default())
    }
}

impl fmt::Display for VectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// An in-engine layer (view) over a feature class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LayerRef {
    pub name: String,
    pub source: VectorRef,
}

/// Attribute predicates understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Predicate {
    /// Every feature.
    All,
    /// `Shape_Area <= value` (inclusive).
    AreaAtMost(f64),
    /// `Shape_Area > value`.
    AreaGreaterThan(f64),
}

impl Predicate {
    /// SQL-style where clause for engines that want one.
    pub fn where_clause(&self) -> String {
        match self {
            Predicate::All => String::new(),
            Predicate::AreaAtMost(v) => format!("Shape_Area <= {}", v),
            Predicate::AreaGreaterThan(v) => format!("Shape_Area > {}", v),
        }
    }

    /// Evaluate the predicate against a polygon area.
    pub fn matches(&self, area: f64) -> bool {
        match *self {
            Predicate::All => true,
            Predicate::AreaAtMost(v) => area <= v,
            Predicate::AreaGreaterThan(v) => area > v,
        }
    }
}

/// A set of selected features on a layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub layer: LayerRef,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Short,
    Long,
    Double,
    Text,
}

/// Expressions used to populate a computed field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldExpression {
    /// Number of listed fields whose value is greater than zero.
    CountPositive { fields: Vec<String> },
}

/// Cells matching `field < below` become NoData.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskCondition {
    pub field: String,
    pub below: f64,
}

impl MaskCondition {
    pub fn where_clause(&self) -> String {
        format!("\"{}\" < {}", self.field, self.below)
    }
}

/// Which neighbour absorbs an eliminated polygon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// Neighbour sharing the longest border.
    #[default]
    LongestBorder,
    /// Neighbour with the largest area.
    LargestArea,
}

/// Options for a single `eliminate` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EliminateOptions {
    pub rule: MergeRule,
    /// CRS the output is written in; areas are measured in it.
    pub output_crs: String,
}

/// A feature class found in a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureClassEntry {
    pub path: VectorRef,
    pub name: String,
}

/// Capabilities required from the geoprocessing engine.
///
/// Every call may fail with an [`EngineError`] naming the operation.
/// Implementations must be shareable across worker threads.
pub trait GeoEngine: Send + Sync {
    /// Create an empty workspace (geodatabase), replacing nothing that exists.
    fn create_workspace(&self, workspace: &Workspace) -> EngineResult<()>;

    /// Merge per-year rasters into one unique-combination raster.
    fn combine(&self, rasters: &[RasterRef], out: &RasterRef) -> EngineResult<()>;

    fn add_field(&self, table: &RasterRef, name: &str, field_type: FieldType) -> EngineResult<()>;

    fn list_fields(&self, table: &RasterRef) -> EngineResult<Vec<String>>;

    fn calculate_field(
        &self,
        table: &RasterRef,
        field: &str,
        expression: &FieldExpression,
    ) -> EngineResult<()>;

    fn set_null(&self, input: &RasterRef, condition: &MaskCondition, out: &RasterRef) -> EngineResult<()>;

    fn raster_to_polygon(&self, input: &RasterRef, out: &VectorRef) -> EngineResult<()>;

    fn project(&self, input: &VectorRef, out: &VectorRef, target_crs: &str) -> EngineResult<()>;

    fn select_by_attribute(&self, layer: &LayerRef, predicate: Predicate) -> EngineResult<Selection>;

    /// Merge the selected polygons into neighbours, writing a new feature class.
    fn eliminate(
        &self,
        selection: &Selection,
        out: &VectorRef,
        options: &EliminateOptions,
    ) -> EngineResult<()>;

    fn make_feature_layer(&self, source: &VectorRef, name: &str) -> EngineResult<LayerRef>;

    fn count(&self, selection: &Selection) -> EngineResult<u64>;

    fn repair_geometry(&self, feature: &VectorRef) -> EngineResult<()>;

    /// Polygon feature classes stored in a workspace.
    fn list_feature_classes(&self, workspace: &Workspace) -> EngineResult<Vec<FeatureClassEntry>>;

    /// Copy the selected features into a new feature class.
    fn export_features(&self, selection: &Selection, out: &VectorRef) -> EngineResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_ref_parts() {
        let fc = Workspace::new("/run/Vectors_In/AL1_2018-2023_In.gdb").feature_class("AL1_In");
        assert_eq!(fc.name(), "AL1_In");
        assert_eq!(
            fc.workspace().path(),
            Path::new("/run/Vectors_In/AL1_2018-2023_In.gdb")
        );
    }

    #[test]
    fn test_predicate_inclusive_threshold() {
        assert!(Predicate::AreaAtMost(1000.0).matches(1000.0));
        assert!(!Predicate::AreaAtMost(1000.0).matches(1000.5));
        assert!(!Predicate::AreaGreaterThan(9000.0).matches(9000.0));
        assert!(Predicate::All.matches(0.0));
    }

    #[test]
    fn test_where_clauses() {
        assert_eq!(Predicate::AreaAtMost(1000.0).where_clause(), "Shape_Area <= 1000");
        let mask = MaskCondition {
            field: "COUNT0".to_string(),
            below: 1.1,
        };
        assert_eq!(mask.where_clause(), "\"COUNT0\" < 1.1");
    }

    #[test]
    fn test_predicate_serde() {
        let json = serde_json::to_string(&Predicate::AreaAtMost(2800.0)).unwrap();
        assert_eq!(json, r#"{"type":"area_at_most","value":2800.0}"#);
    }
}
