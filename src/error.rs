//! Error types for partition processing.

use std::path::PathBuf;
use thiserror::Error;

/// How an engine failure should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineErrorKind {
    /// Any failure not attributable to input geometry.
    General,
    /// Failure caused by invalid input geometry; recoverable by repair.
    Topology,
}

/// A failed call into the geoprocessing engine.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed: {message}")]
pub struct EngineError {
    /// Name of the engine operation (e.g. `eliminate`)
    pub operation: String,

    /// Failure classification
    pub kind: EngineErrorKind,

    /// Engine-provided message
    pub message: String,
}

impl EngineError {
    pub fn general(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            kind: EngineErrorKind::General,
            message: message.into(),
        }
    }

    pub fn topology(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            kind: EngineErrorKind::Topology,
            message: message.into(),
        }
    }

    pub fn is_topology(&self) -> bool {
        self.kind == EngineErrorKind::Topology
    }
}

/// Errors raised while processing a partition.
#[derive(Debug, Error)]
pub enum CsbError {
    /// A year inside the declared range has no input raster.
    #[error("missing year raster for {area} ({year}): {}", path.display())]
    MissingYearRaster {
        area: String,
        year: i32,
        path: PathBuf,
    },

    /// The year-count field did not show up on the table.
    #[error("field {field} is not visible on {table}")]
    FieldNotVisible { field: String, table: String },

    /// A retried operation ran out of attempts.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<CsbError>,
    },

    /// Elimination of one source layer failed.
    #[error("elimination of {layer} failed: {source}")]
    SourceFailed {
        layer: String,
        #[source]
        source: Box<CsbError>,
    },

    #[error("invalid elimination thresholds: {0}")]
    InvalidThresholds(String),

    /// A raster file name that does not look like `<letters><digits>_<year>`.
    #[error("invalid area name: {0}")]
    InvalidAreaName(String),

    /// Elimination found nothing to work on.
    #[error("no polygon feature classes found in {}", .0.display())]
    NoSourceLayers(PathBuf),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CsbError {
    /// The engine error at the root of this error, if any.
    pub fn engine_cause(&self) -> Option<&EngineError> {
        match self {
            CsbError::Engine(e) => Some(e),
            CsbError::RetriesExhausted { source, .. } | CsbError::SourceFailed { source, .. } => {
                source.engine_cause()
            }
            _ => None,
        }
    }

    /// Name of the source layer whose elimination failed, if known.
    pub fn failed_source(&self) -> Option<&str> {
        match self {
            CsbError::SourceFailed { layer, .. } => Some(layer.as_str()),
            CsbError::RetriesExhausted { source, .. } => source.failed_source(),
            _ => None,
        }
    }

    /// Whether the failure was caused by invalid input geometry.
    pub fn is_topology(&self) -> bool {
        self.engine_cause().is_some_and(EngineError::is_topology)
    }

    /// Fatal errors are never retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            CsbError::MissingYearRaster { .. }
            | CsbError::InvalidThresholds(_)
            | CsbError::InvalidAreaName(_) => true,
            CsbError::SourceFailed { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}

pub type Result<T, E = CsbError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::general("combine", "raster locked");
        assert_eq!(err.to_string(), "combine failed: raster locked");
        assert!(!err.is_topology());
    }

    #[test]
    fn test_topology_seen_through_retry_wrapper() {
        let err = CsbError::RetriesExhausted {
            operation: "eliminate iteration".to_string(),
            attempts: 3,
            source: Box::new(EngineError::topology("eliminate", "self-intersection").into()),
        };
        assert!(err.is_topology());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_missing_year_is_fatal() {
        let err = CsbError::MissingYearRaster {
            area: "AL1".to_string(),
            year: 2019,
            path: PathBuf::from("/data/2019/AL1_2019.tif"),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("AL1_2019.tif"));
    }

    #[test]
    fn test_failed_source_seen_through_retry_wrapper() {
        let failed = CsbError::SourceFailed {
            layer: "AL1_In".to_string(),
            source: Box::new(EngineError::topology("eliminate", "self-intersection").into()),
        };
        let err = CsbError::RetriesExhausted {
            operation: "elimination".to_string(),
            attempts: 5,
            source: Box::new(failed),
        };
        assert_eq!(err.failed_source(), Some("AL1_In"));
        assert!(err.is_topology());
        assert!(!err.is_fatal());
        assert_eq!(CsbError::InvalidAreaName("x".into()).failed_source(), None);
    }
}
