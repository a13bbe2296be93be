use crate::error::{CsbError, Result};

/// Ascending, de-duplicated area cutoffs in square metres.
#[derive(Debug, Clone, PartialEq)]
pub struct EliminationThresholds(Vec<f64>);

impl EliminationThresholds {
    /// Validate and normalize a list of cutoffs.
    ///
    /// Unsorted input is reordered with a warning; duplicates are dropped.
    pub fn new(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(CsbError::InvalidThresholds("no thresholds given".to_string()));
        }
        if let Some(bad) = values.iter().find(|v| !v.is_finite() || **v <= 0.0) {
            return Err(CsbError::InvalidThresholds(format!(
                "{} is not a positive area",
                bad
            )));
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        sorted.dedup();
        if sorted.len() != values.len() || sorted.as_slice() != values {
            tracing::warn!(
                "Elimination thresholds {:?} are not strictly increasing; using {:?}",
                values,
                sorted
            );
        }

        Ok(Self(sorted))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Threshold as it appears in feature class names: `1000`, `1000p5`.
pub fn threshold_label(threshold: f64) -> String {
    threshold.to_string().replace('.', "p")
}
