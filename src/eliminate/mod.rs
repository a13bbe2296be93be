//! Small-polygon elimination.
//!
//! - [`EliminationThresholds`]: validated, ascending area cutoffs
//! - [`LayerChain`]: provenance of every layer an elimination produced
//! - [`Eliminator`]: the threshold/iteration loop driving the engine

mod chain;
mod eliminator;
mod thresholds;

pub use chain::{LayerChain, LayerId, WorkingLayer};
pub use eliminator::{EliminationOutcome, Eliminator, ThresholdPass};
pub use thresholds::{threshold_label, EliminationThresholds};
