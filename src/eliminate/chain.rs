//! Provenance chain of working layers.
//!
//! Every elimination iteration produces a new feature class and a layer
//! over it. Nodes are never mutated or removed; each one points back at the
//! layer it was derived from.

use crate::engine::{LayerRef, VectorRef};

/// Index of a node in a [`LayerChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(usize);

/// One stage of consolidation.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkingLayer {
    pub layer: LayerRef,

    /// Node this layer was produced from; `None` for the source layer
    pub parent: Option<LayerId>,

    /// Threshold that produced this layer
    pub threshold: Option<f64>,

    /// 1-based iteration within `threshold`
    pub iteration: u32,

    /// Number of polygons selected for elimination when it was produced
    pub selected: u64,
}

impl WorkingLayer {
    pub fn name(&self) -> &str {
        &self.layer.name
    }

    pub fn feature_class(&self) -> &VectorRef {
        &self.layer.source
    }
}

/// Append-only arena of [`WorkingLayer`]s rooted at a source layer.
#[derive(Debug, Clone)]
pub struct LayerChain {
    nodes: Vec<WorkingLayer>,
}

impl LayerChain {
    pub fn new(source: LayerRef) -> Self {
        Self {
            nodes: vec![WorkingLayer {
                layer: source,
                parent: None,
                threshold: None,
                iteration: 0,
                selected: 0,
            }],
        }
    }

    pub fn root(&self) -> LayerId {
        LayerId(0)
    }

    /// Most recently appended node.
    pub fn head(&self) -> LayerId {
        LayerId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: LayerId) -> &WorkingLayer {
        &self.nodes[id.0]
    }

    pub fn push(
        &mut self,
        parent: LayerId,
        layer: LayerRef,
        threshold: f64,
        iteration: u32,
        selected: u64,
    ) -> LayerId {
        self.nodes.push(WorkingLayer {
            layer,
            parent: Some(parent),
            threshold: Some(threshold),
            iteration,
            selected,
        });
        self.head()
    }

    /// Nodes from `id` back to the source layer.
    pub fn lineage(&self, id: LayerId) -> impl Iterator<Item = &WorkingLayer> + '_ {
        std::iter::successors(Some(self.get(id)), move |node| node.parent.map(|p| self.get(p)))
    }

    /// Number of derived layers (excluding the source).
    pub fn derived(&self) -> usize {
        self.nodes.len() - 1
    }
}
