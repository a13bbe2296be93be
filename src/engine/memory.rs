//! In-memory engine used by the unit tests.
//!
//! Polygons live in a one-dimensional strip: each polygon touches its
//! predecessor and successor. `eliminate` folds every run of selected
//! polygons into the larger adjacent unselected polygon; when the whole
//! layer is selected, neighbours are merged pairwise.

use super::{
    EliminateOptions, EngineResult, FeatureClassEntry, FieldExpression, FieldType, GeoEngine,
    LayerRef, MaskCondition, Predicate, RasterRef, Selection, VectorRef, Workspace,
};
use crate::error::EngineError;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    pub area: f64,
    pub valid: bool,
}

#[derive(Default)]
struct State {
    rasters: HashSet<PathBuf>,
    base_fields: HashMap<PathBuf, Vec<String>>,
    added_fields: HashMap<PathBuf, Vec<String>>,
    hidden_listings: u32,
    feature_classes: BTreeMap<PathBuf, Vec<Polygon>>,
    workspaces: BTreeSet<PathBuf>,
    layers: HashMap<String, VectorRef>,
    failures: HashMap<String, VecDeque<EngineError>>,
    topology_faults: HashSet<PathBuf>,
    stall: bool,
    vectorized: Vec<f64>,
    calls: Vec<(String, String)>,
}

pub struct MemoryEngine {
    state: Mutex<State>,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        let state = State {
            vectorized: vec![400.0, 900.0, 12_000.0, 700.0, 25_000.0],
            ..Default::default()
        };
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an existing input raster.
    pub fn add_raster(&self, path: impl Into<PathBuf>) {
        self.lock().rasters.insert(path.into());
    }

    /// Create a feature class holding polygons of the given areas.
    pub fn insert_feature_class(&self, fc: &VectorRef, areas: &[f64]) {
        let polygons = areas.iter().map(|&area| Polygon { area, valid: true }).collect();
        self.lock().feature_classes.insert(fc.path().to_path_buf(), polygons);
    }

    /// Mark one polygon of a feature class as topologically invalid.
    pub fn corrupt(&self, fc: &VectorRef, index: usize) {
        if let Some(polygon) = self
            .lock()
            .feature_classes
            .get_mut(fc.path())
            .and_then(|p| p.get_mut(index))
        {
            polygon.valid = false;
        }
    }

    /// Make the next `eliminate` into `out` fail with a topology error.
    pub fn fail_topology_at(&self, out: &VectorRef) {
        self.lock().topology_faults.insert(out.path().to_path_buf());
    }

    /// Make the next `times` calls of `operation` fail with a general error.
    pub fn fail_next(&self, operation: &str, times: usize) {
        let mut state = self.lock();
        let queue = state.failures.entry(operation.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(EngineError::general(operation, "injected failure"));
        }
    }

    /// Hide fields added through `add_field` from the next `listings` calls.
    pub fn hide_added_fields(&self, listings: u32) {
        self.lock().hidden_listings = listings;
    }

    /// Make `eliminate` copy its input unchanged.
    pub fn set_stall(&self, stall: bool) {
        self.lock().stall = stall;
    }

    /// Areas of the polygons produced by `raster_to_polygon`.
    pub fn set_vectorized(&self, areas: Vec<f64>) {
        self.lock().vectorized = areas;
    }

    pub fn areas(&self, fc: &VectorRef) -> Option<Vec<f64>> {
        self.lock()
            .feature_classes
            .get(fc.path())
            .map(|p| p.iter().map(|p| p.area).collect())
    }

    /// Number of calls made to `operation`.
    pub fn call_count(&self, operation: &str) -> usize {
        self.lock().calls.iter().filter(|(op, _)| op == operation).count()
    }

    /// Targets of every call made to `operation`, in order.
    pub fn call_targets(&self, operation: &str) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, target)| target.clone())
            .collect()
    }

    /// Distinct operation names in first-call order.
    pub fn operation_order(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (op, _) in self.lock().calls.iter() {
            if !seen.contains(op) {
                seen.push(op.clone());
            }
        }
        seen
    }

    fn begin(&self, operation: &str, target: impl ToString) -> EngineResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push((operation.to_string(), target.to_string()));
        if let Some(err) = state.failures.get_mut(operation).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

fn missing(operation: &str, what: impl std::fmt::Display) -> EngineError {
    EngineError::general(operation, format!("{} does not exist", what))
}

fn layer_source(state: &State, operation: &str, layer: &LayerRef) -> EngineResult<PathBuf> {
    state
        .layers
        .get(&layer.name)
        .map(|v| v.path().to_path_buf())
        .ok_or_else(|| missing(operation, &layer.name))
}

fn polygons<'a>(state: &'a State, operation: &str, path: &Path) -> EngineResult<&'a Vec<Polygon>> {
    state
        .feature_classes
        .get(path)
        .ok_or_else(|| missing(operation, path.display()))
}

/// Per-year field name for a raster stem `<area>_<year>`.
fn year_field(stem: &str) -> String {
    match stem.rsplit_once('_') {
        Some((area, year)) => format!("{}_{}", area.chars().take(5).collect::<String>(), year),
        None => stem.to_string(),
    }
}

fn merge(polygons: &[Polygon], predicate: Predicate) -> Vec<Polygon> {
    let selected: Vec<bool> = polygons.iter().map(|p| predicate.matches(p.area)).collect();

    if selected.iter().all(|&s| s) {
        return polygons
            .chunks(2)
            .map(|pair| Polygon {
                area: pair.iter().map(|p| p.area).sum(),
                valid: true,
            })
            .collect();
    }

    let mut out = Vec::new();
    let mut index = vec![None; polygons.len()];
    for (i, polygon) in polygons.iter().enumerate() {
        if !selected[i] {
            index[i] = Some(out.len());
            out.push(polygon.clone());
        }
    }

    let mut i = 0;
    while i < polygons.len() {
        if !selected[i] {
            i += 1;
            continue;
        }
        let start = i;
        while i < polygons.len() && selected[i] {
            i += 1;
        }
        let run_area: f64 = polygons[start..i].iter().map(|p| p.area).sum();
        let left = start.checked_sub(1).and_then(|k| index[k]);
        let right = index.get(i).copied().flatten();
        let target = match (left, right) {
            (Some(l), Some(r)) => {
                if out[l].area >= out[r].area {
                    l
                } else {
                    r
                }
            }
            (Some(l), None) => l,
            (None, Some(r)) => r,
            (None, None) => continue,
        };
        out[target].area += run_area;
    }
    out
}

impl GeoEngine for MemoryEngine {
    fn create_workspace(&self, workspace: &Workspace) -> EngineResult<()> {
        let mut state = self.begin("create_workspace", workspace)?;
        state.workspaces.insert(workspace.path().to_path_buf());
        Ok(())
    }

    fn combine(&self, rasters: &[RasterRef], out: &RasterRef) -> EngineResult<()> {
        let mut state = self.begin("combine", out)?;
        let mut fields = vec!["Value".to_string(), "Count".to_string()];
        for raster in rasters {
            if !state.rasters.contains(raster.path()) {
                return Err(missing("combine", raster));
            }
            let stem = raster
                .path()
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            fields.push(year_field(stem));
        }
        state.rasters.insert(out.path().to_path_buf());
        state.base_fields.insert(out.path().to_path_buf(), fields);
        Ok(())
    }

    fn add_field(&self, table: &RasterRef, name: &str, _field_type: FieldType) -> EngineResult<()> {
        let mut state = self.begin("add_field", table)?;
        if !state.rasters.contains(table.path()) {
            return Err(missing("add_field", table));
        }
        let added = state.added_fields.entry(table.path().to_path_buf()).or_default();
        if added.iter().any(|f| f == name) {
            return Err(EngineError::general("add_field", format!("{} already exists", name)));
        }
        added.push(name.to_string());
        Ok(())
    }

    fn list_fields(&self, table: &RasterRef) -> EngineResult<Vec<String>> {
        let mut state = self.begin("list_fields", table)?;
        let mut fields = state
            .base_fields
            .get(table.path())
            .cloned()
            .ok_or_else(|| missing("list_fields", table))?;
        if state.hidden_listings > 0 {
            state.hidden_listings -= 1;
        } else if let Some(added) = state.added_fields.get(table.path()) {
            fields.extend(added.iter().cloned());
        }
        Ok(fields)
    }

    fn calculate_field(
        &self,
        table: &RasterRef,
        field: &str,
        expression: &FieldExpression,
    ) -> EngineResult<()> {
        let state = self.begin("calculate_field", table)?;
        let base = state.base_fields.get(table.path()).cloned().unwrap_or_default();
        let added = state.added_fields.get(table.path()).cloned().unwrap_or_default();
        if !added.iter().any(|f| f == field) {
            return Err(missing("calculate_field", field));
        }
        let FieldExpression::CountPositive { fields } = expression;
        if let Some(unknown) = fields.iter().find(|f| !base.contains(f)) {
            return Err(missing("calculate_field", unknown));
        }
        Ok(())
    }

    fn set_null(&self, input: &RasterRef, condition: &MaskCondition, out: &RasterRef) -> EngineResult<()> {
        let mut state = self.begin("set_null", out)?;
        let has_field = state
            .added_fields
            .get(input.path())
            .is_some_and(|f| f.contains(&condition.field));
        if !has_field {
            return Err(missing("set_null", &condition.field));
        }
        state.rasters.insert(out.path().to_path_buf());
        Ok(())
    }

    fn raster_to_polygon(&self, input: &RasterRef, out: &VectorRef) -> EngineResult<()> {
        let mut state = self.begin("raster_to_polygon", out)?;
        if !state.rasters.contains(input.path()) {
            return Err(missing("raster_to_polygon", input));
        }
        let polygons = state
            .vectorized
            .iter()
            .map(|&area| Polygon { area, valid: true })
            .collect();
        state.feature_classes.insert(out.path().to_path_buf(), polygons);
        Ok(())
    }

    fn project(&self, input: &VectorRef, out: &VectorRef, _target_crs: &str) -> EngineResult<()> {
        let mut state = self.begin("project", out)?;
        let polygons = polygons(&state, "project", input.path())?.clone();
        state.feature_classes.insert(out.path().to_path_buf(), polygons);
        Ok(())
    }

    fn select_by_attribute(&self, layer: &LayerRef, predicate: Predicate) -> EngineResult<Selection> {
        let state = self.begin("select_by_attribute", &layer.name)?;
        layer_source(&state, "select_by_attribute", layer)?;
        Ok(Selection {
            layer: layer.clone(),
            predicate,
        })
    }

    fn eliminate(
        &self,
        selection: &Selection,
        out: &VectorRef,
        _options: &EliminateOptions,
    ) -> EngineResult<()> {
        let mut state = self.begin("eliminate", out)?;
        let source = layer_source(&state, "eliminate", &selection.layer)?;
        if state.topology_faults.remove(out.path()) {
            return Err(EngineError::topology(
                "eliminate",
                format!("topology error writing {}", out),
            ));
        }
        let input = polygons(&state, "eliminate", &source)?;
        if input.iter().any(|p| !p.valid) {
            return Err(EngineError::topology(
                "eliminate",
                format!("invalid geometry in {}", source.display()),
            ));
        }
        let output = if state.stall {
            input.clone()
        } else {
            merge(input, selection.predicate)
        };
        state.feature_classes.insert(out.path().to_path_buf(), output);
        Ok(())
    }

    fn make_feature_layer(&self, source: &VectorRef, name: &str) -> EngineResult<LayerRef> {
        let mut state = self.begin("make_feature_layer", name)?;
        polygons(&state, "make_feature_layer", source.path())?;
        state.layers.insert(name.to_string(), source.clone());
        Ok(LayerRef {
            name: name.to_string(),
            source: source.clone(),
        })
    }

    fn count(&self, selection: &Selection) -> EngineResult<u64> {
        let state = self.begin("count", &selection.layer.name)?;
        let source = layer_source(&state, "count", &selection.layer)?;
        let input = polygons(&state, "count", &source)?;
        Ok(input.iter().filter(|p| selection.predicate.matches(p.area)).count() as u64)
    }

    fn repair_geometry(&self, feature: &VectorRef) -> EngineResult<()> {
        let mut state = self.begin("repair_geometry", feature)?;
        let polygons = state
            .feature_classes
            .get_mut(feature.path())
            .ok_or_else(|| missing("repair_geometry", feature))?;
        for polygon in polygons.iter_mut() {
            polygon.valid = true;
        }
        Ok(())
    }

    fn list_feature_classes(&self, workspace: &Workspace) -> EngineResult<Vec<FeatureClassEntry>> {
        let state = self.begin("list_feature_classes", workspace)?;
        Ok(state
            .feature_classes
            .keys()
            .filter(|path| path.parent() == Some(workspace.path()))
            .map(|path| {
                let fc = VectorRef::new(path.clone());
                FeatureClassEntry {
                    name: fc.name().to_string(),
                    path: fc,
                }
            })
            .collect())
    }

    fn export_features(&self, selection: &Selection, out: &VectorRef) -> EngineResult<()> {
        let mut state = self.begin("export_features", out)?;
        let source = layer_source(&state, "export_features", &selection.layer)?;
        let kept: Vec<Polygon> = polygons(&state, "export_features", &source)?
            .iter()
            .filter(|p| selection.predicate.matches(p.area))
            .cloned()
            .collect();
        state.feature_classes.insert(out.path().to_path_buf(), kept);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn areas(polygons: &[Polygon]) -> Vec<f64> {
        polygons.iter().map(|p| p.area).collect()
    }

    fn strip(values: &[f64]) -> Vec<Polygon> {
        values.iter().map(|&area| Polygon { area, valid: true }).collect()
    }

    #[test]
    fn test_merge_into_larger_neighbour() {
        let merged = merge(&strip(&[5000.0, 300.0, 200.0, 8000.0]), Predicate::AreaAtMost(1000.0));
        assert_eq!(areas(&merged), vec![5000.0, 8500.0]);
    }

    #[test]
    fn test_merge_all_selected_pairs() {
        let merged = merge(&strip(&[5.0, 5.0, 5.0]), Predicate::AreaAtMost(12.0));
        assert_eq!(areas(&merged), vec![10.0, 5.0]);
    }

    #[test]
    fn test_year_field_truncates_area() {
        assert_eq!(year_field("ABCDEFG12_2020"), "ABCDE_2020");
        assert_eq!(year_field("AL1_2020"), "AL1_2020");
    }
}
