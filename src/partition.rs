//! Partition discovery and per-year raster resolution.
//!
//! Split rasters are laid out as `<raster_root>/<year>/<area>_<year>.tif`.
//! The set of areas is whatever exists for the first year of the run.

use crate::engine::{RasterRef, Workspace};
use crate::error::{CsbError, Result};
use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// One independently processed geographic unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Area code, e.g. `AL1`
    pub area: String,

    pub start_year: i32,

    pub end_year: i32,

    /// One raster per year, in year order
    pub year_rasters: Vec<RasterRef>,
}

impl Partition {
    /// Resolve the rasters for every year in `[start_year, end_year]`.
    ///
    /// Fails on the first missing year: a partition never spans a partial range.
    pub fn resolve(
        area: &str,
        start_year: i32,
        end_year: i32,
        raster_root: &Path,
        extension: &str,
    ) -> Result<Self> {
        let mut year_rasters = Vec::new();
        for year in start_year..=end_year {
            match find_year_raster(raster_root, area, year, extension) {
                Some(path) => year_rasters.push(RasterRef::new(path)),
                None => {
                    return Err(CsbError::MissingYearRaster {
                        area: area.to_string(),
                        year,
                        path: expected_path(raster_root, area, year, extension),
                    })
                }
            }
        }

        Ok(Self {
            area: area.to_string(),
            start_year,
            end_year,
            year_rasters,
        })
    }

    pub fn years(&self) -> RangeInclusive<i32> {
        self.start_year..=self.end_year
    }

    /// `<area>_<start>-<end>`, the stem of every dataset this partition creates.
    pub fn label(&self) -> String {
        format!("{}_{}-{}", self.area, self.start_year, self.end_year)
    }

    /// Per-year field names produced by combining the rasters.
    ///
    /// The engine truncates raster names to five characters when it turns
    /// them into fields.
    pub fn year_fields(&self) -> Vec<String> {
        let prefix: String = self.area.chars().take(5).collect();
        self.years().map(|year| format!("{}_{}", prefix, year)).collect()
    }
}

/// On-disk locations of everything a partition produces under the creation directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceLayout {
    root: PathBuf,
    label: String,
    area: String,
}

impl WorkspaceLayout {
    pub fn new(creation_dir: &Path, partition: &Partition) -> Self {
        Self {
            root: creation_dir.to_path_buf(),
            label: partition.label(),
            area: partition.area.clone(),
        }
    }

    /// Raster folders that must exist before the engine writes into them.
    pub fn raster_dirs(&self) -> [PathBuf; 2] {
        [self.root.join("CombineALL"), self.root.join("Combine")]
    }

    pub fn combined_raster(&self) -> RasterRef {
        RasterRef::new(self.root.join("CombineALL").join(format!("{}.tif", self.label)))
    }

    pub fn masked_raster(&self) -> RasterRef {
        RasterRef::new(self.root.join("Combine").join(format!("{}_NULL.tif", self.label)))
    }

    /// Polygons straight out of vectorization.
    pub fn vectorized(&self) -> Workspace {
        self.workspace("Vectors_LL", "")
    }

    /// Reprojected polygons, the input of elimination.
    pub fn projected(&self) -> Workspace {
        self.workspace("Vectors_In", "_In")
    }

    /// Every intermediate elimination output.
    pub fn scratch(&self) -> Workspace {
        self.workspace("Vectors_temp", "_temp")
    }

    pub fn output(&self) -> Workspace {
        self.workspace("Vectors_Out", "_OUT")
    }

    pub fn workspaces(&self) -> [Workspace; 4] {
        [self.vectorized(), self.projected(), self.scratch(), self.output()]
    }

    /// Name of the polygon feature class in `vectorized` and `projected`.
    pub fn polygon_name(&self) -> String {
        format!("{}_In", self.area)
    }

    fn workspace(&self, container: &str, suffix: &str) -> Workspace {
        Workspace::new(self.root.join(container).join(format!("{}{}.gdb", self.label, suffix)))
    }
}

fn expected_path(raster_root: &Path, area: &str, year: i32, extension: &str) -> PathBuf {
    raster_root
        .join(year.to_string())
        .join(format!("{}_{}.{}", area, year, extension))
}

/// Find `<root>/<year>/<area>_<year>.<ext>`, matching the extension case-insensitively.
pub fn find_year_raster(raster_root: &Path, area: &str, year: i32, extension: &str) -> Option<PathBuf> {
    let dir = raster_root.join(year.to_string());
    let stem = format!("{}_{}", area, year);

    std::fs::read_dir(&dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .find(|path| {
            path.is_file()
                && path.file_stem().and_then(|s| s.to_str()) == Some(stem.as_str())
                && has_extension(path, extension)
        })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Sort key for area codes: the first alphabetic run and the number after it.
///
/// `AL2` sorts before `AL10`. Names without such a pair are rejected.
pub fn area_sort_key(name: &str) -> Result<(String, u64)> {
    let invalid = || CsbError::InvalidAreaName(name.to_string());

    let start = name
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .ok_or_else(invalid)?;
    let rest = &name[start..];
    let text_len = rest
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i)
        .ok_or_else(invalid)?;
    let (text, tail) = rest.split_at(text_len);
    let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
    let number = digits.parse::<u64>().map_err(|_| invalid())?;

    Ok((text.to_string(), number))
}

/// Discover the areas to process from the rasters of `start_year`.
///
/// Returns area codes sorted by [`area_sort_key`] with duplicates removed.
pub fn discover_areas(raster_root: &Path, start_year: i32, extension: &str) -> Result<Vec<String>> {
    let dir = raster_root.join(start_year.to_string());
    if !dir.is_dir() {
        return Err(CsbError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("raster directory not found: {}", dir.display()),
        )));
    }

    let suffix = format!("_{}", start_year);
    let mut keyed = Vec::new();
    for entry in std::fs::read_dir(&dir)? {
        let path = entry?.path();
        if !path.is_file() || !has_extension(&path, extension) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let area = stem.split_once(&suffix).map_or(stem, |(area, _)| area);
        keyed.push((area_sort_key(area)?, area.to_string()));
    }

    keyed.sort();
    let mut areas: Vec<String> = keyed.into_iter().map(|(_, area)| area).collect();
    areas.dedup();
    Ok(areas)
}

/// Restrict the discovered areas to a single requested one.
pub fn select_area(areas: Vec<String>, requested: Option<&str>) -> anyhow::Result<Vec<String>> {
    match requested {
        None => Ok(areas),
        Some(area) if areas.iter().any(|a| a == area) => Ok(vec![area.to_string()]),
        Some(area) => anyhow::bail!("Invalid partial area: {} (not among {} discovered areas)", area, areas.len()),
    }
}
