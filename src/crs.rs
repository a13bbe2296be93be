//! Coordinate Reference System definitions.
//!
//! ## CRS used in this pipeline:
//!
//! - **Output CRS (USGS Albers Equal Area Conic)**: vector polygons are
//!   projected into this CRS right after vectorization.
//!
//! - **Elimination CRS (Albers Conic Equal Area)**: the same projection as
//!   spelled by the engine's elimination tooling. Thresholds are square
//!   metres in this CRS, so it must be equal-area.
//!
//! Definitions are passed to the engine verbatim as WKT strings or
//! `EPSG:<code>` identifiers.

/// Well-known CRS definitions used throughout the pipeline.
pub mod codes {
    /// USA Contiguous Albers Equal Area Conic (USGS version), metres.
    pub const ALBERS_USGS: &str = concat!(
        r#"PROJCS["USA_Contiguous_Albers_Equal_Area_Conic_USGS_version","#,
        r#"GEOGCS["GCS_North_American_1983","#,
        r#"DATUM["D_North_American_1983","#,
        r#"SPHEROID["GRS_1980",6378137.0,298.257222101]],"#,
        r#"PRIMEM["Greenwich",0.0],"#,
        r#"UNIT["Degree",0.0174532925199433]],"#,
        r#"PROJECTION["Albers"],"#,
        r#"PARAMETER["False_Easting",0.0],"#,
        r#"PARAMETER["False_Northing",0.0],"#,
        r#"PARAMETER["Central_Meridian",-96.0],"#,
        r#"PARAMETER["Standard_Parallel_1",29.5],"#,
        r#"PARAMETER["Standard_Parallel_2",45.5],"#,
        r#"PARAMETER["Latitude_Of_Origin",23.0],"#,
        r#"UNIT["Meter",1.0]]"#,
    );

    /// Albers Conic Equal Area as used for elimination, metres.
    pub const ALBERS_ELIMINATION: &str = concat!(
        r#"PROJCS["Albers_Conic_Equal_Area","#,
        r#"GEOGCS["GCS_North_American_1983","#,
        r#"DATUM["D_North_American_1983","#,
        r#"SPHEROID["GRS_1980",6378137.0,298.257222101]],"#,
        r#"PRIMEM["Greenwich",0.0],"#,
        r#"UNIT["Degree",0.0174532925199433]],"#,
        r#"PROJECTION["Albers"],"#,
        r#"PARAMETER["false_easting",0.0],"#,
        r#"PARAMETER["false_northing",0.0],"#,
        r#"PARAMETER["central_meridian",-96.0],"#,
        r#"PARAMETER["standard_parallel_1",29.5],"#,
        r#"PARAMETER["standard_parallel_2",45.5],"#,
        r#"PARAMETER["latitude_of_origin",23.0],"#,
        r#"UNIT["Meter",1.0]]"#,
    );
}

/// Short display name for a CRS definition.
///
/// Returns the `PROJCS`/`GEOGCS` name for WKT, or the definition itself
/// for authority codes such as `EPSG:5070`.
pub fn display_name(crs: &str) -> &str {
    let crs = crs.trim();
    for prefix in ["PROJCS[\"", "GEOGCS[\""] {
        if let Some(rest) = crs.strip_prefix(prefix) {
            if let Some(end) = rest.find('"') {
                return &rest[..end];
            }
        }
    }
    crs
}

/// Whether a definition describes a projected (planar) CRS.
///
/// Area thresholds are meaningless in geographic degrees, so both the
/// output and the elimination CRS must pass this check.
pub fn is_projected(crs: &str) -> bool {
    let crs = crs.trim();
    if crs.starts_with("PROJCS[") {
        return true;
    }
    match crs.split_once(':') {
        // EPSG:4326 and friends are geographic; everything else we accept.
        Some((authority, code)) => {
            !authority.is_empty()
                && !code.is_empty()
                && code.chars().all(|c| c.is_ascii_digit())
                && !matches!(code, "4326" | "4269" | "4258")
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_wkt() {
        assert_eq!(
            display_name(codes::ALBERS_USGS),
            "USA_Contiguous_Albers_Equal_Area_Conic_USGS_version"
        );
        assert_eq!(display_name(codes::ALBERS_ELIMINATION), "Albers_Conic_Equal_Area");
    }

    #[test]
    fn test_display_name_code() {
        assert_eq!(display_name("EPSG:5070"), "EPSG:5070");
    }

    #[test]
    fn test_is_projected() {
        assert!(is_projected(codes::ALBERS_USGS));
        assert!(is_projected("EPSG:5070"));
        assert!(!is_projected("EPSG:4326"));
        assert!(!is_projected("GEOGCS[\"WGS 84\"]"));
        assert!(!is_projected("albers"));
    }
}
