//! Well-Known-Text `POINT` parsing.

use regex::Regex;
use std::sync::LazyLock;

use super::ParseMiss;
use crate::models::GeoPoint;

const NUM: &str = r"([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)";

/// Tried in order: `POINT(x y)`, `POINT(x, y)`, `SRID=n;POINT(x y)`.
static POINT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^\s*POINT\s*\(\s*{num}\s+{num}\s*\)\s*$",
        r"(?i)^\s*POINT\s*\(\s*{num}\s*,\s*{num}\s*\)\s*$",
        r"(?i)^\s*SRID=\d+\s*;\s*POINT\s*\(\s*{num}\s+{num}\s*\)\s*$",
    ]
    .iter()
    .map(|p| Regex::new(&p.replace("{num}", NUM)).expect("WKT point pattern compiles"))
    .collect()
});

pub(crate) fn point_from_wkt(s: &str) -> Result<GeoPoint, ParseMiss> {
    let caps = POINT_PATTERNS
        .iter()
        .find_map(|re| re.captures(s))
        .ok_or(ParseMiss::NoWktMatch)?;

    let lon: f64 = caps[1].parse().map_err(|_| ParseMiss::NonNumericCoordinates)?;
    let lat: f64 = caps[2].parse().map_err(|_| ParseMiss::NonNumericCoordinates)?;

    GeoPoint::checked(lon, lat).ok_or(ParseMiss::OutOfRange)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_separated() {
        let p = point_from_wkt("POINT(-79.347 43.746)").unwrap();
        assert_eq!(p, GeoPoint::new(-79.347, 43.746));
    }

    #[test]
    fn test_comma_separated_and_lowercase() {
        let p = point_from_wkt("point ( -79.347 , 43.746 )").unwrap();
        assert_eq!(p, GeoPoint::new(-79.347, 43.746));
    }

    #[test]
    fn test_srid_prefixed() {
        let p = point_from_wkt("SRID=4326;POINT(-79.347 43.746)").unwrap();
        assert_eq!(p, GeoPoint::new(-79.347, 43.746));
    }

    #[test]
    fn test_rejects_other_geometries() {
        assert_eq!(
            point_from_wkt("LINESTRING(0 0, 1 1)"),
            Err(ParseMiss::NoWktMatch)
        );
        assert_eq!(point_from_wkt("POINT(1)"), Err(ParseMiss::NoWktMatch));
    }

    #[test]
    fn test_out_of_range() {
        assert_eq!(point_from_wkt("POINT(200 43)"), Err(ParseMiss::OutOfRange));
    }
}
