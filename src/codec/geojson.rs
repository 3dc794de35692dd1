//! GeoJSON-shaped point parsing.

use serde_json::{Map, Value};

use super::ParseMiss;
use crate::models::GeoPoint;

/// Extract a point from an object exposing `coordinates`, either at the top
/// level (`{"type": "Point", "coordinates": [lng, lat]}`) or one level down
/// under `geometry` (a Feature).
pub(crate) fn point_from_object(obj: &Map<String, Value>) -> Result<GeoPoint, ParseMiss> {
    let coordinates = obj
        .get("coordinates")
        .or_else(|| obj.get("geometry").and_then(|g| g.get("coordinates")))
        .ok_or(ParseMiss::MissingCoordinates)?;

    let pair = coordinates
        .as_array()
        .ok_or(ParseMiss::NonNumericCoordinates)?;
    if pair.len() < 2 {
        return Err(ParseMiss::MissingCoordinates);
    }

    let lon = pair[0].as_f64().ok_or(ParseMiss::NonNumericCoordinates)?;
    let lat = pair[1].as_f64().ok_or(ParseMiss::NonNumericCoordinates)?;

    GeoPoint::checked(lon, lat).ok_or(ParseMiss::OutOfRange)
}

/// Parse a JSON-encoded GeoJSON object.
pub(crate) fn point_from_str(s: &str) -> Result<GeoPoint, ParseMiss> {
    let value: Value = serde_json::from_str(s.trim()).map_err(|_| ParseMiss::MalformedJson)?;
    match value {
        Value::Object(obj) => point_from_object(&obj),
        _ => Err(ParseMiss::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_point_object() {
        let v = json!({"type": "Point", "coordinates": [-79.347, 43.746]});
        let p = point_from_object(v.as_object().unwrap()).unwrap();
        assert_eq!(p, GeoPoint::new(-79.347, 43.746));
    }

    #[test]
    fn test_nested_geometry() {
        let v = json!({"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.5, 2.5, 100.0]}});
        let p = point_from_object(v.as_object().unwrap()).unwrap();
        assert_eq!(p, GeoPoint::new(1.5, 2.5));
    }

    #[test]
    fn test_polygon_coordinates_are_not_a_point() {
        let v = json!({"type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]]});
        assert_eq!(
            point_from_object(v.as_object().unwrap()),
            Err(ParseMiss::NonNumericCoordinates)
        );
    }

    #[test]
    fn test_short_coordinates() {
        let v = json!({"coordinates": [1.0]});
        assert_eq!(
            point_from_object(v.as_object().unwrap()),
            Err(ParseMiss::MissingCoordinates)
        );
    }

    #[test]
    fn test_malformed_string() {
        assert_eq!(point_from_str("{not json"), Err(ParseMiss::MalformedJson));
        assert_eq!(point_from_str("[1, 2]"), Err(ParseMiss::NotAnObject));
    }
}
