//! Polygon helpers: ring validation, bbox-midpoint centroids and footprint
//! validation.
//!
//! "Centroid" here is always the midpoint of a bounding box, not an
//! area-weighted centroid.

use geo::{BoundingRect, Coord, LineString, MultiPolygon, Polygon};
use serde_json::Value;

use crate::models::{GeoBbox, GeoPoint};

fn position(value: &Value) -> Option<Coord<f64>> {
    let pair = value.as_array()?;
    if pair.len() < 2 {
        return None;
    }
    let point = GeoPoint::checked(pair[0].as_f64()?, pair[1].as_f64()?)?;
    Some(Coord {
        x: point.lon,
        y: point.lat,
    })
}

fn positions(value: &Value) -> Option<Vec<Coord<f64>>> {
    value.as_array()?.iter().map(position).collect()
}

fn is_position(value: &Value) -> bool {
    value
        .as_array()
        .and_then(|a| a.first())
        .map(Value::is_number)
        .unwrap_or(false)
}

/// Accept GeoJSON passed either as a value or as a JSON-encoded string.
fn with_parsed<T>(geometry: &Value, f: impl Fn(&Value) -> Option<T>) -> Option<T> {
    match geometry {
        Value::String(s) => serde_json::from_str::<Value>(s).ok().and_then(|v| f(&v)),
        other => f(other),
    }
}

/// Outer ring of a polygon-like GeoJSON value.
///
/// Accepts `Polygon`, `MultiPolygon` (first polygon), a `Feature` wrapping
/// either, a bare coordinates array, or a JSON string of any of these. The
/// ring must hold at least 3 valid `[lng, lat]` pairs.
pub fn outer_ring(geometry: &Value) -> Option<LineString<f64>> {
    with_parsed(geometry, outer_ring_of)
}

fn outer_ring_of(value: &Value) -> Option<LineString<f64>> {
    let ring = match value {
        Value::Array(items) => {
            // Either a bare ring or polygon coordinates (list of rings)
            if items.first().map(is_position).unwrap_or(false) {
                value
            } else {
                items.first()?
            }
        }
        Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
            Some("Feature") => return outer_ring_of(obj.get("geometry")?),
            Some("MultiPolygon") => obj.get("coordinates")?.get(0)?.get(0)?,
            _ => obj.get("coordinates")?.get(0)?,
        },
        _ => return None,
    };

    let coords = positions(ring)?;
    if coords.len() < 3 {
        return None;
    }
    Some(LineString::new(coords))
}

/// Bounding-box midpoint of the polygon's outer ring.
pub fn ring_centroid(geometry: &Value) -> Option<GeoPoint> {
    let ring = outer_ring(geometry)?;
    let rect = ring.bounding_rect()?;
    let center = rect.center();
    GeoPoint::checked(center.x, center.y)
}

/// Midpoint of a `[west, south, east, north]` box.
pub fn bbox_centroid(bbox: &GeoBbox) -> Option<GeoPoint> {
    let sw = GeoPoint::checked(bbox.west, bbox.south)?;
    let ne = GeoPoint::checked(bbox.east, bbox.north)?;
    if sw.lon > ne.lon || sw.lat > ne.lat {
        return None;
    }
    GeoPoint::checked((sw.lon + ne.lon) / 2.0, (sw.lat + ne.lat) / 2.0)
}

fn closed_ring(value: &Value) -> Option<LineString<f64>> {
    let mut ring = positions(value)?;
    if ring.len() < 3 {
        return None;
    }

    // Close the ring if needed
    if ring.first() != ring.last() {
        ring.push(ring[0]);
    }

    if ring.len() < 4 {
        return None;
    }

    Some(LineString::new(ring))
}

fn polygon(rings: &Value) -> Option<Polygon<f64>> {
    let mut rings = rings
        .as_array()?
        .iter()
        .map(closed_ring)
        .collect::<Option<Vec<_>>>()?
        .into_iter();
    let exterior = rings.next()?;
    Some(Polygon::new(exterior, rings.collect()))
}

/// Validate a building footprint (`Polygon` or `MultiPolygon`, optionally
/// wrapped in a `Feature` or encoded as a string).
pub fn decode_footprint(geometry: &Value) -> Option<MultiPolygon<f64>> {
    with_parsed(geometry, footprint_of)
}

fn footprint_of(value: &Value) -> Option<MultiPolygon<f64>> {
    let obj = value.as_object()?;
    let coordinates = obj.get("coordinates");
    match obj.get("type").and_then(Value::as_str)? {
        "Feature" => footprint_of(obj.get("geometry")?),
        "Polygon" => Some(MultiPolygon::new(vec![polygon(coordinates?)?])),
        "MultiPolygon" => {
            let polygons = coordinates?
                .as_array()?
                .iter()
                .map(polygon)
                .collect::<Option<Vec<_>>>()?;
            if polygons.is_empty() {
                return None;
            }
            Some(MultiPolygon::new(polygons))
        }
        _ => None,
    }
}
