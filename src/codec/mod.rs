//! Geometry decoding.
//!
//! Location values have been stored as GeoJSON objects, JSON strings, WKT
//! and EWKB hex over the system's history. Every raw value is classified into
//! a [`RawGeometry`] variant and handed to exactly one parser; the first
//! variant that yields a valid point wins.

mod ewkb;
mod geojson;
mod shape;
mod wkt;

use serde_json::{Map, Value};
use tracing::trace;

use crate::models::{GeoPoint, LocationRecord};

pub use shape::{bbox_centroid, decode_footprint, outer_ring, ring_centroid};

/// Which column of a [`LocationRecord`] a candidate came from, in priority
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LocationField {
    Preferred,
    Current,
    Legacy,
    CoordinatePair,
}

/// A raw location value after format sniffing.
#[derive(Debug, Clone, PartialEq)]
pub enum RawGeometry<'a> {
    GeoJsonObject(&'a Map<String, Value>),
    GeoJsonString(&'a str),
    WkbHex(&'a str),
    WktString(&'a str),
    CoordinatePair { lon: f64, lat: f64 },
}

/// Why a candidate did not produce a point. Never surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMiss {
    MalformedJson,
    NotAnObject,
    MissingCoordinates,
    NonNumericCoordinates,
    NoWktMatch,
    InvalidHex,
    Truncated,
    OutOfRange,
}

impl RawGeometry<'_> {
    pub fn parse(&self) -> Result<GeoPoint, ParseMiss> {
        match self {
            RawGeometry::GeoJsonObject(obj) => geojson::point_from_object(obj),
            RawGeometry::GeoJsonString(s) => geojson::point_from_str(s),
            RawGeometry::WkbHex(s) => ewkb::point_from_ewkb_hex(s),
            RawGeometry::WktString(s) => wkt::point_from_wkt(s),
            RawGeometry::CoordinatePair { lon, lat } => {
                GeoPoint::checked(*lon, *lat).ok_or(ParseMiss::OutOfRange)
            }
        }
    }
}

/// Classify one column value into the parse attempts it supports, in
/// fallback order.
pub fn classify_value(field: LocationField, value: &Value) -> Vec<RawGeometry<'_>> {
    match value {
        Value::Object(obj) => vec![RawGeometry::GeoJsonObject(obj)],
        Value::String(s) => match field {
            LocationField::Preferred => vec![RawGeometry::GeoJsonString(s)],
            LocationField::Legacy if ewkb::looks_like_ewkb(s) => vec![
                RawGeometry::WkbHex(s),
                RawGeometry::GeoJsonString(s),
                RawGeometry::WktString(s),
            ],
            LocationField::Current | LocationField::Legacy => {
                vec![RawGeometry::GeoJsonString(s), RawGeometry::WktString(s)]
            }
            LocationField::CoordinatePair => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// All parse attempts for a record, in priority order.
pub fn classify(record: &LocationRecord) -> Vec<(LocationField, RawGeometry<'_>)> {
    let mut candidates = Vec::new();

    let columns = [
        (LocationField::Preferred, record.geom_json.as_ref()),
        (LocationField::Current, record.geom.as_ref()),
        (LocationField::Legacy, record.legacy_geom.as_ref()),
    ];
    for (field, value) in columns {
        if let Some(value) = value {
            candidates.extend(
                classify_value(field, value)
                    .into_iter()
                    .map(|raw| (field, raw)),
            );
        }
    }

    if let (Some(lon), Some(lat)) = (record.lon, record.lat) {
        candidates.push((
            LocationField::CoordinatePair,
            RawGeometry::CoordinatePair { lon, lat },
        ));
    }

    candidates
}

/// Decode a record's location into a canonical point.
///
/// Returns the first candidate that parses to a finite, in-range point.
/// Missing fields and unparseable values are both `None`.
pub fn decode_point(record: &LocationRecord) -> Option<GeoPoint> {
    for (field, raw) in classify(record) {
        match raw.parse() {
            Ok(point) => {
                trace!(?field, ?point, "decoded location");
                return Some(point);
            }
            Err(miss) => trace!(?field, ?miss, "location candidate rejected"),
        }
    }
    None
}
