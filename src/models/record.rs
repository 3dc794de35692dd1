//! Address, building and campaign records as read from storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::geo::{GeoBbox, GeoPoint};

/// Location columns of an address row.
///
/// The same logical point has been stored several ways over time, so every
/// field is kept raw and sniffed per record by [`crate::codec::decode_point`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationRecord {
    /// Preferred GeoJSON column (object or JSON string)
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "geom_geojson")]
    pub geom_json: Option<Value>,

    /// Current column: GeoJSON, or WKT when written by older importers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom: Option<Value>,

    /// Legacy column: EWKB hex from the spatial database, GeoJSON or WKT
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "geometry")]
    pub legacy_geom: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "lng")]
    pub lon: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
}

/// A campaign address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub formatted: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(flatten)]
    pub location: LocationRecord,
}

/// A building footprint, keyed by its GERS id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Building {
    pub id: String,
    /// GeoJSON Polygon or MultiPolygon
    pub geometry: Value,
    pub centroid: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
}

/// Region-related columns of a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecord {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<GeoBbox>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub territory_boundary: Option<Value>,
}
