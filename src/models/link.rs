//! Building-address association types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::geo::GeoPoint;

/// How a link was produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchType {
    /// Set by a user in the editor
    Manual,
    /// Produced by a spatial matcher, e.g. "containment" or "nearest"
    Automated(String),
}

impl MatchType {
    pub fn as_str(&self) -> &str {
        match self {
            MatchType::Manual => "manual",
            MatchType::Automated(method) => method,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, MatchType::Manual)
    }
}

impl From<String> for MatchType {
    fn from(s: String) -> Self {
        if s.eq_ignore_ascii_case("manual") {
            MatchType::Manual
        } else {
            MatchType::Automated(s)
        }
    }
}

impl From<&str> for MatchType {
    fn from(s: &str) -> Self {
        MatchType::from(s.to_string())
    }
}

impl From<MatchType> for String {
    fn from(m: MatchType) -> Self {
        m.as_str().to_string()
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored association between one address and one building.
///
/// At most one row exists per `(campaign_id, address_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingAddressLink {
    pub campaign_id: Uuid,
    pub address_id: Uuid,
    pub building_id: String,
    pub match_type: MatchType,
    pub confidence: f64,
    pub distance_meters: f64,
    pub modified_at: DateTime<Utc>,
}

/// A link joined with its address, as returned by building listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedAddress {
    pub address_id: Uuid,
    pub formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub house_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub street_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub point: Option<GeoPoint>,
    pub match_type: MatchType,
    pub confidence: f64,
    pub distance_meters: f64,
    /// Derived from the configured threshold at query time, never stored
    pub is_outside_footprint: bool,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSummary {
    pub total: usize,
    pub inside: usize,
    pub outside: usize,
}

/// Addresses linked to one building, highest confidence first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildingAddresses {
    pub building_id: String,
    pub addresses: Vec<LinkedAddress>,
    pub summary: LinkSummary,
}
