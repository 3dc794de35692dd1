//! Building-address association engine.

mod service;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BuildingAddressLink, MatchType};

pub use service::BuildingAddressLinker;

/// Input to [`BuildingAddressLinker::link_address`].
///
/// `distance_meters`, `match_type` and `confidence` come from the spatial
/// matcher or the manual-link action that produced the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkRequest {
    pub campaign_id: Uuid,
    pub address_id: Option<Uuid>,
    pub building_id: String,
    pub match_type: MatchType,
    pub confidence: f64,
    pub distance_meters: f64,
    /// Replace a high-confidence link to another building
    #[serde(default)]
    pub confirm_override: bool,
}

impl LinkRequest {
    /// A user-initiated link at full confidence.
    pub fn manual(campaign_id: Uuid, address_id: Uuid, building_id: impl Into<String>) -> Self {
        Self {
            campaign_id,
            address_id: Some(address_id),
            building_id: building_id.into(),
            match_type: MatchType::Manual,
            confidence: 1.0,
            distance_meters: 0.0,
            confirm_override: false,
        }
    }

    pub fn confirmed(mut self) -> Self {
        self.confirm_override = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked {
        link: BuildingAddressLink,
    },
    /// The address is already linked to another building with high
    /// confidence; resend with `confirm_override` to replace it.
    ConflictWarning {
        existing_building_id: String,
        existing_confidence: f64,
    },
}
