//! Storage seams for addresses, buildings, campaigns and links.
//!
//! [`crate::scylla::ScyllaStore`] is the production backend and
//! [`MemoryStore`] backs tests and embedded callers.

mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{AddressRecord, Building, BuildingAddressLink, CampaignRecord};

pub use memory::MemoryStore;

/// Guard applied to a link upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Apply only if no link exists for `(campaign_id, address_id)`
    Absent,
    /// Apply only if the stored link still carries this `modified_at`
    Unchanged { modified_at: DateTime<Utc> },
}

impl WriteCondition {
    /// The condition matching a previously read row.
    pub fn observed(existing: Option<&BuildingAddressLink>) -> Self {
        match existing {
            Some(link) => WriteCondition::Unchanged {
                modified_at: link.modified_at,
            },
            None => WriteCondition::Absent,
        }
    }

    pub fn holds_for(&self, stored: Option<&BuildingAddressLink>) -> bool {
        match (self, stored) {
            (WriteCondition::Absent, stored) => stored.is_none(),
            (WriteCondition::Unchanged { modified_at }, Some(link)) => {
                link.modified_at == *modified_at
            }
            (WriteCondition::Unchanged { .. }, None) => false,
        }
    }
}

/// Link table keyed by `(campaign_id, address_id)`.
pub trait LinkStore: Send + Sync {
    fn get_link(
        &self,
        campaign_id: Uuid,
        address_id: Uuid,
    ) -> impl Future<Output = Result<Option<BuildingAddressLink>, StoreError>> + Send;

    /// Upsert a link. Returns `false` when `condition` did not hold and
    /// nothing was written.
    fn put_link(
        &self,
        link: &BuildingAddressLink,
        condition: WriteCondition,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// Hard-delete the link if it points at `building_id`. Returns whether a
    /// row was removed.
    fn delete_link(
        &self,
        campaign_id: Uuid,
        building_id: &str,
        address_id: Uuid,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn links_for_building(
        &self,
        campaign_id: Uuid,
        building_id: &str,
    ) -> impl Future<Output = Result<Vec<BuildingAddressLink>, StoreError>> + Send;
}

/// Read-only access to address and building records.
pub trait FeatureStore: Send + Sync {
    fn get_building(
        &self,
        building_id: &str,
    ) -> impl Future<Output = Result<Option<Building>, StoreError>> + Send;

    /// Fetch the given addresses of a campaign. Unknown ids are skipped.
    fn get_addresses(
        &self,
        campaign_id: Uuid,
        address_ids: &[Uuid],
    ) -> impl Future<Output = Result<Vec<AddressRecord>, StoreError>> + Send;
}

pub trait CampaignStore: Send + Sync {
    fn get_campaign(
        &self,
        campaign_id: Uuid,
    ) -> impl Future<Output = Result<Option<CampaignRecord>, StoreError>> + Send;

    fn set_campaign_region(
        &self,
        campaign_id: Uuid,
        region: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
