//! In-process store.

use hashbrown::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{CampaignStore, FeatureStore, LinkStore, WriteCondition};
use crate::error::StoreError;
use crate::models::{AddressRecord, Building, BuildingAddressLink, CampaignRecord};

#[derive(Default)]
struct Tables {
    links: HashMap<(Uuid, Uuid), BuildingAddressLink>,
    addresses: HashMap<(Uuid, Uuid), AddressRecord>,
    buildings: HashMap<String, Building>,
    campaigns: HashMap<Uuid, CampaignRecord>,
}

/// Store backed by hash maps behind a single mutex.
///
/// Conditional link writes are evaluated under the lock, so they behave like
/// the backend's compare-and-set.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_address(&self, address: AddressRecord) {
        let mut tables = self.tables.lock().await;
        tables
            .addresses
            .insert((address.campaign_id, address.id), address);
    }

    pub async fn insert_building(&self, building: Building) {
        let mut tables = self.tables.lock().await;
        tables.buildings.insert(building.id.clone(), building);
    }

    pub async fn insert_campaign(&self, campaign: CampaignRecord) {
        let mut tables = self.tables.lock().await;
        tables.campaigns.insert(campaign.id, campaign);
    }

    /// Number of stored links for a campaign
    pub async fn link_count(&self, campaign_id: Uuid) -> usize {
        let tables = self.tables.lock().await;
        tables
            .links
            .keys()
            .filter(|(c, _)| *c == campaign_id)
            .count()
    }
}

impl LinkStore for MemoryStore {
    async fn get_link(
        &self,
        campaign_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<BuildingAddressLink>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.links.get(&(campaign_id, address_id)).cloned())
    }

    async fn put_link(
        &self,
        link: &BuildingAddressLink,
        condition: WriteCondition,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let key = (link.campaign_id, link.address_id);
        if !condition.holds_for(tables.links.get(&key)) {
            return Ok(false);
        }
        tables.links.insert(key, link.clone());
        Ok(true)
    }

    async fn delete_link(
        &self,
        campaign_id: Uuid,
        building_id: &str,
        address_id: Uuid,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let key = (campaign_id, address_id);
        match tables.links.get(&key) {
            Some(link) if link.building_id == building_id => {
                tables.links.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn links_for_building(
        &self,
        campaign_id: Uuid,
        building_id: &str,
    ) -> Result<Vec<BuildingAddressLink>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .links
            .values()
            .filter(|l| l.campaign_id == campaign_id && l.building_id == building_id)
            .cloned()
            .collect())
    }
}

impl FeatureStore for MemoryStore {
    async fn get_building(&self, building_id: &str) -> Result<Option<Building>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.buildings.get(building_id).cloned())
    }

    async fn get_addresses(
        &self,
        campaign_id: Uuid,
        address_ids: &[Uuid],
    ) -> Result<Vec<AddressRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(address_ids
            .iter()
            .filter_map(|id| tables.addresses.get(&(campaign_id, *id)).cloned())
            .collect())
    }
}

impl CampaignStore for MemoryStore {
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<CampaignRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.campaigns.get(&campaign_id).cloned())
    }

    async fn set_campaign_region(&self, campaign_id: Uuid, region: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.campaigns.get_mut(&campaign_id) {
            Some(campaign) => {
                campaign.region = Some(region.to_string());
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "campaign {} does not exist",
                campaign_id
            ))),
        }
    }
}
