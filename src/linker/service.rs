use chrono::{DateTime, Duration, Utc};
use hashbrown::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use super::{LinkOutcome, LinkRequest};
use crate::codec::{decode_footprint, decode_point};
use crate::config::LinkerConfig;
use crate::error::LinkError;
use crate::models::{
    AddressRecord, BuildingAddressLink, BuildingAddresses, LinkSummary, LinkedAddress,
};
use crate::store::{FeatureStore, LinkStore, WriteCondition};

/// Re-reads allowed when a concurrent writer changes the row between the
/// conflict check and the write
const MAX_WRITE_ATTEMPTS: usize = 3;

pub struct BuildingAddressLinker<S> {
    store: S,
    config: LinkerConfig,
}

fn validate(request: &LinkRequest) -> Result<Uuid, LinkError> {
    let address_id = request.address_id.ok_or_else(|| {
        LinkError::InvalidInput(format!(
            "address_id is required for {} links",
            request.match_type
        ))
    })?;

    if request.building_id.trim().is_empty() {
        return Err(LinkError::InvalidInput("building_id is empty".to_string()));
    }
    if !request.confidence.is_finite() || !(0.0..=1.0).contains(&request.confidence) {
        return Err(LinkError::InvalidInput(format!(
            "confidence {} is outside [0, 1]",
            request.confidence
        )));
    }
    if !request.distance_meters.is_finite() || request.distance_meters < 0.0 {
        return Err(LinkError::InvalidInput(format!(
            "distance_meters {} must be a non-negative number",
            request.distance_meters
        )));
    }

    Ok(address_id)
}

/// Millisecond-precision timestamp strictly after the previous write.
fn next_modified_at(previous: Option<&BuildingAddressLink>) -> DateTime<Utc> {
    let now = Utc::now();
    let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
    match previous {
        Some(prev) if prev.modified_at >= now => prev.modified_at + Duration::milliseconds(1),
        _ => now,
    }
}

impl<S: LinkStore + FeatureStore> BuildingAddressLinker<S> {
    pub fn new(store: S, config: LinkerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LinkerConfig {
        &self.config
    }

    /// Derived at query time so threshold changes reclassify existing links.
    pub fn is_outside_footprint(&self, distance_meters: f64) -> bool {
        distance_meters > self.config.outside_footprint_threshold_m
    }

    /// Create or replace the link for `(campaign_id, address_id)`.
    pub async fn link_address(&self, request: LinkRequest) -> Result<LinkOutcome, LinkError> {
        let address_id = validate(&request)?;

        let building = self
            .store
            .get_building(&request.building_id)
            .await?
            .ok_or_else(|| LinkError::BuildingNotFound(request.building_id.clone()))?;
        if decode_footprint(&building.geometry).is_none() {
            return Err(LinkError::InvalidFootprint(building.id));
        }

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let existing = self.store.get_link(request.campaign_id, address_id).await?;

            if let Some(existing) = &existing {
                if existing.building_id != request.building_id
                    && existing.confidence >= self.config.high_confidence
                    && !request.confirm_override
                {
                    debug!(
                        "Address {} already linked to {} at {:.2}, not replacing with {}",
                        address_id, existing.building_id, existing.confidence, request.building_id
                    );
                    return Ok(LinkOutcome::ConflictWarning {
                        existing_building_id: existing.building_id.clone(),
                        existing_confidence: existing.confidence,
                    });
                }
            }

            let link = BuildingAddressLink {
                campaign_id: request.campaign_id,
                address_id,
                building_id: request.building_id.clone(),
                match_type: request.match_type.clone(),
                confidence: request.confidence,
                distance_meters: request.distance_meters,
                modified_at: next_modified_at(existing.as_ref()),
            };

            // Confirmed overrides skip the conflict check, not the guard
            let condition = WriteCondition::observed(existing.as_ref());

            if self.store.put_link(&link, condition).await? {
                info!(
                    "Linked address {} to building {} ({}, confidence {:.2}, {:.1} m)",
                    address_id, link.building_id, link.match_type, link.confidence, link.distance_meters
                );
                return Ok(LinkOutcome::Linked { link });
            }

            debug!(
                "Link for address {} changed concurrently (attempt {}/{})",
                address_id, attempt, MAX_WRITE_ATTEMPTS
            );
        }

        Err(LinkError::Contended {
            address_id,
            attempts: MAX_WRITE_ATTEMPTS,
        })
    }

    /// Addresses linked to a building, highest confidence first, with
    /// inside/outside counts.
    pub async fn list_building_addresses(
        &self,
        campaign_id: Uuid,
        building_id: &str,
    ) -> Result<BuildingAddresses, LinkError> {
        let mut links = self
            .store
            .links_for_building(campaign_id, building_id)
            .await?;
        links.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.address_id.cmp(&b.address_id))
        });

        let ids: Vec<Uuid> = links.iter().map(|l| l.address_id).collect();
        let records: HashMap<Uuid, AddressRecord> = self
            .store
            .get_addresses(campaign_id, &ids)
            .await?
            .into_iter()
            .map(|a| (a.id, a))
            .collect();

        let mut summary = LinkSummary::default();
        let addresses: Vec<LinkedAddress> = links
            .into_iter()
            .map(|link| {
                let is_outside_footprint = self.is_outside_footprint(link.distance_meters);
                summary.total += 1;
                if is_outside_footprint {
                    summary.outside += 1;
                } else {
                    summary.inside += 1;
                }

                let record = records.get(&link.address_id);
                LinkedAddress {
                    address_id: link.address_id,
                    formatted: record.map(|r| r.formatted.clone()),
                    house_number: record.and_then(|r| r.house_number.clone()),
                    street_name: record.and_then(|r| r.street_name.clone()),
                    unit: record.and_then(|r| r.unit.clone()),
                    point: record.and_then(|r| decode_point(&r.location)),
                    match_type: link.match_type,
                    confidence: link.confidence,
                    distance_meters: link.distance_meters,
                    is_outside_footprint,
                    modified_at: link.modified_at,
                }
            })
            .collect();

        debug!(
            "Building {} has {} linked addresses ({} outside)",
            building_id, summary.total, summary.outside
        );

        Ok(BuildingAddresses {
            building_id: building_id.to_string(),
            addresses,
            summary,
        })
    }

    /// Hard-delete the link between an address and a building.
    pub async fn unlink_address(
        &self,
        campaign_id: Uuid,
        building_id: &str,
        address_id: Uuid,
    ) -> Result<bool, LinkError> {
        if building_id.trim().is_empty() {
            return Err(LinkError::InvalidInput("building_id is empty".to_string()));
        }

        let removed = self
            .store
            .delete_link(campaign_id, building_id, address_id)
            .await?;
        if removed {
            info!("Unlinked address {} from building {}", address_id, building_id);
        } else {
            debug!(
                "No link between address {} and building {} to remove",
                address_id, building_id
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{Building, LocationRecord, MatchType};
    use crate::store::MemoryStore;
    use serde_json::json;

    const BUILDING_A: &str = "08b2baa2e0d1fff0020044f0a6c5e6c1";
    const BUILDING_B: &str = "08b2baa2e0d1fff00200f1ad8d0e7f2a";

    fn footprint(id: &str) -> Building {
        Building {
            id: id.to_string(),
            geometry: json!({
                "type": "Polygon",
                "coordinates": [[[-79.3471, 43.7459], [-79.3469, 43.7459], [-79.3469, 43.7461], [-79.3471, 43.7461], [-79.3471, 43.7459]]]
            }),
            centroid: Some(crate::models::GeoPoint::new(-79.347, 43.746)),
            height: Some(7.5),
            street_name: Some("Main St".to_string()),
        }
    }

    async fn linker() -> BuildingAddressLinker<MemoryStore> {
        let store = MemoryStore::new();
        store.insert_building(footprint(BUILDING_A)).await;
        store.insert_building(footprint(BUILDING_B)).await;
        BuildingAddressLinker::new(store, LinkerConfig::default())
    }

    fn automated(
        campaign_id: Uuid,
        address_id: Uuid,
        building_id: &str,
        confidence: f64,
        distance_meters: f64,
    ) -> LinkRequest {
        LinkRequest {
            campaign_id,
            address_id: Some(address_id),
            building_id: building_id.to_string(),
            match_type: MatchType::from("nearest"),
            confidence,
            distance_meters,
            confirm_override: false,
        }
    }

    fn expect_linked(outcome: LinkOutcome) -> BuildingAddressLink {
        match outcome {
            LinkOutcome::Linked { link } => link,
            other => panic!("expected link, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_high_confidence_link_raises_conflict() {
        let linker = linker().await;
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());

        linker
            .link_address(automated(c, a, BUILDING_A, 0.90, 2.0))
            .await
            .unwrap();

        let outcome = linker
            .link_address(LinkRequest::manual(c, a, BUILDING_B))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LinkOutcome::ConflictWarning {
                existing_building_id: BUILDING_A.to_string(),
                existing_confidence: 0.90,
            }
        );

        let stored = linker.store().get_link(c, a).await.unwrap().unwrap();
        assert_eq!(stored.building_id, BUILDING_A);
    }

    #[tokio::test]
    async fn test_low_confidence_link_replaced() {
        let linker = linker().await;
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());

        linker
            .link_address(automated(c, a, BUILDING_A, 0.40, 2.0))
            .await
            .unwrap();
        let link = expect_linked(
            linker
                .link_address(LinkRequest::manual(c, a, BUILDING_B))
                .await
                .unwrap(),
        );

        assert_eq!(link.building_id, BUILDING_B);
        assert!(link.match_type.is_manual());
        assert_eq!(linker.store().link_count(c).await, 1);
    }

    #[tokio::test]
    async fn test_confirmed_override_replaces_high_confidence() {
        let linker = linker().await;
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());

        linker
            .link_address(automated(c, a, BUILDING_A, 0.95, 1.0))
            .await
            .unwrap();
        let link = expect_linked(
            linker
                .link_address(LinkRequest::manual(c, a, BUILDING_B).confirmed())
                .await
                .unwrap(),
        );
        assert_eq!(link.building_id, BUILDING_B);
    }

    #[tokio::test]
    async fn test_relink_same_building_keeps_one_row() {
        let linker = linker().await;
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());

        let first = expect_linked(
            linker
                .link_address(automated(c, a, BUILDING_A, 0.95, 3.0))
                .await
                .unwrap(),
        );
        let second = expect_linked(
            linker
                .link_address(automated(c, a, BUILDING_A, 0.97, 2.0))
                .await
                .unwrap(),
        );

        assert_eq!(linker.store().link_count(c).await, 1);
        assert!(second.modified_at > first.modified_at);
        let stored = linker.store().get_link(c, a).await.unwrap().unwrap();
        assert_eq!(stored.confidence, 0.97);
    }

    #[tokio::test]
    async fn test_outside_footprint_threshold() {
        let linker = linker().await;
        assert!(linker.is_outside_footprint(15.0));
        assert!(!linker.is_outside_footprint(5.0));
        assert!(!linker.is_outside_footprint(10.0));

        let strict = BuildingAddressLinker::new(
            MemoryStore::new(),
            LinkerConfig {
                outside_footprint_threshold_m: 3.0,
                ..LinkerConfig::default()
            },
        );
        assert!(strict.is_outside_footprint(5.0));
    }

    #[tokio::test]
    async fn test_list_orders_by_confidence_and_summarizes() {
        let linker = linker().await;
        let c = Uuid::new_v4();
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        linker
            .store()
            .insert_address(AddressRecord {
                id: ids[0],
                campaign_id: c,
                formatted: "12 Main St".to_string(),
                house_number: Some("12".to_string()),
                street_name: Some("Main St".to_string()),
                unit: None,
                location: LocationRecord {
                    legacy_geom: Some(json!("0101000020E610000091ED7C3F35D653C0736891ED7CDF4540")),
                    ..Default::default()
                },
            })
            .await;

        linker
            .link_address(automated(c, ids[0], BUILDING_A, 0.60, 15.0))
            .await
            .unwrap();
        linker
            .link_address(automated(c, ids[1], BUILDING_A, 0.99, 1.0))
            .await
            .unwrap();
        linker
            .link_address(automated(c, ids[2], BUILDING_A, 0.75, 5.0))
            .await
            .unwrap();
        // Different building, not listed
        linker
            .link_address(automated(c, Uuid::new_v4(), BUILDING_B, 0.99, 1.0))
            .await
            .unwrap();

        let listing = linker.list_building_addresses(c, BUILDING_A).await.unwrap();
        let confidences: Vec<f64> = listing.addresses.iter().map(|a| a.confidence).collect();
        assert_eq!(confidences, vec![0.99, 0.75, 0.60]);
        assert_eq!(
            listing.summary,
            LinkSummary {
                total: 3,
                inside: 2,
                outside: 1
            }
        );

        let far = &listing.addresses[2];
        assert_eq!(far.address_id, ids[0]);
        assert!(far.is_outside_footprint);
        assert_eq!(far.formatted.as_deref(), Some("12 Main St"));
        let point = far.point.unwrap();
        assert!((point.lon - -79.347).abs() < 1e-6);

        // No address row stored for this one
        assert!(listing.addresses[0].formatted.is_none());
        assert!(listing.addresses[0].point.is_none());
    }

    #[tokio::test]
    async fn test_unlink() {
        let linker = linker().await;
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());
        linker
            .link_address(LinkRequest::manual(c, a, BUILDING_A))
            .await
            .unwrap();

        assert!(!linker.unlink_address(c, BUILDING_B, a).await.unwrap());
        assert!(linker.unlink_address(c, BUILDING_A, a).await.unwrap());
        assert!(linker.store().get_link(c, a).await.unwrap().is_none());
        assert!(!linker.unlink_address(c, BUILDING_A, a).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_input_not_attempted() {
        let linker = linker().await;
        let c = Uuid::new_v4();

        let mut missing_address = LinkRequest::manual(c, Uuid::new_v4(), BUILDING_A);
        missing_address.address_id = None;
        let err = linker.link_address(missing_address).await.unwrap_err();
        assert!(matches!(err, LinkError::InvalidInput(_)));

        let err = linker
            .link_address(automated(c, Uuid::new_v4(), BUILDING_A, 1.5, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidInput(_)));

        let err = linker
            .link_address(automated(c, Uuid::new_v4(), BUILDING_A, 0.5, -1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidInput(_)));

        assert_eq!(linker.store().link_count(c).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_building_and_bad_footprint() {
        let linker = linker().await;
        let c = Uuid::new_v4();

        let err = linker
            .link_address(LinkRequest::manual(c, Uuid::new_v4(), "missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::BuildingNotFound(_)));

        let mut broken = footprint("broken");
        broken.geometry = json!({"type": "Point", "coordinates": [-79.3, 43.7]});
        linker.store().insert_building(broken).await;
        let err = linker
            .link_address(LinkRequest::manual(c, Uuid::new_v4(), "broken"))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::InvalidFootprint(_)));
    }

    /// Store whose link table misbehaves in a chosen way
    struct FaultyStore {
        inner: MemoryStore,
        fault: Fault,
        /// Written by another party just before our next write lands
        competing: std::sync::Mutex<Option<BuildingAddressLink>>,
    }

    #[derive(Clone, Copy)]
    enum Fault {
        Backend,
        LostRace,
        Interleaved,
    }

    impl LinkStore for FaultyStore {
        async fn get_link(
            &self,
            campaign_id: Uuid,
            address_id: Uuid,
        ) -> Result<Option<BuildingAddressLink>, StoreError> {
            match self.fault {
                Fault::Backend => Err(StoreError::Backend("connection reset by peer".to_string())),
                Fault::LostRace | Fault::Interleaved => {
                    self.inner.get_link(campaign_id, address_id).await
                }
            }
        }

        async fn put_link(
            &self,
            link: &BuildingAddressLink,
            condition: WriteCondition,
        ) -> Result<bool, StoreError> {
            if !matches!(self.fault, Fault::Interleaved) {
                return Ok(false);
            }

            let competing = self.competing.lock().unwrap().take();
            if let Some(competing) = competing {
                let current = self
                    .inner
                    .get_link(competing.campaign_id, competing.address_id)
                    .await?;
                self.inner
                    .put_link(&competing, WriteCondition::observed(current.as_ref()))
                    .await?;
            }
            self.inner.put_link(link, condition).await
        }

        async fn delete_link(
            &self,
            campaign_id: Uuid,
            building_id: &str,
            address_id: Uuid,
        ) -> Result<bool, StoreError> {
            self.inner.delete_link(campaign_id, building_id, address_id).await
        }

        async fn links_for_building(
            &self,
            campaign_id: Uuid,
            building_id: &str,
        ) -> Result<Vec<BuildingAddressLink>, StoreError> {
            self.inner.links_for_building(campaign_id, building_id).await
        }
    }

    impl FeatureStore for FaultyStore {
        async fn get_building(&self, building_id: &str) -> Result<Option<Building>, StoreError> {
            self.inner.get_building(building_id).await
        }

        async fn get_addresses(
            &self,
            campaign_id: Uuid,
            address_ids: &[Uuid],
        ) -> Result<Vec<AddressRecord>, StoreError> {
            self.inner.get_addresses(campaign_id, address_ids).await
        }
    }

    async fn faulty(fault: Fault) -> BuildingAddressLinker<FaultyStore> {
        let inner = MemoryStore::new();
        inner.insert_building(footprint(BUILDING_A)).await;
        inner.insert_building(footprint(BUILDING_B)).await;
        let store = FaultyStore {
            inner,
            fault,
            competing: std::sync::Mutex::new(None),
        };
        BuildingAddressLinker::new(store, LinkerConfig::default())
    }

    /// Linker whose first write races a 0.95 link to building A.
    async fn interleaved(campaign_id: Uuid, address_id: Uuid) -> BuildingAddressLinker<FaultyStore> {
        let linker = faulty(Fault::Interleaved).await;
        *linker.store().competing.lock().unwrap() = Some(BuildingAddressLink {
            campaign_id,
            address_id,
            building_id: BUILDING_A.to_string(),
            match_type: MatchType::from("nearest"),
            confidence: 0.95,
            distance_meters: 1.0,
            modified_at: Utc::now(),
        });
        linker
    }

    #[tokio::test]
    async fn test_lost_write_rechecks_conflict_policy() {
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());
        let linker = interleaved(c, a).await;

        let outcome = linker
            .link_address(LinkRequest::manual(c, a, BUILDING_B))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LinkOutcome::ConflictWarning {
                existing_building_id: BUILDING_A.to_string(),
                existing_confidence: 0.95,
            }
        );

        let stored = linker.store().get_link(c, a).await.unwrap().unwrap();
        assert_eq!(stored.building_id, BUILDING_A);
    }

    #[tokio::test]
    async fn test_confirmed_override_retries_after_lost_write() {
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());
        let linker = interleaved(c, a).await;

        let link = expect_linked(
            linker
                .link_address(LinkRequest::manual(c, a, BUILDING_B).confirmed())
                .await
                .unwrap(),
        );
        assert_eq!(link.building_id, BUILDING_B);

        let stored = linker.store().get_link(c, a).await.unwrap().unwrap();
        assert_eq!(stored.building_id, BUILDING_B);
        assert_eq!(linker.store().inner.link_count(c).await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_manual_links_one_wins() {
        let linker = linker().await;
        let (c, a) = (Uuid::new_v4(), Uuid::new_v4());

        let (first, second) = tokio::join!(
            linker.link_address(LinkRequest::manual(c, a, BUILDING_A)),
            linker.link_address(LinkRequest::manual(c, a, BUILDING_B)),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let winners: Vec<&BuildingAddressLink> = outcomes
            .iter()
            .filter_map(|o| match o {
                LinkOutcome::Linked { link } => Some(link),
                LinkOutcome::ConflictWarning { .. } => None,
            })
            .collect();
        assert_eq!(winners.len(), 1);
        assert!(outcomes.iter().any(|o| matches!(
            o,
            LinkOutcome::ConflictWarning {
                existing_confidence,
                ..
            } if *existing_confidence == 1.0
        )));

        let stored = linker.store().get_link(c, a).await.unwrap().unwrap();
        assert_eq!(stored.building_id, winners[0].building_id);
        assert_eq!(linker.store().link_count(c).await, 1);
    }

    #[tokio::test]
    async fn test_storage_error_propagates_message() {
        let linker = faulty(Fault::Backend).await;
        let err = linker
            .link_address(LinkRequest::manual(Uuid::new_v4(), Uuid::new_v4(), BUILDING_A))
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Store(_)));
        assert!(err.to_string().contains("connection reset by peer"));
    }

    #[tokio::test]
    async fn test_persistent_race_reports_contention() {
        let linker = faulty(Fault::LostRace).await;
        let err = linker
            .link_address(LinkRequest::manual(Uuid::new_v4(), Uuid::new_v4(), BUILDING_A))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::Contended {
                attempts: MAX_WRITE_ATTEMPTS,
                ..
            }
        ));
    }
}
