//! ScyllaDB-backed implementation of the storage traits.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::response::query_result::QueryResult;
use scylla::value::{CqlValue, Row};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AddressRecord, Building, BuildingAddressLink, CampaignRecord, GeoBbox, GeoPoint,
    LocationRecord, MatchType,
};
use crate::store::{CampaignStore, FeatureStore, LinkStore, WriteCondition};

/// Scylla/Cassandra limit IN lists in practice; stay well under it
const IN_CLAUSE_CHUNK: usize = 100;

type LinkRow = (Uuid, Uuid, String, String, f64, f64, i64);

type AddressRow = (
    Uuid,
    Uuid,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<f64>,
    Option<f64>,
);

type BuildingRow = (
    String,
    Option<String>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<String>,
);

type CampaignRow = (Uuid, Option<String>, Option<Vec<f64>>, Option<String>);

const LINK_COLUMNS: &str =
    "campaign_id, address_id, building_id, match_type, confidence, distance_meters, modified_at";

#[derive(Clone)]
pub struct ScyllaStore {
    session: Arc<Session>,
    keyspace: String,
}

impl ScyllaStore {
    pub async fn new(uri: &str, keyspace: &str) -> Result<Self> {
        if keyspace.is_empty()
            || !keyspace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!("Invalid keyspace name: {:?}", keyspace);
        }

        info!("Connecting to ScyllaDB at {}...", uri);
        let session: Session = SessionBuilder::new()
            .known_node(uri)
            .build()
            .await
            .context("Failed to connect to ScyllaDB")?;

        let store = Self {
            session: Arc::new(session),
            keyspace: keyspace.to_string(),
        };

        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let ks = &self.keyspace;

        self.session
            .query_unpaged(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {ks}
                     WITH REPLICATION = {{
                        'class' : 'SimpleStrategy',
                        'replication_factor' : 1
                     }}"
                ),
                &[],
            )
            .await
            .context("Failed to create keyspace")?;

        let tables = [
            format!(
                "CREATE TABLE IF NOT EXISTS {ks}.addresses (
                    campaign_id uuid,
                    id uuid,
                    formatted text,
                    house_number text,
                    street_name text,
                    unit text,
                    geom_json text,
                    geom text,
                    geometry text,
                    lon double,
                    lat double,
                    PRIMARY KEY ((campaign_id), id)
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {ks}.buildings (
                    id text PRIMARY KEY,
                    geometry text,
                    centroid_lon double,
                    centroid_lat double,
                    height double,
                    street_name text
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {ks}.campaigns (
                    id uuid PRIMARY KEY,
                    region text,
                    bbox list<double>,
                    territory_boundary text
                )"
            ),
            format!(
                "CREATE TABLE IF NOT EXISTS {ks}.building_address_links (
                    campaign_id uuid,
                    address_id uuid,
                    building_id text,
                    match_type text,
                    confidence double,
                    distance_meters double,
                    modified_at bigint,
                    PRIMARY KEY ((campaign_id), address_id)
                )"
            ),
        ];

        for statement in tables {
            self.session
                .query_unpaged(statement, &[])
                .await
                .context("Failed to create table")?;
        }

        Ok(())
    }
}

/// Read the `[applied]` column of a lightweight-transaction result.
fn was_applied(result: QueryResult) -> Result<bool, StoreError> {
    let rows = result.into_rows_result().map_err(StoreError::backend)?;
    let row = rows.maybe_first_row::<Row>().map_err(StoreError::backend)?;
    match row.as_ref().and_then(|r| r.columns.first()) {
        Some(Some(CqlValue::Boolean(applied))) => Ok(*applied),
        _ => Err(StoreError::Corrupt(
            "conditional write returned no [applied] column".to_string(),
        )),
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Corrupt(format!("modified_at {} out of range", millis)))
}

fn link_from_row(row: LinkRow) -> Result<BuildingAddressLink, StoreError> {
    let (campaign_id, address_id, building_id, match_type, confidence, distance_meters, modified_at) =
        row;
    Ok(BuildingAddressLink {
        campaign_id,
        address_id,
        building_id,
        match_type: MatchType::from(match_type),
        confidence,
        distance_meters,
        modified_at: timestamp(modified_at)?,
    })
}

/// Geometry columns are text. JSON documents are parsed back; anything else
/// (WKT, EWKB hex) stays a string for the codec to sniff.
fn geometry_value(text: Option<String>) -> Option<Value> {
    let text = text?;
    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => Some(Value::String(text)),
    }
}

fn address_from_row(row: AddressRow) -> AddressRecord {
    let (
        campaign_id,
        id,
        formatted,
        house_number,
        street_name,
        unit,
        geom_json,
        geom,
        geometry,
        lon,
        lat,
    ) = row;
    AddressRecord {
        id,
        campaign_id,
        formatted: formatted.unwrap_or_default(),
        house_number,
        street_name,
        unit,
        location: LocationRecord {
            geom_json: geometry_value(geom_json),
            geom: geometry_value(geom),
            legacy_geom: geometry_value(geometry),
            lon,
            lat,
        },
    }
}

fn building_from_row(row: BuildingRow) -> Building {
    let (id, geometry, centroid_lon, centroid_lat, height, street_name) = row;
    let centroid = match (centroid_lon, centroid_lat) {
        (Some(lon), Some(lat)) => GeoPoint::checked(lon, lat),
        _ => None,
    };
    Building {
        id,
        geometry: geometry_value(geometry).unwrap_or(Value::Null),
        centroid,
        height,
        street_name,
    }
}

fn campaign_from_row(row: CampaignRow) -> CampaignRecord {
    let (id, region, bbox, territory_boundary) = row;
    CampaignRecord {
        id,
        region,
        bbox: bbox.as_deref().and_then(GeoBbox::from_slice),
        territory_boundary: geometry_value(territory_boundary),
    }
}

impl LinkStore for ScyllaStore {
    async fn get_link(
        &self,
        campaign_id: Uuid,
        address_id: Uuid,
    ) -> Result<Option<BuildingAddressLink>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                format!(
                    "SELECT {LINK_COLUMNS} FROM {}.building_address_links
                     WHERE campaign_id = ? AND address_id = ?",
                    self.keyspace
                ),
                (campaign_id, address_id),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = result.into_rows_result().map_err(StoreError::backend)?;
        match rows.maybe_first_row::<LinkRow>().map_err(StoreError::backend)? {
            Some(row) => Ok(Some(link_from_row(row)?)),
            None => Ok(None),
        }
    }

    async fn put_link(
        &self,
        link: &BuildingAddressLink,
        condition: WriteCondition,
    ) -> Result<bool, StoreError> {
        let ks = &self.keyspace;
        let modified_at = link.modified_at.timestamp_millis();
        let values = (
            link.campaign_id,
            link.address_id,
            link.building_id.as_str(),
            link.match_type.as_str(),
            link.confidence,
            link.distance_meters,
            modified_at,
        );

        // Link rows are only ever written through lightweight transactions
        let applied = match condition {
            WriteCondition::Absent => {
                let result = self
                    .session
                    .query_unpaged(
                        format!(
                            "INSERT INTO {ks}.building_address_links ({LINK_COLUMNS})
                             VALUES (?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS"
                        ),
                        values,
                    )
                    .await
                    .map_err(StoreError::backend)?;
                was_applied(result)?
            }
            WriteCondition::Unchanged {
                modified_at: expected,
            } => {
                let result = self
                    .session
                    .query_unpaged(
                        format!(
                            "UPDATE {ks}.building_address_links
                             SET building_id = ?, match_type = ?, confidence = ?,
                                 distance_meters = ?, modified_at = ?
                             WHERE campaign_id = ? AND address_id = ?
                             IF modified_at = ?"
                        ),
                        (
                            link.building_id.as_str(),
                            link.match_type.as_str(),
                            link.confidence,
                            link.distance_meters,
                            modified_at,
                            link.campaign_id,
                            link.address_id,
                            expected.timestamp_millis(),
                        ),
                    )
                    .await
                    .map_err(StoreError::backend)?;
                was_applied(result)?
            }
        };

        if !applied {
            debug!(
                "Conditional write for address {} not applied ({:?})",
                link.address_id, condition
            );
        }
        Ok(applied)
    }

    async fn delete_link(
        &self,
        campaign_id: Uuid,
        building_id: &str,
        address_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = self
            .session
            .query_unpaged(
                format!(
                    "DELETE FROM {}.building_address_links
                     WHERE campaign_id = ? AND address_id = ?
                     IF building_id = ?",
                    self.keyspace
                ),
                (campaign_id, address_id, building_id),
            )
            .await
            .map_err(StoreError::backend)?;
        was_applied(result)
    }

    async fn links_for_building(
        &self,
        campaign_id: Uuid,
        building_id: &str,
    ) -> Result<Vec<BuildingAddressLink>, StoreError> {
        // Filtering stays inside a single campaign partition
        let result = self
            .session
            .query_unpaged(
                format!(
                    "SELECT {LINK_COLUMNS} FROM {}.building_address_links
                     WHERE campaign_id = ? AND building_id = ? ALLOW FILTERING",
                    self.keyspace
                ),
                (campaign_id, building_id),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = result.into_rows_result().map_err(StoreError::backend)?;
        let mut links = Vec::new();
        for row in rows.rows::<LinkRow>().map_err(StoreError::backend)? {
            links.push(link_from_row(row.map_err(StoreError::backend)?)?);
        }
        Ok(links)
    }
}

impl FeatureStore for ScyllaStore {
    async fn get_building(&self, building_id: &str) -> Result<Option<Building>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                format!(
                    "SELECT id, geometry, centroid_lon, centroid_lat, height, street_name
                     FROM {}.buildings WHERE id = ?",
                    self.keyspace
                ),
                (building_id,),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = result.into_rows_result().map_err(StoreError::backend)?;
        Ok(rows
            .maybe_first_row::<BuildingRow>()
            .map_err(StoreError::backend)?
            .map(building_from_row))
    }

    async fn get_addresses(
        &self,
        campaign_id: Uuid,
        address_ids: &[Uuid],
    ) -> Result<Vec<AddressRecord>, StoreError> {
        let mut addresses = Vec::with_capacity(address_ids.len());

        for chunk in address_ids.chunks(IN_CLAUSE_CHUNK) {
            let placeholders: Vec<&str> = chunk.iter().map(|_| "?").collect();
            let query = format!(
                "SELECT campaign_id, id, formatted, house_number, street_name, unit,
                        geom_json, geom, geometry, lon, lat
                 FROM {}.addresses WHERE campaign_id = ? AND id IN ({})",
                self.keyspace,
                placeholders.join(", ")
            );

            let mut values = Vec::with_capacity(chunk.len() + 1);
            values.push(campaign_id);
            values.extend_from_slice(chunk);

            let result = self
                .session
                .query_unpaged(query, values)
                .await
                .map_err(StoreError::backend)?;
            let rows = result.into_rows_result().map_err(StoreError::backend)?;
            for row in rows.rows::<AddressRow>().map_err(StoreError::backend)? {
                addresses.push(address_from_row(row.map_err(StoreError::backend)?));
            }
        }

        Ok(addresses)
    }
}

impl CampaignStore for ScyllaStore {
    async fn get_campaign(&self, campaign_id: Uuid) -> Result<Option<CampaignRecord>, StoreError> {
        let result = self
            .session
            .query_unpaged(
                format!(
                    "SELECT id, region, bbox, territory_boundary FROM {}.campaigns WHERE id = ?",
                    self.keyspace
                ),
                (campaign_id,),
            )
            .await
            .map_err(StoreError::backend)?;

        let rows = result.into_rows_result().map_err(StoreError::backend)?;
        Ok(rows
            .maybe_first_row::<CampaignRow>()
            .map_err(StoreError::backend)?
            .map(campaign_from_row))
    }

    async fn set_campaign_region(&self, campaign_id: Uuid, region: &str) -> Result<(), StoreError> {
        // IF EXISTS keeps a region write from creating a bare campaign row
        let result = self
            .session
            .query_unpaged(
                format!(
                    "UPDATE {}.campaigns SET region = ? WHERE id = ? IF EXISTS",
                    self.keyspace
                ),
                (region, campaign_id),
            )
            .await
            .map_err(StoreError::backend)?;

        if !was_applied(result)? {
            return Err(StoreError::Backend(format!(
                "campaign {} does not exist",
                campaign_id
            )));
        }
        Ok(())
    }
}
