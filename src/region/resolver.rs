//! Region resolution decision logic.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::geocoder::{region_code_from_features, ReverseGeocoder};
use super::normalize_region_code;
use super::tables::RegionTables;
use crate::codec::{bbox_centroid, ring_centroid};
use crate::error::{GeocodeError, RegionError};
use crate::models::{GeoBbox, GeoPoint};
use crate::store::CampaignStore;

/// Where the returned code came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionSource {
    /// Stored on the campaign
    Campaign,
    /// Reverse geocoder
    Geocoder,
    /// Local bounding-box table
    Bbox,
    /// Nothing known, default code
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionReason {
    /// Campaign had no usable code
    Missing,
    /// Campaign carried the placeholder default and inference disagrees
    LegacyOnDefault,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub region_code: String,
    pub source: RegionSource,
    pub should_persist: bool,
    pub reason: Option<ResolutionReason>,
    pub centroid: Option<GeoPoint>,
}

/// An inferred region code and how it was found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inference {
    pub code: String,
    pub source: RegionSource,
}

/// Why the geocoder stage produced nothing
#[derive(Debug)]
enum RemoteMiss {
    Geocoder(GeocodeError),
    NoRegionCode,
}

pub struct RegionResolver<G> {
    tables: Arc<RegionTables>,
    geocoder: G,
}

impl<G: ReverseGeocoder> RegionResolver<G> {
    pub fn new(tables: Arc<RegionTables>, geocoder: G) -> Self {
        Self { tables, geocoder }
    }

    pub fn tables(&self) -> &RegionTables {
        &self.tables
    }

    /// Decide a campaign's region code from its stored code and geometry.
    pub async fn resolve(
        &self,
        current_region: Option<&str>,
        polygon: Option<&Value>,
        bbox: Option<&GeoBbox>,
    ) -> ResolutionResult {
        let default_code = self.tables.default_code();
        let current = current_region.and_then(normalize_region_code);

        // An explicit non-default code is trusted without a network call
        if let Some(code) = current.as_deref().filter(|c| *c != default_code) {
            return ResolutionResult {
                region_code: code.to_string(),
                source: RegionSource::Campaign,
                should_persist: false,
                reason: None,
                centroid: None,
            };
        }

        let centroid = polygon
            .and_then(ring_centroid)
            .or_else(|| bbox.and_then(bbox_centroid));

        let Some(centroid) = centroid else {
            debug!("No usable polygon or bbox, keeping {:?}", current);
            return Self::keep(current, default_code, None);
        };

        let inference = self.infer(centroid).await;

        match (current, inference) {
            (None, Some(inferred)) => ResolutionResult {
                region_code: inferred.code,
                source: inferred.source,
                should_persist: true,
                reason: Some(ResolutionReason::Missing),
                centroid: Some(centroid),
            },
            (Some(current), Some(inferred)) if inferred.code != current => {
                info!(
                    "Overriding placeholder region {} with {} ({:?})",
                    current, inferred.code, inferred.source
                );
                ResolutionResult {
                    region_code: inferred.code,
                    source: inferred.source,
                    should_persist: true,
                    reason: Some(ResolutionReason::LegacyOnDefault),
                    centroid: Some(centroid),
                }
            }
            (current, _) => Self::keep(current, default_code, Some(centroid)),
        }
    }

    fn keep(
        current: Option<String>,
        default_code: &str,
        centroid: Option<GeoPoint>,
    ) -> ResolutionResult {
        let (region_code, source) = match current {
            Some(code) => (code, RegionSource::Campaign),
            None => (default_code.to_string(), RegionSource::Default),
        };
        ResolutionResult {
            region_code,
            source,
            should_persist: false,
            reason: None,
            centroid,
        }
    }

    /// Geocoder first, local box table on any miss.
    pub async fn infer(&self, point: GeoPoint) -> Option<Inference> {
        match self.infer_remote(point).await {
            Ok(code) => {
                return Some(Inference {
                    code,
                    source: RegionSource::Geocoder,
                })
            }
            Err(RemoteMiss::Geocoder(GeocodeError::Unavailable(reason))) => {
                debug!("Geocoder unavailable ({}), using local tables", reason)
            }
            Err(RemoteMiss::Geocoder(e)) => {
                warn!("Reverse geocode failed, using local tables: {}", e)
            }
            Err(RemoteMiss::NoRegionCode) => {
                debug!("Geocoder returned no region code, using local tables")
            }
        }

        self.infer_local(point).map(|code| Inference {
            code,
            source: RegionSource::Bbox,
        })
    }

    async fn infer_remote(&self, point: GeoPoint) -> Result<String, RemoteMiss> {
        let features = self
            .geocoder
            .reverse(point)
            .await
            .map_err(RemoteMiss::Geocoder)?;
        region_code_from_features(&features, self.geocoder.countries(), &self.tables)
            .ok_or(RemoteMiss::NoRegionCode)
    }

    fn infer_local(&self, point: GeoPoint) -> Option<String> {
        self.tables.locate(&point).map(|b| b.code.clone())
    }

    /// Resolve a stored campaign and write the code back when it changed.
    pub async fn resolve_campaign<S: CampaignStore>(
        &self,
        store: &S,
        campaign_id: Uuid,
    ) -> Result<ResolutionResult, RegionError> {
        let campaign = store
            .get_campaign(campaign_id)
            .await?
            .ok_or(RegionError::CampaignNotFound(campaign_id))?;

        let result = self
            .resolve(
                campaign.region.as_deref(),
                campaign.territory_boundary.as_ref(),
                campaign.bbox.as_ref(),
            )
            .await;

        if result.should_persist {
            store
                .set_campaign_region(campaign_id, &result.region_code)
                .await?;
            info!(
                "Persisted region {} for campaign {} ({:?})",
                result.region_code, campaign_id, result.reason
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CampaignRecord;
    use crate::region::{GeocodedFeature, RegionBox};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubGeocoder {
        features: Option<Vec<GeocodedFeature>>,
        calls: Arc<AtomicUsize>,
        countries: Vec<String>,
    }

    impl StubGeocoder {
        fn unavailable() -> Self {
            Self {
                features: None,
                calls: Arc::new(AtomicUsize::new(0)),
                countries: vec!["ca".to_string(), "us".to_string()],
            }
        }

        fn region(short_code: &str) -> Self {
            Self {
                features: Some(vec![GeocodedFeature {
                    short_code: Some(short_code.to_string()),
                    name: None,
                    context: vec![],
                }]),
                calls: Arc::new(AtomicUsize::new(0)),
                countries: vec!["ca".to_string(), "us".to_string()],
            }
        }
    }

    impl ReverseGeocoder for StubGeocoder {
        async fn reverse(&self, _point: GeoPoint) -> Result<Vec<GeocodedFeature>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.features
                .clone()
                .ok_or_else(|| GeocodeError::Unavailable("stub".to_string()))
        }

        fn countries(&self) -> &[String] {
            &self.countries
        }
    }

    fn vancouver() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[-123.2, 49.2], [-123.0, 49.2], [-123.0, 49.3], [-123.2, 49.3], [-123.2, 49.2]]]
        })
    }

    fn calgary() -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[[-114.2, 50.9], [-113.9, 50.9], [-113.9, 51.2], [-114.2, 51.2], [-114.2, 50.9]]]
        })
    }

    fn resolver(geocoder: StubGeocoder) -> RegionResolver<StubGeocoder> {
        RegionResolver::new(Arc::new(RegionTables::builtin()), geocoder)
    }

    fn assert_near(point: Option<GeoPoint>, lon: f64, lat: f64) {
        let point = point.expect("centroid");
        assert!((point.lon - lon).abs() < 1e-9 && (point.lat - lat).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_explicit_region_kept_without_lookup() {
        let stub = StubGeocoder::region("CA-AB");
        let calls = stub.calls.clone();
        let r = resolver(stub);

        let result = r.resolve(Some("bc"), Some(&calgary()), None).await;
        assert_eq!(result.region_code, "BC");
        assert_eq!(result.source, RegionSource::Campaign);
        assert!(!result.should_persist);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_region_uses_local_table_when_geocoder_down() {
        let r = resolver(StubGeocoder::unavailable());
        let result = r.resolve(None, Some(&vancouver()), None).await;

        assert_eq!(result.region_code, "BC");
        assert_eq!(result.source, RegionSource::Bbox);
        assert!(result.should_persist);
        assert_eq!(result.reason, Some(ResolutionReason::Missing));
        assert_near(result.centroid, -123.1, 49.25);
    }

    #[tokio::test]
    async fn test_default_overridden_by_inference() {
        let r = resolver(StubGeocoder::unavailable());
        let result = r.resolve(Some("ON"), Some(&calgary()), None).await;

        assert_eq!(result.region_code, "AB");
        assert!(result.should_persist);
        assert_eq!(result.reason, Some(ResolutionReason::LegacyOnDefault));
    }

    #[tokio::test]
    async fn test_geocoder_result_preferred() {
        let stub = StubGeocoder::region("CA-AB");
        let calls = stub.calls.clone();
        let r = resolver(stub);
        let result = r.resolve(Some("ON"), Some(&calgary()), None).await;

        assert_eq!(result.region_code, "AB");
        assert_eq!(result.source, RegionSource::Geocoder);
        assert_eq!(result.reason, Some(ResolutionReason::LegacyOnDefault));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_code_allowlist_follows_geocoder() {
        let canada_only: Vec<RegionBox> = RegionTables::builtin()
            .boxes()
            .iter()
            .filter(|b| b.country == "ca")
            .cloned()
            .collect();
        let tables = Arc::new(RegionTables::new("ON", Vec::new(), canada_only));

        let r = RegionResolver::new(tables.clone(), StubGeocoder::region("US-WA"));
        let result = r.resolve(None, Some(&vancouver()), None).await;
        assert_eq!(result.region_code, "WA");
        assert_eq!(result.source, RegionSource::Geocoder);

        let mut restricted = StubGeocoder::region("US-WA");
        restricted.countries = vec!["ca".to_string()];
        let r = RegionResolver::new(tables, restricted);
        let result = r.resolve(None, Some(&vancouver()), None).await;
        assert_eq!(result.region_code, "BC");
        assert_eq!(result.source, RegionSource::Bbox);
    }

    #[tokio::test]
    async fn test_geocoder_without_region_falls_back() {
        // Only a country-level feature comes back
        let r = resolver(StubGeocoder::region("ca"));
        let result = r.resolve(None, Some(&vancouver()), None).await;
        assert_eq!(result.region_code, "BC");
        assert_eq!(result.source, RegionSource::Bbox);
    }

    #[tokio::test]
    async fn test_default_confirmed_by_inference_not_persisted() {
        let toronto = GeoBbox::new(-79.6, 43.6, -79.2, 43.8);
        let r = resolver(StubGeocoder::unavailable());
        let result = r.resolve(Some("ON"), None, Some(&toronto)).await;

        assert_eq!(result.region_code, "ON");
        assert_eq!(result.source, RegionSource::Campaign);
        assert!(!result.should_persist);
        assert!(result.centroid.is_some());
    }

    #[tokio::test]
    async fn test_degenerate_ring_falls_back_to_bbox() {
        let two_points = json!({"type": "Polygon", "coordinates": [[[-123.2, 49.2], [-123.0, 49.3]]]});
        let bbox = GeoBbox::new(-114.2, 50.9, -113.9, 51.2);
        let r = resolver(StubGeocoder::unavailable());

        let result = r.resolve(None, Some(&two_points), Some(&bbox)).await;
        assert_eq!(result.region_code, "AB");
        assert_near(result.centroid, -114.05, 51.05);
    }

    #[tokio::test]
    async fn test_degenerate_ring_without_bbox_keeps_default() {
        let two_points = json!({"type": "Polygon", "coordinates": [[[-123.2, 49.2], [-123.0, 49.3]]]});
        let r = resolver(StubGeocoder::unavailable());

        let result = r.resolve(None, Some(&two_points), None).await;
        assert_eq!(result.region_code, "ON");
        assert_eq!(result.source, RegionSource::Default);
        assert!(!result.should_persist);
        assert!(result.centroid.is_none());
    }

    #[tokio::test]
    async fn test_no_inference_anywhere() {
        // Mid-Atlantic, outside every table
        let bbox = GeoBbox::new(-30.0, 30.0, -29.0, 31.0);
        let r = resolver(StubGeocoder::unavailable());
        let result = r.resolve(Some("garbage"), None, Some(&bbox)).await;

        assert_eq!(result.region_code, "ON");
        assert_eq!(result.source, RegionSource::Default);
        assert!(!result.should_persist);
        assert!(result.reason.is_none());
    }

    #[tokio::test]
    async fn test_resolve_campaign_persists() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        store
            .insert_campaign(CampaignRecord {
                id,
                region: Some("ON".into()),
                bbox: None,
                territory_boundary: Some(Value::String(calgary().to_string())),
            })
            .await;

        let r = resolver(StubGeocoder::unavailable());
        let result = r.resolve_campaign(&store, id).await.unwrap();
        assert_eq!(result.region_code, "AB");

        let stored = store.get_campaign(id).await.unwrap().unwrap();
        assert_eq!(stored.region.as_deref(), Some("AB"));
    }

    #[tokio::test]
    async fn test_resolve_unknown_campaign() {
        let store = MemoryStore::new();
        let r = resolver(StubGeocoder::unavailable());
        let err = r.resolve_campaign(&store, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RegionError::CampaignNotFound(_)));
    }
}
