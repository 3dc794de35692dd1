//! Reverse geocoding collaborator.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::normalize_region_code;
use super::tables::RegionTables;
use crate::config::GeocoderConfig;
use crate::error::GeocodeError;
use crate::models::GeoPoint;

/// A ranked reverse-geocoding result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeocodedFeature {
    /// e.g. "CA-BC"
    pub short_code: Option<String>,
    pub name: Option<String>,
    pub context: Vec<GeocodedFeature>,
}

pub trait ReverseGeocoder: Send + Sync {
    /// Region/country features at a point, best match first.
    fn reverse(
        &self,
        point: GeoPoint,
    ) -> impl Future<Output = Result<Vec<GeocodedFeature>, GeocodeError>> + Send;

    /// Lowercase country codes the geocoder is restricted to. Short codes
    /// from other countries are ignored.
    fn countries(&self) -> &[String];
}

/// Pull a region code out of geocoder features.
///
/// Checks the top feature's short code, then its name against the province
/// table, then each context entry the same way.
pub fn region_code_from_features(
    features: &[GeocodedFeature],
    countries: &[String],
    tables: &RegionTables,
) -> Option<String> {
    let top = features.first()?;
    code_from_feature(top, countries, tables).or_else(|| {
        top.context
            .iter()
            .find_map(|entry| code_from_feature(entry, countries, tables))
    })
}

fn code_from_feature(
    feature: &GeocodedFeature,
    countries: &[String],
    tables: &RegionTables,
) -> Option<String> {
    feature
        .short_code
        .as_deref()
        .and_then(|sc| code_from_short_code(sc, countries))
        .or_else(|| {
            feature
                .name
                .as_deref()
                .and_then(|name| tables.code_for_name(name))
                .map(str::to_string)
        })
}

/// `CA-BC` -> `BC` when the country prefix is in the allowlist. Bare
/// country codes like `ca` carry no region.
fn code_from_short_code(short_code: &str, countries: &[String]) -> Option<String> {
    let (country, region) = short_code.trim().split_once('-')?;
    if !countries.iter().any(|c| c.eq_ignore_ascii_case(country)) {
        return None;
    }
    normalize_region_code(region)
}

#[derive(Debug, Deserialize)]
struct MapboxResponse {
    #[serde(default)]
    features: Vec<MapboxFeature>,
}

#[derive(Debug, Deserialize)]
struct MapboxFeature {
    #[serde(default)]
    short_code: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    place_name: Option<String>,
    #[serde(default)]
    properties: Option<MapboxProperties>,
    #[serde(default)]
    context: Vec<MapboxFeature>,
}

#[derive(Debug, Deserialize)]
struct MapboxProperties {
    #[serde(default)]
    short_code: Option<String>,
}

impl From<MapboxFeature> for GeocodedFeature {
    fn from(f: MapboxFeature) -> Self {
        let short_code = f.short_code.or(f.properties.and_then(|p| p.short_code));
        let name = f.text.or_else(|| {
            f.place_name
                .as_deref()
                .and_then(|n| n.split(',').next())
                .map(|n| n.trim().to_string())
        });
        Self {
            short_code,
            name,
            context: f.context.into_iter().map(Into::into).collect(),
        }
    }
}

/// Mapbox reverse geocoder restricted to region/country features.
pub struct MapboxGeocoder {
    client: Client,
    base_url: Url,
    access_token: Option<String>,
    countries: Vec<String>,
}

impl MapboxGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).context("Invalid geocoder base URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .user_agent(concat!("geolink/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            access_token: config.access_token.clone().filter(|t| !t.is_empty()),
            countries: config.countries.clone(),
        })
    }

    pub fn is_available(&self) -> bool {
        self.access_token.is_some()
    }

    fn request_url(&self, point: GeoPoint, token: &str) -> Result<Url, GeocodeError> {
        let mut url = self
            .base_url
            .join(&format!(
                "geocoding/v5/mapbox.places/{},{}.json",
                point.lon, point.lat
            ))
            .map_err(|e| GeocodeError::Unavailable(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("types", "region,country")
            .append_pair("country", &self.countries.join(","))
            .append_pair("access_token", token);
        Ok(url)
    }
}

impl ReverseGeocoder for MapboxGeocoder {
    async fn reverse(&self, point: GeoPoint) -> Result<Vec<GeocodedFeature>, GeocodeError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| GeocodeError::Unavailable("no access token configured".to_string()))?;

        let url = self.request_url(point, token)?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }

        let body: MapboxResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Payload(e.to_string()))?;

        debug!(
            "Reverse geocode at ({}, {}) returned {} features",
            point.lon,
            point.lat,
            body.features.len()
        );

        Ok(body.features.into_iter().map(Into::into).collect())
    }

    fn countries(&self) -> &[String] {
        &self.countries
    }
}
