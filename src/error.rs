//! Error types for geolink operations.
//!
//! Geometry parse misses and geocoder failures are recovered locally and
//! never reach these types' callers as hard errors; see
//! [`crate::codec::ParseMiss`] and [`GeocodeError`].

use thiserror::Error;
use uuid::Uuid;

/// Storage-layer failure, carrying the backend's message
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Reverse geocoding failure. Always degraded to the local fallback.
#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Geocoder unavailable: {0}")]
    Unavailable(String),

    #[error("Geocoder request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned status {0}")]
    Status(u16),

    #[error("Malformed geocoder payload: {0}")]
    Payload(String),
}

#[derive(Error, Debug)]
pub enum LinkError {
    /// Caller input was missing or out of range; nothing was attempted
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Building not found: {0}")]
    BuildingNotFound(String),

    #[error("Building {0} has no usable footprint geometry")]
    InvalidFootprint(String),

    /// Concurrent writers kept changing the row between read and write
    #[error("Link for address {address_id} changed concurrently {attempts} times")]
    Contended { address_id: Uuid, attempts: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}
