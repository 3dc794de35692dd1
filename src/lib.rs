//! geolink - geometry decoding, region resolution and building-address
//! linking for canvassing campaigns.
//!
//! This library provides the shared types and services used by the
//! `geolink` operator binary.

pub mod codec;
pub mod config;
pub mod error;
pub mod linker;
pub mod models;
pub mod region;
pub mod scylla;
pub mod store;

pub use codec::decode_point;
pub use config::Config;
pub use error::{GeocodeError, LinkError, RegionError, StoreError};
pub use linker::{BuildingAddressLinker, LinkOutcome, LinkRequest};
pub use models::{BuildingAddressLink, GeoPoint, LocationRecord, MatchType};
pub use region::{RegionResolver, RegionTables, ResolutionResult};
