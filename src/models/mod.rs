//! Core data models shared by the codec, resolver and linker.

pub mod geo;
pub mod link;
pub mod record;

pub use geo::{GeoBbox, GeoPoint};
pub use link::{BuildingAddressLink, BuildingAddresses, LinkSummary, LinkedAddress, MatchType};
pub use record::{AddressRecord, Building, CampaignRecord, LocationRecord};
