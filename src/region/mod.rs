//! Campaign region-code inference.
//!
//! Campaigns historically got the default code regardless of location, so
//! the default is treated as a placeholder that inference may override.

mod geocoder;
mod resolver;
mod tables;

pub use geocoder::{region_code_from_features, GeocodedFeature, MapboxGeocoder, ReverseGeocoder};
pub use resolver::{
    Inference, RegionResolver, RegionSource, ResolutionReason, ResolutionResult,
};
pub use tables::{RegionBox, RegionTables};

/// Code historically written to every campaign
pub const DEFAULT_REGION: &str = "ON";

/// Trimmed two-letter ASCII code, uppercased. Anything else is absent.
pub fn normalize_region_code(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() == 2 && code.bytes().all(|b| b.is_ascii_alphabetic()) {
        Some(code.to_ascii_uppercase())
    } else {
        None
    }
}
