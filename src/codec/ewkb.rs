//! Extended Well-Known-Binary point decoding from hex.
//!
//! Layout (25 bytes, 50 hex chars minimum):
//! - byte 0: endianness flag (ignored, little-endian assumed)
//! - bytes 1..5: geometry type with SRID flag
//! - bytes 5..9: SRID (ignored)
//! - bytes 9..17: X as little-endian f64
//! - bytes 17..25: Y as little-endian f64

use super::ParseMiss;
use crate::models::GeoPoint;

const MIN_HEX_LEN: usize = 50;
const POINT_BYTES: usize = 25;

/// Even-length hex string of at least 50 chars starting with `00` or `01`.
pub(crate) fn looks_like_ewkb(s: &str) -> bool {
    let s = s.trim();
    s.len() >= MIN_HEX_LEN
        && s.len() % 2 == 0
        && (s.starts_with("00") || s.starts_with("01"))
        && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn decode_hex(s: &str, n_bytes: usize) -> Result<Vec<u8>, ParseMiss> {
    if s.len() < n_bytes * 2 {
        return Err(ParseMiss::Truncated);
    }
    let prefix = s.get(..n_bytes * 2).ok_or(ParseMiss::InvalidHex)?;
    hex::decode(prefix).map_err(|_| ParseMiss::InvalidHex)
}

pub(crate) fn point_from_ewkb_hex(s: &str) -> Result<GeoPoint, ParseMiss> {
    let bytes = decode_hex(s.trim(), POINT_BYTES)?;

    let x = f64::from_le_bytes(bytes[9..17].try_into().map_err(|_| ParseMiss::Truncated)?);
    let y = f64::from_le_bytes(bytes[17..25].try_into().map_err(|_| ParseMiss::Truncated)?);

    GeoPoint::checked(x, y).ok_or(ParseMiss::OutOfRange)
}
