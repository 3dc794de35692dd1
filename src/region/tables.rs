//! Region lookup tables: province names and coarse region bounding boxes.
//!
//! Built once at startup (built-in or from a TOML file) and shared by
//! reference with the resolver.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use hashbrown::HashMap;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{normalize_region_code, DEFAULT_REGION};
use crate::models::{GeoBbox, GeoPoint};

/// Canadian provinces first, smaller boxes ahead of the ones that swallow
/// them (PE inside NS, NB inside QC, Calgary inside BC's east edge).
const CANADA_BOXES: &[(&str, [f64; 4])] = &[
    ("PE", [-64.4, 45.9, -62.0, 47.1]),
    ("NB", [-69.1, 44.6, -63.7, 48.1]),
    ("NS", [-66.3, 43.4, -59.7, 47.0]),
    ("ON", [-95.2, 41.7, -74.3, 56.9]),
    ("QC", [-79.8, 45.0, -57.1, 62.6]),
    ("NL", [-67.8, 46.6, -52.6, 60.4]),
    ("AB", [-120.0, 49.0, -110.0, 60.0]),
    ("SK", [-110.0, 49.0, -101.4, 60.0]),
    ("MB", [-102.0, 49.0, -89.0, 60.0]),
    ("BC", [-139.1, 48.3, -114.0, 60.0]),
    ("YT", [-141.0, 60.0, -123.8, 69.6]),
    ("NT", [-136.5, 60.0, -102.0, 78.8]),
    ("NU", [-120.0, 51.0, -61.0, 83.1]),
];

const US_BOXES: &[(&str, [f64; 4])] = &[
    ("AL", [-88.5, 30.2, -84.9, 35.0]),
    ("AK", [-179.1, 51.2, -129.9, 71.4]),
    ("AZ", [-114.8, 31.3, -109.0, 37.0]),
    ("AR", [-94.6, 33.0, -89.6, 36.5]),
    ("CA", [-124.5, 32.5, -114.1, 42.0]),
    ("CO", [-109.1, 37.0, -102.0, 41.0]),
    ("CT", [-73.7, 41.0, -71.8, 42.1]),
    ("DE", [-75.8, 38.5, -75.0, 39.8]),
    ("FL", [-87.6, 24.4, -80.0, 31.0]),
    ("GA", [-85.6, 30.4, -80.8, 35.0]),
    ("HI", [-160.3, 18.9, -154.8, 22.2]),
    ("ID", [-117.2, 42.0, -111.0, 49.0]),
    ("IL", [-91.5, 37.0, -87.5, 42.5]),
    ("IN", [-88.1, 37.8, -84.8, 41.8]),
    ("IA", [-96.6, 40.4, -90.1, 43.5]),
    ("KS", [-102.1, 37.0, -94.6, 40.0]),
    ("KY", [-89.6, 36.5, -81.9, 39.1]),
    ("LA", [-94.0, 28.9, -88.8, 33.0]),
    ("ME", [-71.1, 43.1, -66.9, 47.5]),
    ("MD", [-79.5, 37.9, -75.0, 39.7]),
    ("MA", [-73.5, 41.2, -69.9, 42.9]),
    ("MI", [-90.4, 41.7, -82.4, 48.3]),
    ("MN", [-97.2, 43.5, -89.5, 49.4]),
    ("MS", [-91.7, 30.2, -88.1, 35.0]),
    ("MO", [-95.8, 36.0, -89.1, 40.6]),
    ("MT", [-116.1, 44.4, -104.0, 49.0]),
    ("NE", [-104.1, 40.0, -95.3, 43.0]),
    ("NV", [-120.0, 35.0, -114.0, 42.0]),
    ("NH", [-72.6, 42.7, -70.6, 45.3]),
    ("NJ", [-75.6, 38.9, -73.9, 41.4]),
    ("NM", [-109.1, 31.3, -103.0, 37.0]),
    ("NY", [-79.8, 40.5, -71.9, 45.0]),
    ("NC", [-84.3, 33.8, -75.5, 36.6]),
    ("ND", [-104.1, 45.9, -96.6, 49.0]),
    ("OH", [-84.8, 38.4, -80.5, 41.9]),
    ("OK", [-103.0, 33.6, -94.4, 37.0]),
    ("OR", [-124.6, 42.0, -116.5, 46.3]),
    ("PA", [-80.5, 39.7, -74.7, 42.3]),
    ("RI", [-71.9, 41.1, -71.1, 42.0]),
    ("SC", [-83.4, 32.0, -78.5, 35.2]),
    ("SD", [-104.1, 42.5, -96.4, 45.9]),
    ("TN", [-90.3, 35.0, -81.6, 36.7]),
    ("TX", [-106.6, 25.8, -93.5, 36.5]),
    ("UT", [-114.1, 37.0, -109.0, 42.0]),
    ("VT", [-73.4, 42.7, -71.5, 45.0]),
    ("VA", [-83.7, 36.5, -75.2, 39.5]),
    ("WA", [-124.8, 45.5, -116.9, 49.0]),
    ("WV", [-82.6, 37.2, -77.7, 40.6]),
    ("WI", [-92.9, 42.5, -86.8, 47.1]),
    ("WY", [-111.1, 41.0, -104.0, 45.0]),
    ("DC", [-77.1, 38.8, -76.9, 39.0]),
];

const CANADA_NAMES: &[(&str, &str)] = &[
    ("alberta", "AB"),
    ("british columbia", "BC"),
    ("colombie-britannique", "BC"),
    ("manitoba", "MB"),
    ("new brunswick", "NB"),
    ("nouveau-brunswick", "NB"),
    ("newfoundland and labrador", "NL"),
    ("newfoundland", "NL"),
    ("terre-neuve-et-labrador", "NL"),
    ("nova scotia", "NS"),
    ("nouvelle-écosse", "NS"),
    ("northwest territories", "NT"),
    ("nunavut", "NU"),
    ("ontario", "ON"),
    ("prince edward island", "PE"),
    ("île-du-prince-édouard", "PE"),
    ("quebec", "QC"),
    ("québec", "QC"),
    ("saskatchewan", "SK"),
    ("yukon", "YT"),
    ("yukon territory", "YT"),
];

/// One coarse region rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionBox {
    pub code: String,
    /// Lowercase ISO country code, e.g. "ca"
    pub country: String,
    /// west, south, east, north
    pub bbox: [f64; 4],
}

impl RegionBox {
    fn new(country: &str, code: &str, bbox: [f64; 4]) -> Self {
        Self {
            code: code.to_string(),
            country: country.to_string(),
            bbox,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        let [west, south, east, north] = self.bbox;
        GeoBbox::new(west, south, east, north).contains(point)
    }
}

/// R-tree entry pointing back at a table position
#[derive(Debug, Clone)]
struct IndexedRegionBox {
    order: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for IndexedRegionBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// On-disk override format. Omitted sections keep the built-in values.
#[derive(Debug, Default, Deserialize)]
struct RegionTableFile {
    default_code: Option<String>,
    names: Option<std::collections::HashMap<String, String>>,
    boxes: Option<Vec<RegionBox>>,
}

/// Immutable region lookup configuration.
pub struct RegionTables {
    default_code: String,
    /// Lowercase region name -> code
    names: HashMap<String, String>,
    /// Boxes in tie-break order
    boxes: Vec<RegionBox>,
    index: RTree<IndexedRegionBox>,
}

impl RegionTables {
    /// Build tables from parts. Invalid or inverted boxes are dropped.
    pub fn new(
        default_code: &str,
        names: impl IntoIterator<Item = (String, String)>,
        boxes: Vec<RegionBox>,
    ) -> Self {
        let default_code =
            normalize_region_code(default_code).unwrap_or_else(|| DEFAULT_REGION.to_string());

        let names: HashMap<String, String> = names
            .into_iter()
            .filter_map(|(name, code)| {
                normalize_region_code(&code).map(|code| (name.trim().to_lowercase(), code))
            })
            .collect();

        let boxes: Vec<RegionBox> = boxes
            .into_iter()
            .filter(|b| {
                let [west, south, east, north] = b.bbox;
                b.bbox.iter().all(|v| v.is_finite()) && west <= east && south <= north
            })
            .collect();

        let indexed: Vec<IndexedRegionBox> = boxes
            .iter()
            .enumerate()
            .map(|(order, b)| {
                let [west, south, east, north] = b.bbox;
                IndexedRegionBox {
                    order,
                    envelope: AABB::from_corners([west, south], [east, north]),
                }
            })
            .collect();

        Self {
            default_code,
            names,
            boxes,
            index: RTree::bulk_load(indexed),
        }
    }

    /// Canada and United States tables, Canada scanned first.
    pub fn builtin() -> Self {
        let boxes = CANADA_BOXES
            .iter()
            .map(|(code, bbox)| RegionBox::new("ca", code, *bbox))
            .chain(
                US_BOXES
                    .iter()
                    .map(|(code, bbox)| RegionBox::new("us", code, *bbox)),
            )
            .collect();
        let names = CANADA_NAMES
            .iter()
            .map(|(name, code)| (name.to_string(), code.to_string()));

        Self::new(DEFAULT_REGION, names, boxes)
    }

    /// Load overrides from a TOML file on top of the built-in tables.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read region table file {}", path.display()))?;
        let file: RegionTableFile =
            toml::from_str(&content).context("Failed to parse region table file")?;

        let builtin = Self::builtin();
        let default_code = file.default_code.unwrap_or(builtin.default_code.clone());
        let names: Vec<(String, String)> = match file.names {
            Some(names) => names.into_iter().collect(),
            None => builtin.names.clone().into_iter().collect(),
        };
        let boxes = file.boxes.unwrap_or(builtin.boxes);

        let tables = Self::new(&default_code, names, boxes);
        info!(
            "Loaded region tables from {}: {} names, {} boxes",
            path.display(),
            tables.names.len(),
            tables.boxes.len()
        );
        Ok(tables)
    }

    /// Replace the default code. Invalid codes leave it unchanged.
    pub fn with_default_code(mut self, code: &str) -> Self {
        if let Some(code) = normalize_region_code(code) {
            self.default_code = code;
        }
        self
    }

    pub fn default_code(&self) -> &str {
        &self.default_code
    }

    pub fn boxes(&self) -> &[RegionBox] {
        &self.boxes
    }

    /// Look up a region code by its full name (case-insensitive).
    pub fn code_for_name(&self, name: &str) -> Option<&str> {
        self.names
            .get(name.trim().to_lowercase().as_str())
            .map(String::as_str)
    }

    /// First box in table order that contains the point.
    pub fn locate(&self, point: &GeoPoint) -> Option<&RegionBox> {
        let query_envelope = AABB::from_point([point.lon, point.lat]);

        // R-tree narrows to intersecting envelopes; table order decides overlaps
        self.index
            .locate_in_envelope_intersecting(&query_envelope)
            .map(|ib| ib.order)
            .min()
            .map(|order| &self.boxes[order])
    }
}

impl Default for RegionTables {
    fn default() -> Self {
        Self::builtin()
    }
}
