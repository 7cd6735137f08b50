//! Region definitions loaded from the region map.

use crate::types::geo::Bounds;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Parameters of an Albers equal-area conic projection, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlbersParams {
    /// First standard parallel.
    pub lat_1: f64,
    /// Second standard parallel.
    pub lat_2: f64,
    /// Latitude of origin.
    pub lat_0: f64,
    /// Central meridian.
    pub lon_0: f64,
}

/// Projection hint attached to a region in the region map.
///
/// Either the name of a well-known definition (`alaska`, `hawaii`, ...) or
/// explicit Albers parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProjectionHint {
    WellKnown(String),
    Albers(AlbersParams),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDefinition {
    /// Display name (e.g., "Gulf Coast").
    pub name: String,
    /// Two-digit state FIPS codes belonging to the region.
    #[serde(default)]
    pub state_codes: Vec<String>,
    pub bounds: Bounds,
    #[serde(default)]
    pub projection: Option<ProjectionHint>,
}

/// All configured regions, keyed by region identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegionMap {
    pub regions: BTreeMap<String, RegionDefinition>,
}

impl RegionMap {
    pub fn get(&self, region: &str) -> Option<&RegionDefinition> {
        self.regions.get(region)
    }

    pub fn contains(&self, region: &str) -> bool {
        self.regions.contains_key(region)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(String::as_str)
    }

    /// Region display name, or a title-cased version of the id when unknown.
    pub fn display_name(&self, region: &str) -> String {
        match self.regions.get(region) {
            Some(def) => def.name.clone(),
            None => region
                .split('_')
                .map(|word| {
                    let mut chars = word.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<String>>()
                .join(" "),
        }
    }
}
