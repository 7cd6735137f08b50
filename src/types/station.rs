//! Defines the tide gauge station and the coastal reference points that
//! stations are associated with.

use crate::types::geo::{Geometry, LatLon};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A NOAA water-level station (tide gauge).
///
/// Stations are read once per run from the station list and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// The NOAA station identifier (e.g., "8771450").
    pub id: String,
    /// Display name (e.g., "Galveston Pier 21").
    pub name: String,
    pub location: LatLon,
    /// Region identifier as used in the region map (e.g., "gulf_coast").
    pub region: String,
    pub sub_region: Option<String>,
}

/// A five-digit county FIPS code (two-digit state + three-digit county).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct CountyFips(String);

impl CountyFips {
    /// Parses a county FIPS code, left-padding numeric input with zeros.
    ///
    /// # Examples
    ///
    /// ```
    /// use coastal_htf::CountyFips;
    ///
    /// assert_eq!(CountyFips::parse("1003").unwrap().as_str(), "01003");
    /// assert!(CountyFips::parse("12A45").is_none());
    /// ```
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > 5 || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(Self(format!("{:0>5}", raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two-digit state part of the code.
    pub fn state_fips(&self) -> &str {
        &self.0[..2]
    }
}

impl TryFrom<String> for CountyFips {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("invalid county FIPS code '{raw}'"))
    }
}

impl fmt::Display for CountyFips {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A coastal location (shoreline point or a whole county) to which station
/// influence is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencePoint {
    /// Unique identifier of the point. For county-level runs this is the FIPS code.
    pub id: String,
    pub county_fips: CountyFips,
    pub county_name: String,
    pub state_fips: String,
    pub region: String,
    pub sub_region: Option<String>,
    pub geometry: Geometry,
}

impl ReferencePoint {
    /// Builds a reference point that stands for a whole county.
    pub fn county(
        county_fips: CountyFips,
        county_name: impl Into<String>,
        region: impl Into<String>,
        geometry: Geometry,
    ) -> Self {
        Self {
            id: county_fips.to_string(),
            state_fips: county_fips.state_fips().to_string(),
            county_fips,
            county_name: county_name.into(),
            region: region.into(),
            sub_region: None,
            geometry,
        }
    }

    pub fn location(&self) -> Option<LatLon> {
        self.geometry.representative_point()
    }
}
