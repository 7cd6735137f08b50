//! Annual station records consumed by the aggregation engine and the
//! county-year aggregates it produces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Missing-day count that marks a whole year without observations
/// (conventionally: the station was not yet installed).
pub const FULL_YEAR_MISSING_DAYS: f64 = 365.0;

/// Annual minor high tide flooding count for one station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationYearRecord {
    pub station_id: String,
    pub year: i32,
    /// Minor-severity flood days. `None` means no value was reported.
    pub flood_days: Option<f64>,
    /// Days of the year without a valid observation.
    pub missing_days: f64,
}

impl StationYearRecord {
    pub fn new(station_id: impl Into<String>, year: i32, flood_days: f64, missing_days: f64) -> Self {
        Self {
            station_id: station_id.into(),
            year,
            flood_days: Some(flood_days),
            missing_days,
        }
    }

    /// The flood-day value if this record is a real observation.
    ///
    /// A recorded zero is valid data; only a null value or a year that is
    /// entirely missing counts as absent.
    pub fn observed_flood_days(&self) -> Option<f64> {
        if !(self.missing_days < FULL_YEAR_MISSING_DAYS) {
            return None;
        }
        self.flood_days.filter(|v| v.is_finite())
    }
}

/// Sea level rise scenarios of the NOAA decadal high tide flooding projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scenario {
    Low,
    IntermediateLow,
    Intermediate,
    IntermediateHigh,
    High,
}

impl Scenario {
    pub const ALL: [Scenario; 5] = [
        Scenario::Low,
        Scenario::IntermediateLow,
        Scenario::Intermediate,
        Scenario::IntermediateHigh,
        Scenario::High,
    ];

    pub fn column_name(&self) -> &'static str {
        match self {
            Scenario::Low => "low_scenario",
            Scenario::IntermediateLow => "intermediate_low_scenario",
            Scenario::Intermediate => "intermediate_scenario",
            Scenario::IntermediateHigh => "intermediate_high_scenario",
            Scenario::High => "high_scenario",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.column_name())
    }
}

/// Projected flood days for one station and decade, one value per scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedDecadeRecord {
    pub station_id: String,
    /// First year of the decade (e.g., 2050).
    pub decade: i32,
    pub low: Option<f64>,
    pub intermediate_low: Option<f64>,
    pub intermediate: Option<f64>,
    pub intermediate_high: Option<f64>,
    pub high: Option<f64>,
}

impl ProjectedDecadeRecord {
    pub fn value(&self, scenario: Scenario) -> Option<f64> {
        match scenario {
            Scenario::Low => self.low,
            Scenario::IntermediateLow => self.intermediate_low,
            Scenario::Intermediate => self.intermediate,
            Scenario::IntermediateHigh => self.intermediate_high,
            Scenario::High => self.high,
        }
    }
}

/// Expands decadal projections into one record per year for `scenario`.
///
/// Every year of the decade carries the decade's value. Projections have no
/// notion of unobserved days, so `missing_days` is zero.
pub fn expand_decades(records: &[ProjectedDecadeRecord], scenario: Scenario) -> Vec<StationYearRecord> {
    records
        .iter()
        .flat_map(|record| {
            (record.decade..record.decade + 10).map(move |year| StationYearRecord {
                station_id: record.station_id.clone(),
                year,
                flood_days: record.value(scenario),
                missing_days: 0.0,
            })
        })
        .collect()
}

/// Weighted flood statistics for one county and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountyYearAggregate {
    pub county_fips: String,
    pub year: i32,
    pub region: String,
    /// Weighted mean flood days; `None` when no station had data that year.
    pub flood_days: Option<f64>,
    /// Weighted mean missing days over the stations that had data.
    pub missing_days: Option<f64>,
    /// Stations that contributed an observation.
    pub n_stations: u32,
    /// Reference points belonging to the county.
    pub n_reference_points: u32,
    /// Fraction of the year covered by valid observations, in `[0, 1]`.
    pub completeness: f64,
}

impl CountyYearAggregate {
    pub fn has_data(&self) -> bool {
        self.flood_days.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_flood_days_is_observed() {
        let record = StationYearRecord::new("8771450", 1975, 0.0, 12.0);
        assert_eq!(record.observed_flood_days(), Some(0.0));
    }

    #[test]
    fn test_uninstalled_year_is_absent() {
        let record = StationYearRecord::new("8771450", 1920, 0.0, FULL_YEAR_MISSING_DAYS);
        assert_eq!(record.observed_flood_days(), None);

        let null = StationYearRecord {
            station_id: "8771450".to_string(),
            year: 1975,
            flood_days: None,
            missing_days: 0.0,
        };
        assert_eq!(null.observed_flood_days(), None);
    }

    #[test]
    fn test_expand_decades() {
        let records = vec![ProjectedDecadeRecord {
            station_id: "9414290".to_string(),
            decade: 2050,
            low: Some(3.0),
            intermediate_low: Some(5.0),
            intermediate: Some(12.0),
            intermediate_high: None,
            high: Some(80.0),
        }];

        let yearly = expand_decades(&records, Scenario::Intermediate);
        assert_eq!(yearly.len(), 10);
        assert_eq!(yearly.first().map(|r| r.year), Some(2050));
        assert_eq!(yearly.last().map(|r| r.year), Some(2059));
        assert!(yearly.iter().all(|r| r.flood_days == Some(12.0)));

        let missing = expand_decades(&records, Scenario::IntermediateHigh);
        assert!(missing.iter().all(|r| r.observed_flood_days().is_none()));
    }
}
