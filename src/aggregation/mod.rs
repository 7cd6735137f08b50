//! County-year weighted aggregation of station-year records.
//!
//! Two interchangeable engines implement [`CountyAggregator`]:
//! [`chunked::ChunkedAggregator`] bounds memory by processing a fixed number
//! of stations at a time, [`parallel::ParallelAggregator`] computes each
//! county independently on a worker pool. Both produce partial weighted sums
//! that [`finalize`] turns into the complete county × year grid.

pub mod chunked;
pub mod error;
pub mod frame;
pub mod output;
pub mod parallel;
pub mod validate;

use crate::aggregation::chunked::ChunkedAggregator;
use crate::aggregation::error::AggregationError;
use crate::aggregation::frame::StationYearFrame;
use crate::aggregation::parallel::ParallelAggregator;
use crate::association::table::AssociationTable;
use crate::types::records::{CountyYearAggregate, FULL_YEAR_MISSING_DAYS};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Weighted sums for one county and year before division.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialAggregate {
    pub county_fips: String,
    pub year: i32,
    /// Σ(flood_days × weight) over present observations.
    pub weighted_flood: f64,
    /// Σ(missing_days × weight) over present observations.
    pub weighted_missing: f64,
    /// Σ(weight) over present observations.
    pub weight: f64,
    pub stations: u32,
}

impl PartialAggregate {
    pub fn merge(&mut self, other: &PartialAggregate) {
        self.weighted_flood += other.weighted_flood;
        self.weighted_missing += other.weighted_missing;
        self.weight += other.weight;
        self.stations += other.stations;
    }
}

/// Σ(v·w) / Σ(w), or `None` when no weight was available.
pub fn weighted_mean(weighted_sum: f64, weight: f64) -> Option<f64> {
    if weight > 0.0 {
        Some(weighted_sum / weight)
    } else {
        None
    }
}

/// Unit of work that failed and was excluded from the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionKey {
    County(String),
    StationBatch { index: usize, first_station: String },
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::County(fips) => write!(f, "county {}", fips),
            PartitionKey::StationBatch {
                index,
                first_station,
            } => write!(f, "station batch {} (starting at {})", index, first_station),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub partition: PartitionKey,
    pub message: String,
}

impl PartitionFailure {
    pub fn new(partition: PartitionKey, message: impl Into<String>) -> Self {
        let failure = Self {
            partition,
            message: message.into(),
        };
        warn!("Aggregation of {} failed: {}", failure.partition, failure.message);
        failure
    }

    /// Message of a caught panic payload.
    pub fn from_panic(partition: PartitionKey, payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker panicked".to_string()
        };
        Self::new(partition, message)
    }
}

/// Result of one aggregation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationOutcome {
    /// One row per (county, year), sorted by county then year.
    pub aggregates: Vec<CountyYearAggregate>,
    pub failures: Vec<PartitionFailure>,
    pub county_years_without_data: usize,
}

impl AggregationOutcome {
    /// Output is complete only if no partition failed.
    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A county-year aggregation engine.
pub trait CountyAggregator: Send + Sync {
    fn name(&self) -> &'static str;

    /// Aggregates `input` onto the counties of `table`.
    ///
    /// Failures of single partitions are reported in the outcome; only
    /// structural problems return an error.
    fn aggregate(
        &self,
        table: &AssociationTable,
        input: &StationYearFrame,
    ) -> Result<AggregationOutcome, AggregationError>;
}

/// Which engine to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationStrategy {
    Chunked { chunk_size: usize },
    Parallel { workers: usize },
}

impl AggregationStrategy {
    pub fn aggregator(&self) -> Result<Box<dyn CountyAggregator>, AggregationError> {
        match *self {
            AggregationStrategy::Chunked { chunk_size } => {
                Ok(Box::new(ChunkedAggregator::new(chunk_size)?))
            }
            AggregationStrategy::Parallel { workers } => {
                Ok(Box::new(ParallelAggregator::new(workers)?))
            }
        }
    }
}

/// Fraction of the year covered by valid observations.
pub fn completeness(missing_days: Option<f64>) -> f64 {
    match missing_days {
        Some(missing) => ((FULL_YEAR_MISSING_DAYS - missing) / FULL_YEAR_MISSING_DAYS).clamp(0.0, 1.0),
        None => 0.0,
    }
}

/// Builds the county × year grid from partial sums.
///
/// Every county of `table` that is not in `excluded` gets a row for each of
/// `years`. County-years without a partial sum, or with zero weight, have no
/// flood-day value.
pub fn finalize(
    partials: Vec<PartialAggregate>,
    table: &AssociationTable,
    years: &[i32],
    excluded: &BTreeSet<String>,
    failures: Vec<PartitionFailure>,
) -> AggregationOutcome {
    let mut combined: HashMap<(String, i32), PartialAggregate> = HashMap::new();
    for partial in partials {
        combined
            .entry((partial.county_fips.clone(), partial.year))
            .and_modify(|existing| existing.merge(&partial))
            .or_insert(partial);
    }

    let mut aggregates = Vec::new();
    let mut without_data: Vec<(String, i32)> = Vec::new();
    for (county, info) in table.counties() {
        if excluded.contains(county.as_str()) {
            continue;
        }
        for &year in years {
            let partial = combined.get(&(county.to_string(), year));
            let weight = partial.map(|p| p.weight).unwrap_or(0.0);
            let flood_days = partial.and_then(|p| weighted_mean(p.weighted_flood, weight));
            let missing_days = partial.and_then(|p| weighted_mean(p.weighted_missing, weight));
            if flood_days.is_none() {
                without_data.push((county.to_string(), year));
            }
            aggregates.push(CountyYearAggregate {
                county_fips: county.to_string(),
                year,
                region: info.region.clone(),
                flood_days,
                missing_days,
                n_stations: if flood_days.is_some() {
                    partial.map(|p| p.stations).unwrap_or(0)
                } else {
                    0
                },
                n_reference_points: info.n_reference_points,
                completeness: completeness(missing_days),
            });
        }
    }

    if !without_data.is_empty() {
        warn!(
            "{} county-years have no station data (total weight 0), e.g. {}",
            without_data.len(),
            without_data
                .iter()
                .take(5)
                .map(|(fips, year)| format!("{fips}/{year}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    if !failures.is_empty() {
        warn!(
            "{} partitions failed and were excluded: {}",
            failures.len(),
            failures
                .iter()
                .map(|f| f.partition.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        );
    }

    AggregationOutcome {
        aggregates,
        failures,
        county_years_without_data: without_data.len(),
    }
}

/// Warns about associated stations missing from the input (first five listed).
pub fn warn_missing_stations(table: &AssociationTable, available: &BTreeSet<String>) {
    let missing: Vec<String> = table
        .station_ids()
        .into_iter()
        .filter(|id| !available.contains(id))
        .collect();
    if !missing.is_empty() {
        warn!(
            "{} associated stations have no station-year records: {}{}",
            missing.len(),
            missing.iter().take(5).cloned().collect::<Vec<_>>().join(", "),
            if missing.len() > 5 { ", ..." } else { "" }
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::association::table::{AssignedStation, AssociationRow, AssociationTable};
    use crate::types::geo::{Geometry, LatLon};
    use crate::types::station::CountyFips;

    pub fn row(fips: &str, stations: &[(&str, f64, f64)]) -> AssociationRow {
        AssociationRow {
            reference_id: fips.to_string(),
            county_fips: CountyFips::parse(fips).unwrap(),
            county_name: format!("County {fips}"),
            state_fips: fips[..2].to_string(),
            region: "gulf_coast".to_string(),
            sub_region: None,
            geometry: Geometry::Point(LatLon(29.3, -94.8)),
            stations: stations
                .iter()
                .map(|(id, distance_m, weight)| AssignedStation {
                    station_id: id.to_string(),
                    station_name: id.to_string(),
                    distance_m: *distance_m,
                    weight: *weight,
                })
                .collect(),
        }
    }

    pub fn table(rows: Vec<AssociationRow>) -> AssociationTable {
        AssociationTable::new(3, rows)
    }
}
