//! Memory-bounded aggregation over fixed-size station batches.

use crate::aggregation::error::AggregationError;
use crate::aggregation::frame::StationYearFrame;
use crate::aggregation::{
    finalize, warn_missing_stations, AggregationOutcome, CountyAggregator, PartialAggregate,
    PartitionFailure, PartitionKey,
};
use crate::association::table::AssociationTable;
use crate::types::records::FULL_YEAR_MISSING_DAYS;
use log::{debug, info};
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Joins each batch of stations with its county weights and reduces it to
/// per-(county, year) partial sums; only the partial sums outlive a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkedAggregator {
    chunk_size: usize,
    /// Batches containing this station panic.
    #[cfg(test)]
    fail_station: Option<&'static str>,
}

impl ChunkedAggregator {
    pub fn new(chunk_size: usize) -> Result<Self, AggregationError> {
        if chunk_size == 0 {
            return Err(AggregationError::InvalidSetting(
                "chunk size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            chunk_size,
            #[cfg(test)]
            fail_station: None,
        })
    }

    #[cfg(test)]
    fn failing_at(self, station: &'static str) -> Self {
        Self {
            fail_station: Some(station),
            ..self
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Partial sums of one station batch, grouped by county and year.
    fn aggregate_batch(
        input: &StationYearFrame,
        weights: DataFrame,
    ) -> Result<DataFrame, PolarsError> {
        // Null, NaN or infinite flood days and fully missing years are absent.
        let present = col("flood_days")
            .is_not_null()
            .and(col("flood_days").is_finite())
            .and(col("missing_days").lt(lit(FULL_YEAR_MISSING_DAYS)));
        let when_present = |value: Expr| {
            when(present.clone())
                .then(value)
                .otherwise(lit(0.0))
        };

        input
            .lazy()
            .join(
                weights.lazy(),
                [col("station_id")],
                [col("station_id")],
                JoinArgs::new(JoinType::Inner),
            )
            .with_columns([
                when_present(col("weight")).alias("effective_weight"),
                when_present(col("flood_days") * col("weight")).alias("flood_term"),
                when_present(col("missing_days") * col("weight")).alias("missing_term"),
            ])
            .group_by([col("county_fips"), col("year")])
            .agg([
                col("flood_term").sum().alias("weighted_flood"),
                col("missing_term").sum().alias("weighted_missing"),
                col("effective_weight").sum().alias("weight"),
                col("effective_weight")
                    .gt(lit(0.0))
                    .cast(DataType::Int64)
                    .sum()
                    .alias("stations"),
            ])
            .collect()
    }

    /// Re-aggregates the per-batch partial sums into one row per (county, year).
    fn combine(partials: Vec<DataFrame>) -> Result<Vec<PartialAggregate>, AggregationError> {
        if partials.is_empty() {
            return Ok(vec![]);
        }
        let frames: Vec<LazyFrame> = partials.into_iter().map(|df| df.lazy()).collect();
        let combined = concat(frames, UnionArgs::default())?
            .group_by([col("county_fips"), col("year")])
            .agg([
                col("weighted_flood").sum(),
                col("weighted_missing").sum(),
                col("weight").sum(),
                col("stations").sum(),
            ])
            .collect()?;

        let county = combined.column("county_fips")?.str()?;
        let year = combined.column("year")?.i32()?;
        let weighted_flood = combined.column("weighted_flood")?.f64()?;
        let weighted_missing = combined.column("weighted_missing")?.f64()?;
        let weight = combined.column("weight")?.f64()?;
        let stations = combined.column("stations")?.cast(&DataType::Int64)?;
        let stations = stations.i64()?;

        Ok((0..combined.height())
            .filter_map(|i| {
                Some(PartialAggregate {
                    county_fips: county.get(i)?.to_string(),
                    year: year.get(i)?,
                    weighted_flood: weighted_flood.get(i).unwrap_or(0.0),
                    weighted_missing: weighted_missing.get(i).unwrap_or(0.0),
                    weight: weight.get(i).unwrap_or(0.0),
                    stations: stations.get(i).unwrap_or(0).max(0) as u32,
                })
            })
            .collect())
    }
}

/// `(county_fips, station_id, weight)` rows restricted to `batch`.
fn batch_weights(
    county_weights: &BTreeMap<String, Vec<(String, f64)>>,
    batch: &[String],
) -> Result<DataFrame, PolarsError> {
    let mut fips = Vec::new();
    let mut stations = Vec::new();
    let mut weights = Vec::new();
    for station_id in batch {
        if let Some(entries) = county_weights.get(station_id) {
            for (county, weight) in entries {
                fips.push(county.as_str());
                stations.push(station_id.as_str());
                weights.push(*weight);
            }
        }
    }
    DataFrame::new(vec![
        Column::new("county_fips".into(), fips),
        Column::new("station_id".into(), stations),
        Column::new("weight".into(), weights),
    ])
}

/// Counties that draw weight from any station of `batch`.
///
/// A failed batch leaves these counties with partial sums, so they are
/// dropped from the result.
fn batch_counties(
    county_weights: &BTreeMap<String, Vec<(String, f64)>>,
    batch: &[String],
) -> BTreeSet<String> {
    batch
        .iter()
        .filter_map(|station_id| county_weights.get(station_id))
        .flatten()
        .map(|(county, _)| county.clone())
        .collect()
}

impl CountyAggregator for ChunkedAggregator {
    fn name(&self) -> &'static str {
        "chunked"
    }

    fn aggregate(
        &self,
        table: &AssociationTable,
        input: &StationYearFrame,
    ) -> Result<AggregationOutcome, AggregationError> {
        let overview = input.overview()?;
        overview.log();
        warn_missing_stations(table, &overview.station_ids);

        // Station → [(county, summed county weight)]
        let mut by_station: BTreeMap<String, Vec<(String, f64)>> = BTreeMap::new();
        for (county, station_weights) in table.county_station_weights() {
            for (station_id, weight) in station_weights {
                by_station
                    .entry(station_id)
                    .or_default()
                    .push((county.to_string(), weight));
            }
        }
        let stations: Vec<String> = by_station.keys().cloned().collect();
        let n_batches = stations.len().div_ceil(self.chunk_size);
        info!(
            "Aggregating {} stations in {} batches of up to {}",
            stations.len(),
            n_batches,
            self.chunk_size
        );

        let mut partials = Vec::with_capacity(n_batches);
        let mut failures = Vec::new();
        let mut excluded = BTreeSet::new();
        for (index, batch) in stations.chunks(self.chunk_size).enumerate() {
            let key = PartitionKey::StationBatch {
                index,
                first_station: batch.first().cloned().unwrap_or_default(),
            };
            let result = catch_unwind(AssertUnwindSafe(|| {
                #[cfg(test)]
                if let Some(station) = self.fail_station {
                    if batch.iter().any(|id| id == station) {
                        panic!("station {station} is corrupt");
                    }
                }
                let weights = batch_weights(&by_station, batch)?;
                Self::aggregate_batch(input, weights)
            }));
            match result {
                Ok(Ok(df)) => {
                    debug!("Batch {} produced {} county-year partial rows", index, df.height());
                    partials.push(df);
                }
                Ok(Err(e)) => {
                    failures.push(PartitionFailure::new(key, e.to_string()));
                    excluded.extend(batch_counties(&by_station, batch));
                }
                Err(payload) => {
                    failures.push(PartitionFailure::from_panic(key, payload));
                    excluded.extend(batch_counties(&by_station, batch));
                }
            }
        }

        let combined = Self::combine(partials)?;
        Ok(finalize(
            combined,
            table,
            &overview.years,
            &excluded,
            failures,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_support::{row, table};
    use crate::types::records::StationYearRecord;

    fn find(outcome: &AggregationOutcome, fips: &str, year: i32) -> Option<f64> {
        outcome
            .aggregates
            .iter()
            .find(|a| a.county_fips == fips && a.year == year)
            .and_then(|a| a.flood_days)
    }

    #[test]
    fn test_rejects_zero_chunk_size() {
        assert!(ChunkedAggregator::new(0).is_err());
    }

    #[test]
    fn test_single_station_counties() {
        let t = table(vec![
            row("48167", &[("a", 500.0, 1.0)]),
            row("48071", &[("b", 1500.0, 1.0)]),
        ]);
        let input = StationYearFrame::from_records(&[
            StationYearRecord::new("a", 2020, 4.0, 0.0),
            StationYearRecord::new("b", 2020, 10.0, 0.0),
        ])
        .unwrap();
        let outcome = ChunkedAggregator::new(1).unwrap().aggregate(&t, &input).unwrap();
        assert_eq!(find(&outcome, "48167", 2020), Some(4.0));
        assert_eq!(find(&outcome, "48071", 2020), Some(10.0));
        assert!(!outcome.is_degraded());
    }

    #[test]
    fn test_two_station_weighted_average() {
        let t = table(vec![row("48167", &[("a", 1000.0, 0.8), ("b", 2000.0, 0.2)])]);
        let input = StationYearFrame::from_records(&[
            StationYearRecord::new("a", 1975, 10.0, 0.0),
            StationYearRecord::new("b", 1975, 0.0, 0.0),
        ])
        .unwrap();
        // Stations land in different batches; the final pass must combine them.
        let outcome = ChunkedAggregator::new(1).unwrap().aggregate(&t, &input).unwrap();
        let value = find(&outcome, "48167", 1975).unwrap();
        assert!((value - 8.0).abs() < 1e-9);
        assert_eq!(outcome.aggregates[0].n_stations, 2);
    }

    #[test]
    fn test_uninstalled_station_does_not_dilute() {
        let t = table(vec![row("48167", &[("a", 1000.0, 0.8), ("b", 2000.0, 0.2)])]);
        let input = StationYearFrame::from_records(&[
            StationYearRecord::new("a", 1950, 0.0, FULL_YEAR_MISSING_DAYS),
            StationYearRecord::new("b", 1950, 5.0, 0.0),
        ])
        .unwrap();
        let outcome = ChunkedAggregator::new(10).unwrap().aggregate(&t, &input).unwrap();
        assert_eq!(find(&outcome, "48167", 1950), Some(5.0));
        assert_eq!(outcome.aggregates[0].n_stations, 1);
    }

    #[test]
    fn test_non_finite_flood_days_are_absent() {
        let t = table(vec![row("48167", &[("a", 1000.0, 0.8), ("b", 2000.0, 0.2)])]);
        let input = StationYearFrame::from_records(&[
            StationYearRecord::new("a", 1975, f64::NAN, 0.0),
            StationYearRecord::new("b", 1975, 5.0, 0.0),
            StationYearRecord::new("a", 1976, f64::INFINITY, 0.0),
            StationYearRecord::new("b", 1976, 2.0, 10.0),
        ])
        .unwrap();
        let outcome = ChunkedAggregator::new(10).unwrap().aggregate(&t, &input).unwrap();
        assert_eq!(find(&outcome, "48167", 1975), Some(5.0));
        assert_eq!(find(&outcome, "48167", 1976), Some(2.0));
        assert!(outcome.aggregates.iter().all(|a| a.n_stations == 1));
        assert_eq!(outcome.aggregates[1].missing_days, Some(10.0));
    }

    #[test]
    fn test_failed_batch_excludes_its_counties() {
        let t = table(vec![
            row("48167", &[("a", 1000.0, 0.8), ("b", 2000.0, 0.2)]),
            row("48071", &[("b", 1500.0, 1.0)]),
            row("48061", &[("c", 900.0, 1.0)]),
        ]);
        let input = StationYearFrame::from_records(&[
            StationYearRecord::new("a", 2020, 4.0, 0.0),
            StationYearRecord::new("b", 2020, 6.0, 0.0),
            StationYearRecord::new("c", 2020, 1.0, 0.0),
        ])
        .unwrap();
        let outcome = ChunkedAggregator::new(1)
            .unwrap()
            .failing_at("b")
            .aggregate(&t, &input)
            .unwrap();

        assert!(outcome.is_degraded());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(
            outcome.failures[0].partition,
            PartitionKey::StationBatch {
                index: 1,
                first_station: "b".to_string()
            }
        );
        assert!(outcome.failures[0].message.contains("station b"));
        // Both counties using station b are gone, not left with a's value alone.
        assert_eq!(outcome.aggregates.len(), 1);
        assert_eq!(find(&outcome, "48061", 2020), Some(1.0));
        assert_eq!(find(&outcome, "48167", 2020), None);
    }

    #[test]
    fn test_county_without_stations_has_no_data() {
        let t = table(vec![
            row("48167", &[("a", 1000.0, 1.0)]),
            row("48061", &[]),
        ]);
        let input =
            StationYearFrame::from_records(&[StationYearRecord::new("a", 2020, 0.0, 0.0)]).unwrap();
        let outcome = ChunkedAggregator::new(100).unwrap().aggregate(&t, &input).unwrap();
        assert_eq!(outcome.aggregates.len(), 2);
        assert_eq!(find(&outcome, "48167", 2020), Some(0.0));
        assert_eq!(find(&outcome, "48061", 2020), None);
        assert_eq!(outcome.county_years_without_data, 1);
    }
}
