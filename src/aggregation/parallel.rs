//! Per-county aggregation on a fixed-size worker pool.

use crate::aggregation::error::AggregationError;
use crate::aggregation::frame::StationYearFrame;
use crate::aggregation::{
    finalize, warn_missing_stations, AggregationOutcome, CountyAggregator, PartialAggregate,
    PartitionFailure, PartitionKey,
};
use crate::association::table::AssociationTable;
use crate::types::records::StationYearRecord;
use log::info;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Read-only station-year lookup shared by all county tasks.
type RecordIndex = Arc<HashMap<String, Vec<StationYearRecord>>>;

/// Immutable description of one county's work.
#[derive(Debug, Clone, PartialEq)]
pub struct CountyTask {
    pub county_fips: String,
    /// Station weights summed over the county's reference points.
    pub weights: Vec<(String, f64)>,
}

impl CountyTask {
    /// Weighted partial sums per year for this county.
    pub fn run(&self, records: &HashMap<String, Vec<StationYearRecord>>) -> Vec<PartialAggregate> {
        let mut by_year: BTreeMap<i32, PartialAggregate> = BTreeMap::new();
        for (station_id, weight) in &self.weights {
            let Some(station_records) = records.get(station_id) else {
                continue;
            };
            for record in station_records {
                let Some(flood_days) = record.observed_flood_days() else {
                    continue;
                };
                let partial = by_year.entry(record.year).or_insert_with(|| PartialAggregate {
                    county_fips: self.county_fips.clone(),
                    year: record.year,
                    weighted_flood: 0.0,
                    weighted_missing: 0.0,
                    weight: 0.0,
                    stations: 0,
                });
                partial.weighted_flood += flood_days * weight;
                partial.weighted_missing += record.missing_days * weight;
                partial.weight += weight;
                partial.stations += 1;
            }
        }
        by_year.into_values().collect()
    }
}

/// Computes every county independently; a failing county is excluded
/// without affecting the others.
pub struct ParallelAggregator {
    workers: usize,
    pool: rayon::ThreadPool,
    /// Tasks for this county panic.
    #[cfg(test)]
    fail_county: Option<&'static str>,
}

impl ParallelAggregator {
    pub fn new(workers: usize) -> Result<Self, AggregationError> {
        if workers == 0 {
            return Err(AggregationError::InvalidSetting(
                "worker count must be at least 1".to_string(),
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("htf-aggregate-{i}"))
            .build()
            .map_err(|source| AggregationError::ThreadPool { workers, source })?;
        Ok(Self {
            workers,
            pool,
            #[cfg(test)]
            fail_county: None,
        })
    }

    #[cfg(test)]
    fn failing_at(self, county: &'static str) -> Self {
        Self {
            fail_county: Some(county),
            ..self
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn run_tasks(
        &self,
        tasks: Vec<CountyTask>,
        records: RecordIndex,
    ) -> Vec<(String, std::thread::Result<Vec<PartialAggregate>>)> {
        self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    let records = Arc::clone(&records);
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        #[cfg(test)]
                        if self.fail_county == Some(task.county_fips.as_str()) {
                            panic!("county {} is corrupt", task.county_fips);
                        }
                        task.run(&records)
                    }));
                    (task.county_fips, result)
                })
                .collect()
        })
    }
}

impl CountyAggregator for ParallelAggregator {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn aggregate(
        &self,
        table: &AssociationTable,
        input: &StationYearFrame,
    ) -> Result<AggregationOutcome, AggregationError> {
        let overview = input.overview()?;
        overview.log();
        warn_missing_stations(table, &overview.station_ids);

        let associated: BTreeSet<String> = table.station_ids().into_iter().collect();
        let mut index: HashMap<String, Vec<StationYearRecord>> = HashMap::new();
        for record in input.collect_records()? {
            if associated.contains(&record.station_id) {
                index.entry(record.station_id.clone()).or_default().push(record);
            }
        }
        let records: RecordIndex = Arc::new(index);

        let tasks: Vec<CountyTask> = table
            .county_station_weights()
            .into_iter()
            .map(|(county, weights)| CountyTask {
                county_fips: county.to_string(),
                weights: weights.into_iter().collect(),
            })
            .collect();
        info!(
            "Aggregating {} counties on {} workers",
            tasks.len(),
            self.workers
        );

        let mut partials = Vec::new();
        let mut failures = Vec::new();
        let mut excluded = BTreeSet::new();
        for (county, result) in self.run_tasks(tasks, records) {
            match result {
                Ok(county_partials) => partials.extend(county_partials),
                Err(payload) => {
                    failures.push(PartitionFailure::from_panic(
                        PartitionKey::County(county.clone()),
                        payload,
                    ));
                    excluded.insert(county);
                }
            }
        }

        Ok(finalize(partials, table, &overview.years, &excluded, failures))
    }
}
