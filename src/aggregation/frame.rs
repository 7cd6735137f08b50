//! Lazy station-year input for the aggregation engine.

use crate::aggregation::error::AggregationError;
use crate::types::records::{
    expand_decades, ProjectedDecadeRecord, Scenario, StationYearRecord, FULL_YEAR_MISSING_DAYS,
};
use log::info;
use polars::prelude::*;
use std::collections::BTreeSet;
use std::path::Path;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Station-year records in a normalized polars schema:
/// `station_id: String`, `year: Int32`, `flood_days: Float64` (nullable),
/// `missing_days: Float64`.
///
/// Carries a fingerprint of its content so downstream stages can tell when
/// their inputs changed.
#[derive(Clone)]
pub struct StationYearFrame {
    frame: LazyFrame,
    fingerprint: u64,
}

/// Counts logged before aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataOverview {
    pub records: usize,
    /// Records with a genuine zero flood-day value.
    pub zero_flood_records: usize,
    /// Records of a station-year without any observation.
    pub uninstalled_records: usize,
    pub years: Vec<i32>,
    pub station_ids: BTreeSet<String>,
}

impl StationYearFrame {
    pub fn from_records(records: &[StationYearRecord]) -> Result<Self, AggregationError> {
        let mut hasher = Xxh3::new();
        for r in records {
            hasher.update(r.station_id.as_bytes());
            hasher.update(&[0]);
            hasher.update(&r.year.to_le_bytes());
            match r.flood_days {
                Some(v) => hasher.update(&v.to_le_bytes()),
                None => hasher.update(&[0xff; 8]),
            }
            hasher.update(&r.missing_days.to_le_bytes());
        }

        let df = DataFrame::new(vec![
            Column::new(
                "station_id".into(),
                records.iter().map(|r| r.station_id.as_str()).collect::<Vec<_>>(),
            ),
            Column::new("year".into(), records.iter().map(|r| r.year).collect::<Vec<_>>()),
            Column::new(
                "flood_days".into(),
                records.iter().map(|r| r.flood_days).collect::<Vec<_>>(),
            ),
            Column::new(
                "missing_days".into(),
                records.iter().map(|r| r.missing_days).collect::<Vec<_>>(),
            ),
        ])?;

        Ok(Self {
            frame: normalize(df.lazy()),
            fingerprint: hasher.digest(),
        })
    }

    /// Yearly input for one projection scenario.
    pub fn from_projections(
        records: &[ProjectedDecadeRecord],
        scenario: Scenario,
    ) -> Result<Self, AggregationError> {
        Self::from_records(&expand_decades(records, scenario))
    }

    /// Lazily scans a parquet file. The fingerprint is the hash of the file bytes.
    pub fn scan_parquet(path: &Path) -> Result<Self, AggregationError> {
        let bytes =
            std::fs::read(path).map_err(|e| AggregationError::InputRead(path.to_path_buf(), e))?;
        let frame = LazyFrame::scan_parquet(path, Default::default())
            .map_err(|e| AggregationError::ParquetScan(path.to_path_buf(), e))?;
        Ok(Self {
            frame: normalize(frame),
            fingerprint: xxh3_64(&bytes),
        })
    }

    /// Wraps an existing frame. Columns are cast to the normalized schema.
    pub fn from_frame(df: DataFrame) -> Result<Self, AggregationError> {
        let mut hasher = Xxh3::new();
        let mut df = df;
        df.as_single_chunk_par();
        for column in ["station_id", "year", "flood_days", "missing_days"] {
            let series = df
                .column(column)
                .map_err(|e| AggregationError::ColumnNotFound(column.to_string(), e))?
                .as_materialized_series();
            for value in series.iter() {
                hasher.update(value.to_string().as_bytes());
                hasher.update(&[0]);
            }
        }
        Ok(Self {
            frame: normalize(df.lazy()),
            fingerprint: hasher.digest(),
        })
    }

    /// Keeps only years at or after `start_year`.
    pub fn with_start_year(self, start_year: i32) -> Self {
        let mut hasher = Xxh3::new();
        hasher.update(&self.fingerprint.to_le_bytes());
        hasher.update(&start_year.to_le_bytes());
        Self {
            frame: self.frame.filter(col("year").gt_eq(lit(start_year))),
            fingerprint: hasher.digest(),
        }
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn lazy(&self) -> LazyFrame {
        self.frame.clone()
    }

    pub fn collect_records(&self) -> Result<Vec<StationYearRecord>, AggregationError> {
        let df = self.frame.clone().collect()?;
        let station_id = df.column("station_id")?.str()?;
        let year = df.column("year")?.i32()?;
        let flood_days = df.column("flood_days")?.f64()?;
        let missing_days = df.column("missing_days")?.f64()?;

        let records = (0..df.height())
            .filter_map(|i| {
                Some(StationYearRecord {
                    station_id: station_id.get(i)?.to_string(),
                    year: year.get(i)?,
                    flood_days: flood_days.get(i),
                    missing_days: missing_days.get(i).unwrap_or(0.0),
                })
            })
            .collect();
        Ok(records)
    }

    pub fn overview(&self) -> Result<DataOverview, AggregationError> {
        let counts = self
            .frame
            .clone()
            .select([
                len().alias("records"),
                col("flood_days")
                    .eq(lit(0.0))
                    .and(col("missing_days").lt(lit(FULL_YEAR_MISSING_DAYS)))
                    .cast(DataType::Int64)
                    .sum()
                    .alias("zero_flood"),
                col("missing_days")
                    .gt_eq(lit(FULL_YEAR_MISSING_DAYS))
                    .cast(DataType::Int64)
                    .sum()
                    .alias("uninstalled"),
            ])
            .collect()?;
        let count = |name: &str| -> Result<usize, AggregationError> {
            let column = counts.column(name)?.cast(&DataType::Int64)?;
            Ok(column.i64()?.get(0).unwrap_or(0).max(0) as usize)
        };

        let years_df = self
            .frame
            .clone()
            .select([col("year").unique().sort(Default::default())])
            .collect()?;
        let years = years_df.column("year")?.i32()?.into_iter().flatten().collect();

        let stations_df = self
            .frame
            .clone()
            .select([col("station_id").unique()])
            .collect()?;
        let station_ids = stations_df
            .column("station_id")?
            .str()?
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();

        Ok(DataOverview {
            records: count("records")?,
            zero_flood_records: count("zero_flood")?,
            uninstalled_records: count("uninstalled")?,
            years,
            station_ids,
        })
    }
}

impl DataOverview {
    pub fn log(&self) {
        info!(
            "Station-year input: {} records across {} stations and {} years; {} with zero flood days (valid data), {} for uninstalled station-years",
            self.records,
            self.station_ids.len(),
            self.years.len(),
            self.zero_flood_records,
            self.uninstalled_records
        );
    }
}

fn normalize(frame: LazyFrame) -> LazyFrame {
    frame.select([
        col("station_id").cast(DataType::String),
        col("year").cast(DataType::Int32),
        col("flood_days").cast(DataType::Float64),
        col("missing_days").cast(DataType::Float64).fill_null(lit(0.0)),
    ])
}
