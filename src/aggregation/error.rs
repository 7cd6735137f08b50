use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("Failed to read station-year input '{0}'")]
    InputRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to scan station-year parquet '{0}'")]
    ParquetScan(PathBuf, #[source] PolarsError),

    #[error("Required column '{0}' not found in station-year input")]
    ColumnNotFound(String, #[source] PolarsError),

    #[error("Failed processing station-year DataFrame")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("Failed to build worker pool with {workers} threads")]
    ThreadPool {
        workers: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },

    #[error("Invalid aggregation setting: {0}")]
    InvalidSetting(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Aggregate output is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Aggregate output has {count} duplicated (county_fips, year) keys, e.g. {}", format_keys(.keys))]
    DuplicateKeys {
        count: usize,
        keys: Vec<(String, i32)>,
    },

    #[error("Failed to inspect aggregate output")]
    DataFrameProcessing(#[from] PolarsError),
}

fn format_keys(keys: &[(String, i32)]) -> String {
    keys.iter()
        .take(10)
        .map(|(fips, year)| format!("({fips}, {year})"))
        .collect::<Vec<_>>()
        .join(", ")
}
