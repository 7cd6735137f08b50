use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssociationError {
    #[error("Reference point '{reference_id}' has no usable location")]
    InvalidReferenceLocation { reference_id: String },

    #[error("Station '{station_id}' has invalid coordinates ({lat}, {lon})")]
    InvalidStationLocation {
        station_id: String,
        lat: f64,
        lon: f64,
    },

    #[error("Invalid county FIPS code '{0}'")]
    InvalidFips(String),

    #[error("Invalid geometry for reference point '{reference_id}': '{wkt}'")]
    InvalidGeometry { reference_id: String, wkt: String },

    #[error("Association table has no station slots")]
    NoStationSlots,

    #[error("Required column '{0}' not found in association table")]
    ColumnNotFound(String, #[source] PolarsError),

    #[error("Failed processing association table")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("I/O error writing association table '{0}'")]
    ParquetWriteIo(PathBuf, #[source] std::io::Error),

    #[error("Encoding error writing association table '{0}'")]
    ParquetWritePolars(PathBuf, #[source] PolarsError),

    #[error("Failed to read association table '{0}'")]
    ParquetRead(PathBuf, #[source] PolarsError),

    #[error("Failed to open association table '{0}'")]
    ParquetReadIo(PathBuf, #[source] std::io::Error),

    #[error("Failed to write coverage diagnostics '{0}'")]
    DiagnosticsWrite(PathBuf, #[source] std::io::Error),

    #[error("Failed to serialize coverage diagnostics")]
    DiagnosticsEncode(#[from] serde_json::Error),
}
