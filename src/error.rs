use crate::aggregation::error::{AggregationError, ValidationError};
use crate::association::error::AssociationError;
use crate::config::ConfigError;
use crate::stage_cache::StageCacheError;
use polars::error::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HtfError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Association(#[from] AssociationError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    StageCache(#[from] StageCacheError),

    #[error("Failed to create output directory '{0}'")]
    OutputDirCreation(PathBuf, #[source] std::io::Error),

    #[error("I/O error writing output '{0}'")]
    OutputWriteIo(PathBuf, #[source] std::io::Error),

    #[error("Encoding error writing output '{0}'")]
    OutputWritePolars(PathBuf, #[source] PolarsError),

    #[error("Failed converting aggregate table")]
    DataFrameProcessing(#[from] PolarsError),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
