mod aggregation;
mod association;
mod config;
mod error;
mod pipeline;
mod projection;
mod stage_cache;
mod types;
mod utils;

pub use error::HtfError;
pub use pipeline::*;

pub use config::{load_region_map, load_station_list, parse_station_list, ConfigError, Settings};

pub use types::geo::*;
pub use types::records::*;
pub use types::region::*;
pub use types::station::*;

pub use projection::albers::{planar_distance, AlbersEqualArea};
pub use projection::projector::{
    derive_from_bounds, well_known_projection, RegionProjector, CONUS_ALBERS,
};

pub use association::builder::*;
pub use association::finder::{NearestStationFinder, Neighbor, SearchParams, SearchResult};
pub use association::table::*;
pub use association::weights::*;

pub use aggregation::chunked::ChunkedAggregator;
pub use aggregation::frame::{DataOverview, StationYearFrame};
pub use aggregation::output::{
    aggregates_from_frame, aggregates_to_frame, summarize_regions, RegionSummary,
    AGGREGATE_COLUMNS,
};
pub use aggregation::parallel::ParallelAggregator;
pub use aggregation::validate::validate_aggregates;
pub use aggregation::{
    AggregationOutcome, AggregationStrategy, CountyAggregator, PartitionFailure, PartitionKey,
};

pub use stage_cache::{Fingerprint, StageCache, StageManifest, StageSource};

pub use aggregation::error::{AggregationError, ValidationError};
pub use association::error::AssociationError;
pub use stage_cache::StageCacheError;
