//! Tuning parameters and the declarative YAML inputs (region map, station list).

use crate::aggregation::AggregationStrategy;
use crate::association::finder::SearchParams;
use crate::association::weights::{DistanceFallback, WeightCalculator};
use crate::types::geo::LatLon;
use crate::types::region::RegionMap;
use crate::types::station::Station;
use crate::utils::default_output_dir;
use bon::Builder;
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse configuration file '{0}'")]
    Parse(PathBuf, #[source] serde_yaml::Error),

    #[error("Invalid setting '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Station '{station_id}' references unknown region '{region}'")]
    UnknownRegion { station_id: String, region: String },

    #[error("Station '{station_id}' has invalid coordinates ({lat}, {lon})")]
    InvalidStationLocation {
        station_id: String,
        lat: f64,
        lon: f64,
    },

    #[error("Region map '{0}' defines no regions")]
    EmptyRegionMap(PathBuf),

    #[error("Setting '{0}' is required but not set")]
    MissingPath(&'static str),

    #[error("Failed to determine output directory")]
    OutputDirResolution,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// All numeric tuning parameters and input/output locations of a run.
///
/// # Examples
///
/// ```
/// use coastal_htf::Settings;
///
/// let settings = Settings::builder().max_stations(5).idw_power(1.0).build();
/// assert_eq!(settings.max_stations, 5);
/// assert_eq!(settings.initial_radius_m, 50_000.0);
/// assert!(settings.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of stations per reference point (K).
    #[builder(default = 3)]
    pub max_stations: usize,
    #[builder(default = 50_000.0)]
    pub initial_radius_m: f64,
    #[builder(default = 200_000.0)]
    pub max_radius_m: f64,
    #[builder(default = 25_000.0)]
    pub radius_increment_m: f64,
    /// IDW exponent.
    #[builder(default = 2.0)]
    pub idw_power: f64,
    /// Normalized weights below this are dropped before renormalizing.
    #[builder(default = 0.1)]
    pub min_weight: f64,
    /// Stations farther than this do not receive weight.
    #[builder(default = 100_000.0)]
    pub max_distance_m: f64,
    #[builder(default)]
    pub distance_fallback: DistanceFallback,
    /// Stations per batch in the chunked engine.
    #[builder(default = 100)]
    pub chunk_size: usize,
    /// Worker threads in the parallel engine.
    #[builder(default = default_workers())]
    pub workers: usize,
    /// Historical records before this year are ignored.
    #[builder(default = 1970)]
    pub historical_start_year: i32,
    #[builder(default = true)]
    pub require_same_region: bool,
    #[builder(default = false)]
    pub require_same_sub_region: bool,
    pub region_map: Option<PathBuf>,
    pub station_list: Option<PathBuf>,
    /// Where association tables, checkpoints and outputs go. Defaults to the
    /// platform cache directory.
    pub output_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Settings {
    /// Loads settings from YAML. Absent keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let settings: Settings = serde_yaml::from_str(&text)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        settings.validate()?;
        info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |name: &'static str, reason: String| {
            Err(ConfigError::InvalidParameter { name, reason })
        };
        if self.max_stations == 0 {
            return invalid("max_stations", "must be at least 1".to_string());
        }
        if !(self.initial_radius_m > 0.0) {
            return invalid(
                "initial_radius_m",
                format!("must be positive, got {}", self.initial_radius_m),
            );
        }
        if !(self.radius_increment_m > 0.0) {
            return invalid(
                "radius_increment_m",
                format!("must be positive, got {}", self.radius_increment_m),
            );
        }
        if !(self.max_radius_m >= self.initial_radius_m) {
            return invalid(
                "max_radius_m",
                format!(
                    "must be at least initial_radius_m ({}), got {}",
                    self.initial_radius_m, self.max_radius_m
                ),
            );
        }
        if !(self.idw_power > 0.0 && self.idw_power.is_finite()) {
            return invalid(
                "idw_power",
                format!("must be positive and finite, got {}", self.idw_power),
            );
        }
        if !(0.0..1.0).contains(&self.min_weight) {
            return invalid(
                "min_weight",
                format!("must be in [0, 1), got {}", self.min_weight),
            );
        }
        if !(self.max_distance_m > 0.0) {
            return invalid(
                "max_distance_m",
                format!("must be positive, got {}", self.max_distance_m),
            );
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size", "must be at least 1".to_string());
        }
        if self.workers == 0 {
            return invalid("workers", "must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn search_params(&self) -> SearchParams {
        SearchParams {
            max_stations: self.max_stations,
            initial_radius_m: self.initial_radius_m,
            max_radius_m: self.max_radius_m,
            radius_increment_m: self.radius_increment_m,
            fallback: self.distance_fallback,
        }
    }

    pub fn weight_calculator(&self) -> WeightCalculator {
        WeightCalculator {
            power: self.idw_power,
            min_weight: self.min_weight,
            max_distance_m: self.max_distance_m,
            fallback: self.distance_fallback,
        }
    }

    pub fn chunked(&self) -> AggregationStrategy {
        AggregationStrategy::Chunked {
            chunk_size: self.chunk_size,
        }
    }

    pub fn parallel(&self) -> AggregationStrategy {
        AggregationStrategy::Parallel {
            workers: self.workers,
        }
    }

    pub fn resolve_output_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.output_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_output_dir().ok_or(ConfigError::OutputDirResolution),
        }
    }
}

pub fn load_region_map(path: &Path) -> Result<RegionMap, ConfigError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let map: RegionMap =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
    if map.regions.is_empty() {
        return Err(ConfigError::EmptyRegionMap(path.to_path_buf()));
    }
    info!("Loaded {} regions from {:?}", map.regions.len(), path);
    Ok(map)
}

#[derive(Debug, Deserialize)]
struct StationListFile {
    stations: BTreeMap<String, StationEntry>,
}

#[derive(Debug, Deserialize)]
struct StationEntry {
    name: String,
    location: LocationEntry,
    region: String,
    #[serde(default)]
    sub_region: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocationEntry {
    lat: f64,
    lon: f64,
}

/// Parses a station list from YAML text, checking every station against `regions`.
pub fn parse_station_list(
    text: &str,
    source: &Path,
    regions: &RegionMap,
) -> Result<Vec<Station>, ConfigError> {
    let file: StationListFile =
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(source.to_path_buf(), e))?;

    file.stations
        .into_iter()
        .map(|(id, entry)| {
            if !regions.contains(&entry.region) {
                return Err(ConfigError::UnknownRegion {
                    station_id: id,
                    region: entry.region,
                });
            }
            let location = LatLon(entry.location.lat, entry.location.lon);
            if !location.is_valid() {
                return Err(ConfigError::InvalidStationLocation {
                    station_id: id,
                    lat: location.0,
                    lon: location.1,
                });
            }
            Ok(Station {
                id,
                name: entry.name,
                location,
                region: entry.region,
                sub_region: entry.sub_region,
            })
        })
        .collect()
}

pub fn load_station_list(path: &Path, regions: &RegionMap) -> Result<Vec<Station>, ConfigError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
    let stations = parse_station_list(&text, path, regions)?;
    info!("Loaded {} stations from {:?}", stations.len(), path);
    Ok(stations)
}
