//! Entry point for running association and staged aggregation.

use crate::aggregation::error::AggregationError;
use crate::aggregation::frame::StationYearFrame;
use crate::aggregation::output::{aggregates_from_frame, aggregates_to_frame, log_region_summary};
use crate::aggregation::validate::validate_aggregates;
use crate::aggregation::{AggregationStrategy, PartitionFailure};
use crate::association::builder::{AssociationBuilder, AssociationOutput};
use crate::association::table::AssociationTable;
use crate::config::{load_region_map, load_station_list, ConfigError, Settings};
use crate::error::HtfError;
use crate::projection::projector::RegionProjector;
use crate::stage_cache::{Fingerprint, StageCache, StageSource};
use crate::types::records::{CountyYearAggregate, Scenario};
use crate::types::region::RegionMap;
use crate::types::station::{ReferencePoint, Station};
use crate::utils::ensure_dir_exists;
use bon::bon;
use log::{info, warn};
use polars::prelude::*;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;

const ASSOCIATION_FILE_NAME: &str = "station_associations.parquet";
const DIAGNOSTICS_FILE_NAME: &str = "station_associations_coverage.json";
const CHECKPOINT_DIR_NAME: &str = "checkpoints";

/// One aggregation stage of a multi-stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Historical,
    Projected(Scenario),
}

impl Stage {
    pub fn name(&self) -> String {
        match self {
            Stage::Historical => "historical".to_string(),
            Stage::Projected(scenario) => format!("projected_{}", scenario.column_name()),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of one aggregation stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub stage: Stage,
    pub aggregates: Vec<CountyYearAggregate>,
    /// Partitions excluded from this run. Empty when resumed from a checkpoint.
    pub failures: Vec<PartitionFailure>,
    pub source: StageSource,
    pub output_path: PathBuf,
}

impl StageOutput {
    pub fn county_years_without_data(&self) -> usize {
        self.aggregates.iter().filter(|a| !a.has_data()).count()
    }
}

/// Loaded configuration and output locations for a run.
///
/// Built explicitly with [`HtfContext::initialize`] or
/// [`HtfContext::with_inputs`]; nothing is read or created before that.
///
/// # Examples
///
/// ```rust,no_run
/// # use coastal_htf::{HtfContext, HtfError, Settings, Stage, StationYearFrame};
/// # use std::path::Path;
/// # async fn run() -> Result<(), HtfError> {
/// let settings = Settings::from_yaml_file(Path::new("settings.yaml"))?;
/// let context = HtfContext::initialize(settings).await?;
/// let associations = context.load_associations().await?;
/// let records = StationYearFrame::scan_parquet(Path::new("annual_flood_days.parquet"))?;
/// let output = context
///     .aggregate_stage()
///     .stage(Stage::Historical)
///     .associations(&associations)
///     .records(records)
///     .call()
///     .await?;
/// println!("{} county-years", output.aggregates.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HtfContext {
    settings: Settings,
    regions: Arc<RegionMap>,
    stations: Arc<Vec<Station>>,
    output_dir: PathBuf,
    stage_cache: StageCache,
}

#[bon]
impl HtfContext {
    /// Validates `settings`, loads the region map and station list they point
    /// to, and creates the output directory.
    ///
    /// # Errors
    ///
    /// Returns [`HtfError::Config`] if a setting is invalid, an input path is
    /// missing or a file cannot be read or parsed.
    pub async fn initialize(settings: Settings) -> Result<Self, HtfError> {
        settings.validate()?;
        let region_path = settings
            .region_map
            .clone()
            .ok_or(ConfigError::MissingPath("region_map"))?;
        let station_path = settings
            .station_list
            .clone()
            .ok_or(ConfigError::MissingPath("station_list"))?;

        let (regions, stations) = task::spawn_blocking(move || {
            let regions = load_region_map(&region_path)?;
            let stations = load_station_list(&station_path, &regions)?;
            Ok::<_, ConfigError>((regions, stations))
        })
        .await??;

        Self::with_inputs(settings, regions, stations).await
    }

    /// Builds a context from already loaded inputs.
    pub async fn with_inputs(
        settings: Settings,
        regions: RegionMap,
        stations: Vec<Station>,
    ) -> Result<Self, HtfError> {
        settings.validate()?;
        let output_dir = settings.resolve_output_dir()?;
        ensure_dir_exists(&output_dir)
            .await
            .map_err(|e| HtfError::OutputDirCreation(output_dir.clone(), e))?;
        info!(
            "Initialized with {} regions and {} stations; outputs in {:?}",
            regions.regions.len(),
            stations.len(),
            output_dir
        );

        Ok(Self {
            stage_cache: StageCache::new(output_dir.join(CHECKPOINT_DIR_NAME)),
            settings,
            regions: Arc::new(regions),
            stations: Arc::new(stations),
            output_dir,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn regions(&self) -> &RegionMap {
        &self.regions
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn association_path(&self) -> PathBuf {
        self.output_dir.join(ASSOCIATION_FILE_NAME)
    }

    pub fn diagnostics_path(&self) -> PathBuf {
        self.output_dir.join(DIAGNOSTICS_FILE_NAME)
    }

    pub fn stage_output_path(&self, stage: Stage) -> PathBuf {
        self.output_dir.join(format!("county_htf_{}.parquet", stage.name()))
    }

    /// Associates `points` with stations and persists the table and its
    /// coverage diagnostics.
    ///
    /// Always recomputes; re-run this whenever stations or reference points change.
    pub async fn build_associations(
        &self,
        points: Vec<ReferencePoint>,
    ) -> Result<AssociationOutput, HtfError> {
        let settings = self.settings.clone();
        let regions = Arc::clone(&self.regions);
        let stations = Arc::clone(&self.stations);
        let table_path = self.association_path();
        let diagnostics_path = self.diagnostics_path();

        let output = task::spawn_blocking(move || {
            let builder = AssociationBuilder::new(
                RegionProjector::new(&regions),
                settings.search_params(),
                settings.weight_calculator(),
            )
            .with_region_constraints(
                settings.require_same_region,
                settings.require_same_sub_region,
            );
            let output = builder.build(&points, &stations)?;
            output.table.write_parquet(&table_path)?;
            output.diagnostics.write_json(&diagnostics_path)?;
            Ok::<_, HtfError>(output)
        })
        .await??;

        info!(
            "Wrote association table ({} rows) to {:?}",
            output.table.len(),
            self.association_path()
        );
        Ok(output)
    }

    /// Reads the persisted association table.
    pub async fn load_associations(&self) -> Result<AssociationTable, HtfError> {
        let path = self.association_path();
        let table = task::spawn_blocking(move || AssociationTable::read_parquet(&path)).await??;
        Ok(table)
    }

    /// Runs one aggregation stage, resuming from its checkpoint when the
    /// association table and input are unchanged.
    ///
    /// This method uses a builder pattern.
    ///
    /// # Arguments
    ///
    /// * `.stage(Stage)`: **Required.** Which stage this is.
    /// * `.associations(&AssociationTable)`: **Required.** County station weights.
    /// * `.records(StationYearFrame)`: **Required.** Station-year input. Historical
    ///   input is cut at the configured start year.
    /// * `.strategy(AggregationStrategy)`: *Optional.* Engine to use. Defaults to
    ///   the chunked engine with the configured chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`HtfError::Validation`] if the produced table violates the
    /// (county_fips, year) uniqueness or lacks required columns. Partition
    /// failures do not fail the stage; they are listed in the output.
    #[builder]
    pub async fn aggregate_stage(
        &self,
        stage: Stage,
        associations: &AssociationTable,
        records: StationYearFrame,
        strategy: Option<AggregationStrategy>,
    ) -> Result<StageOutput, HtfError> {
        let strategy = strategy.unwrap_or_else(|| self.settings.chunked());
        let input = match stage {
            Stage::Historical => records.with_start_year(self.settings.historical_start_year),
            Stage::Projected(_) => records,
        };
        let fingerprint = Fingerprint::new()
            .str(&stage.name())
            .u64(associations.fingerprint())
            .u64(input.fingerprint())
            .finish();

        info!("Starting stage '{}'", stage);
        let table = associations.clone();
        let cache = self.stage_cache.clone();
        let stage_name = stage.name();
        let (df, source, failures) = task::spawn_blocking(move || {
            let mut failures = Vec::new();
            let (df, source) = cache.load_or_compute(&stage_name, fingerprint, || {
                let aggregator = strategy.aggregator()?;
                info!("Aggregating stage '{}' with the {} engine", stage_name, aggregator.name());
                let outcome = aggregator.aggregate(&table, &input)?;
                let df = aggregates_to_frame(&outcome.aggregates)
                    .map_err(AggregationError::from)?;
                validate_aggregates(&df)?;
                let complete = !outcome.is_degraded();
                failures = outcome.failures;
                Ok::<_, HtfError>((df, complete))
            })?;
            if source == StageSource::Checkpoint {
                validate_aggregates(&df)?;
            }
            Ok::<_, HtfError>((df, source, failures))
        })
        .await??;

        let aggregates = aggregates_from_frame(&df)?;
        let output_path = self.stage_output_path(stage);
        write_output(df, output_path.clone()).await?;

        log_region_summary(&stage.name(), &aggregates);
        let output = StageOutput {
            stage,
            aggregates,
            failures,
            source,
            output_path,
        };
        info!(
            "Stage '{}' finished: {} county-years, {} without station data, {} failed partitions",
            stage,
            output.aggregates.len(),
            output.county_years_without_data(),
            output.failures.len()
        );
        if !output.failures.is_empty() {
            warn!("Stage '{}' output is degraded", stage);
        }
        Ok(output)
    }
}

async fn write_output(mut df: DataFrame, path: PathBuf) -> Result<(), HtfError> {
    task::spawn_blocking(move || {
        let file = std::fs::File::create(&path)
            .map_err(|e| HtfError::OutputWriteIo(path.clone(), e))?;
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Snappy)
            .finish(&mut df)
            .map_err(|e| HtfError::OutputWritePolars(path, e))?;
        Ok::<(), HtfError>(())
    })
    .await??;
    Ok(())
}
