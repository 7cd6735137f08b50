//! The persisted reference-point → station association table.

use crate::association::error::AssociationError;
use crate::stage_cache::Fingerprint;
use crate::types::geo::Geometry;
use crate::types::station::CountyFips;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

const GAUGE_ID_PREFIX: &str = "gauge_id_";

/// A station occupying one slot of an [`AssociationRow`].
#[derive(Debug, Clone, PartialEq)]
pub struct AssignedStation {
    pub station_id: String,
    pub station_name: String,
    pub distance_m: f64,
    pub weight: f64,
}

/// One reference point and its weighted stations, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationRow {
    pub reference_id: String,
    pub county_fips: CountyFips,
    pub county_name: String,
    pub state_fips: String,
    pub region: String,
    pub sub_region: Option<String>,
    pub geometry: Geometry,
    pub stations: Vec<AssignedStation>,
}

impl AssociationRow {
    pub fn n_stations(&self) -> usize {
        self.stations.len()
    }

    pub fn total_weight(&self) -> f64 {
        self.stations.iter().map(|s| s.weight).sum()
    }

    pub fn is_covered(&self) -> bool {
        !self.stations.is_empty()
    }
}

/// Long-form view of one filled slot. `rank` is 1-based.
#[derive(Debug, Clone, PartialEq)]
pub struct Association {
    pub reference_id: String,
    pub county_fips: CountyFips,
    pub region: String,
    pub station_id: String,
    pub distance_m: f64,
    pub weight: f64,
    pub rank: usize,
}

/// Per-county bookkeeping derived from the table.
#[derive(Debug, Clone, PartialEq)]
pub struct CountyInfo {
    pub region: String,
    pub n_reference_points: u32,
}

/// One row per reference point with `max_stations` slots.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationTable {
    pub max_stations: usize,
    pub rows: Vec<AssociationRow>,
}

impl AssociationTable {
    pub fn new(max_stations: usize, rows: Vec<AssociationRow>) -> Self {
        Self { max_stations, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every filled slot, in row order then rank order.
    pub fn associations(&self) -> Vec<Association> {
        self.rows
            .iter()
            .flat_map(|row| {
                row.stations.iter().enumerate().map(move |(i, s)| Association {
                    reference_id: row.reference_id.clone(),
                    county_fips: row.county_fips.clone(),
                    region: row.region.clone(),
                    station_id: s.station_id.clone(),
                    distance_m: s.distance_m,
                    weight: s.weight,
                    rank: i + 1,
                })
            })
            .collect()
    }

    /// Counties keyed by FIPS with their region and reference point count.
    pub fn counties(&self) -> BTreeMap<CountyFips, CountyInfo> {
        let mut counties: BTreeMap<CountyFips, CountyInfo> = BTreeMap::new();
        for row in &self.rows {
            counties
                .entry(row.county_fips.clone())
                .and_modify(|info| info.n_reference_points += 1)
                .or_insert_with(|| CountyInfo {
                    region: row.region.clone(),
                    n_reference_points: 1,
                });
        }
        counties
    }

    /// Station weight per county: the sum of the county's reference point weights.
    pub fn county_station_weights(&self) -> BTreeMap<CountyFips, BTreeMap<String, f64>> {
        let mut weights: BTreeMap<CountyFips, BTreeMap<String, f64>> = BTreeMap::new();
        for row in &self.rows {
            let county = weights.entry(row.county_fips.clone()).or_default();
            for station in &row.stations {
                *county.entry(station.station_id.clone()).or_insert(0.0) += station.weight;
            }
        }
        weights
    }

    /// Content hash over every row and slot, used to key downstream checkpoints.
    pub fn fingerprint(&self) -> u64 {
        let mut fp = Fingerprint::new().u64(self.max_stations as u64);
        for row in &self.rows {
            fp = fp
                .str(&row.reference_id)
                .str(row.county_fips.as_str())
                .str(&row.region);
            for station in &row.stations {
                fp = fp
                    .str(&station.station_id)
                    .f64(station.distance_m)
                    .f64(station.weight);
            }
            fp = fp.str("|");
        }
        fp.finish()
    }

    /// Distinct station ids with at least one assignment, sorted.
    pub fn station_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .rows
            .iter()
            .flat_map(|row| row.stations.iter().map(|s| s.station_id.clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Renders the table in its persisted column layout.
    ///
    /// Slot columns `gauge_id_i`, `gauge_name_i`, `distance_i` and `weight_i`
    /// are 1-based and null for empty slots.
    pub fn to_frame(&self) -> Result<DataFrame, AssociationError> {
        let rows = &self.rows;
        let mut columns = vec![
            Column::new(
                "county_fips".into(),
                rows.iter().map(|r| r.county_fips.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "county_name".into(),
                rows.iter().map(|r| r.county_name.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "state_fips".into(),
                rows.iter().map(|r| r.state_fips.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "geometry".into(),
                rows.iter().map(|r| r.geometry.to_wkt()).collect::<Vec<_>>(),
            ),
            Column::new(
                "reference_id".into(),
                rows.iter().map(|r| r.reference_id.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "region".into(),
                rows.iter().map(|r| r.region.as_str()).collect::<Vec<_>>(),
            ),
            Column::new(
                "sub_region".into(),
                rows.iter().map(|r| r.sub_region.as_deref()).collect::<Vec<_>>(),
            ),
        ];

        for slot in 0..self.max_stations {
            let n = slot + 1;
            let assigned: Vec<Option<&AssignedStation>> =
                rows.iter().map(|r| r.stations.get(slot)).collect();
            columns.push(Column::new(
                format!("{GAUGE_ID_PREFIX}{n}").into(),
                assigned
                    .iter()
                    .map(|s| s.map(|s| s.station_id.as_str()))
                    .collect::<Vec<_>>(),
            ));
            columns.push(Column::new(
                format!("gauge_name_{n}").into(),
                assigned
                    .iter()
                    .map(|s| s.map(|s| s.station_name.as_str()))
                    .collect::<Vec<_>>(),
            ));
            columns.push(Column::new(
                format!("distance_{n}").into(),
                assigned
                    .iter()
                    .map(|s| s.map(|s| s.distance_m))
                    .collect::<Vec<_>>(),
            ));
            columns.push(Column::new(
                format!("weight_{n}").into(),
                assigned.iter().map(|s| s.map(|s| s.weight)).collect::<Vec<_>>(),
            ));
        }

        columns.push(Column::new(
            "n_gauges".into(),
            rows.iter().map(|r| r.n_stations() as u32).collect::<Vec<_>>(),
        ));
        columns.push(Column::new(
            "total_weight".into(),
            rows.iter().map(|r| r.total_weight()).collect::<Vec<_>>(),
        ));

        Ok(DataFrame::new(columns)?)
    }

    /// Rebuilds a table from its persisted layout. K is inferred from the
    /// number of `gauge_id_i` columns.
    pub fn from_frame(df: &DataFrame) -> Result<Self, AssociationError> {
        let max_stations = df
            .get_column_names()
            .iter()
            .filter(|name| name.starts_with(GAUGE_ID_PREFIX))
            .count();
        if max_stations == 0 {
            return Err(AssociationError::NoStationSlots);
        }

        let county_fips = str_column(df, "county_fips")?;
        let county_name = str_column(df, "county_name")?;
        let state_fips = str_column(df, "state_fips")?;
        let geometry = str_column(df, "geometry")?;
        let reference_id = str_column(df, "reference_id")?;
        let region = str_column(df, "region")?;
        let sub_region = str_column(df, "sub_region")?;

        let mut slots = Vec::with_capacity(max_stations);
        for n in 1..=max_stations {
            let distance = f64_column(df, &format!("distance_{n}"))?;
            let weight = f64_column(df, &format!("weight_{n}"))?;
            slots.push((
                str_column(df, &format!("{GAUGE_ID_PREFIX}{n}"))?,
                str_column(df, &format!("gauge_name_{n}"))?,
                distance,
                weight,
            ));
        }

        let mut rows = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let reference = reference_id.get(i).unwrap_or_default().to_string();
            let raw_fips = county_fips.get(i).unwrap_or_default();
            let fips = CountyFips::parse(raw_fips)
                .ok_or_else(|| AssociationError::InvalidFips(raw_fips.to_string()))?;
            let wkt = geometry.get(i).unwrap_or_default();
            let geom = Geometry::from_wkt(wkt).ok_or_else(|| AssociationError::InvalidGeometry {
                reference_id: reference.clone(),
                wkt: wkt.to_string(),
            })?;

            let stations = slots
                .iter()
                .filter_map(|(ids, names, distances, weights)| {
                    let station_id = ids.get(i)?;
                    Some(AssignedStation {
                        station_id: station_id.to_string(),
                        station_name: names.get(i).unwrap_or_default().to_string(),
                        distance_m: distances.get(i).unwrap_or(f64::NAN),
                        weight: weights.get(i).unwrap_or(0.0),
                    })
                })
                .collect();

            rows.push(AssociationRow {
                reference_id: reference,
                county_fips: fips,
                county_name: county_name.get(i).unwrap_or_default().to_string(),
                state_fips: state_fips.get(i).unwrap_or_default().to_string(),
                region: region.get(i).unwrap_or_default().to_string(),
                sub_region: sub_region.get(i).map(str::to_string),
                geometry: geom,
                stations,
            });
        }

        Ok(Self { max_stations, rows })
    }

    pub fn write_parquet(&self, path: &Path) -> Result<(), AssociationError> {
        let mut df = self.to_frame()?;
        let file = File::create(path)
            .map_err(|e| AssociationError::ParquetWriteIo(path.to_path_buf(), e))?;
        ParquetWriter::new(file)
            .with_compression(ParquetCompression::Snappy)
            .finish(&mut df)
            .map_err(|e| AssociationError::ParquetWritePolars(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn read_parquet(path: &Path) -> Result<Self, AssociationError> {
        let file =
            File::open(path).map_err(|e| AssociationError::ParquetReadIo(path.to_path_buf(), e))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| AssociationError::ParquetRead(path.to_path_buf(), e))?;
        Self::from_frame(&df)
    }
}

fn str_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a StringChunked, AssociationError> {
    df.column(name)
        .and_then(|c| c.str())
        .map_err(|e| AssociationError::ColumnNotFound(name.to_string(), e))
}

fn f64_column(df: &DataFrame, name: &str) -> Result<Float64Chunked, AssociationError> {
    df.column(name)
        .and_then(|c| c.cast(&DataType::Float64))
        .and_then(|c| c.f64().cloned())
        .map_err(|e| AssociationError::ColumnNotFound(name.to_string(), e))
}
