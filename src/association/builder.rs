//! Builds the association table for a set of reference points.

use crate::association::error::AssociationError;
use crate::association::finder::{NearestStationFinder, SearchParams};
use crate::association::table::{AssignedStation, AssociationRow, AssociationTable};
use crate::association::weights::WeightCalculator;
use crate::projection::projector::RegionProjector;
use crate::types::station::{ReferencePoint, Station};
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// A reference point that needed more than the initial search radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadiusExpansion {
    pub reference_id: String,
    pub expansions: u32,
    pub final_radius_m: f64,
}

/// Coverage diagnostics accumulated while building associations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssociationDiagnostics {
    /// Reference points left without any station.
    pub uncovered: Vec<String>,
    pub expanded: Vec<RadiusExpansion>,
    /// Reference points whose candidates all lay beyond the distance cutoff.
    pub beyond_cutoff: Vec<String>,
}

impl AssociationDiagnostics {
    pub fn write_json(&self, path: &Path) -> Result<(), AssociationError> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| AssociationError::DiagnosticsWrite(path.to_path_buf(), e))
    }
}

#[derive(Debug, Clone)]
pub struct AssociationOutput {
    pub table: AssociationTable,
    pub diagnostics: AssociationDiagnostics,
}

/// Key of the group of reference points that share candidates, projection
/// and index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PartitionKey {
    region: String,
    sub_region: Option<String>,
}

struct PointResult {
    stations: Vec<AssignedStation>,
    expansion: Option<RadiusExpansion>,
    beyond_cutoff: bool,
}

/// Runs projection, nearest-station search and weighting over every
/// reference point.
#[derive(Debug, Clone)]
pub struct AssociationBuilder {
    pub search: SearchParams,
    pub weights: WeightCalculator,
    pub require_same_region: bool,
    pub require_same_sub_region: bool,
    projector: RegionProjector,
}

impl AssociationBuilder {
    pub fn new(
        projector: RegionProjector,
        search: SearchParams,
        weights: WeightCalculator,
    ) -> Self {
        Self {
            search,
            weights,
            require_same_region: true,
            require_same_sub_region: false,
            projector,
        }
    }

    pub fn with_region_constraints(mut self, same_region: bool, same_sub_region: bool) -> Self {
        self.require_same_region = same_region;
        self.require_same_sub_region = same_sub_region;
        self
    }

    /// Associates every reference point with up to K stations.
    ///
    /// The output holds exactly one row per input point, in input order,
    /// including points that received no station.
    pub fn build(
        &self,
        points: &[ReferencePoint],
        stations: &[Station],
    ) -> Result<AssociationOutput, AssociationError> {
        for station in stations {
            if !station.location.is_valid() {
                return Err(AssociationError::InvalidStationLocation {
                    station_id: station.id.clone(),
                    lat: station.location.0,
                    lon: station.location.1,
                });
            }
        }

        let mut partitions: BTreeMap<PartitionKey, Vec<usize>> = BTreeMap::new();
        for (i, point) in points.iter().enumerate() {
            match point.location() {
                Some(location) if location.is_valid() => {}
                _ => {
                    return Err(AssociationError::InvalidReferenceLocation {
                        reference_id: point.id.clone(),
                    })
                }
            }
            let key = PartitionKey {
                region: point.region.clone(),
                sub_region: if self.require_same_sub_region {
                    point.sub_region.clone()
                } else {
                    None
                },
            };
            partitions.entry(key).or_default().push(i);
        }

        let mut results: Vec<Option<PointResult>> = (0..points.len()).map(|_| None).collect();
        for (key, members) in &partitions {
            let candidates: Vec<&Station> = stations
                .iter()
                .filter(|s| !self.require_same_region || s.region == key.region)
                .filter(|s| match (&key.sub_region, self.require_same_sub_region) {
                    (Some(sub), true) => s.sub_region.as_deref() == Some(sub.as_str()),
                    _ => true,
                })
                .collect();
            if candidates.is_empty() {
                warn!(
                    "No candidate stations for region '{}'{}; {} reference points uncovered",
                    key.region,
                    key.sub_region
                        .as_ref()
                        .map(|s| format!(" / '{}'", s))
                        .unwrap_or_default(),
                    members.len()
                );
            }

            let partition_results = self.associate_partition(key, members, points, &candidates);
            for (i, result) in members.iter().zip(partition_results) {
                results[*i] = Some(result);
            }
        }

        let mut diagnostics = AssociationDiagnostics::default();
        let mut rows = Vec::with_capacity(points.len());
        for (point, result) in points.iter().zip(results) {
            let result = result.unwrap_or(PointResult {
                stations: vec![],
                expansion: None,
                beyond_cutoff: false,
            });
            if result.stations.is_empty() {
                diagnostics.uncovered.push(point.id.clone());
            }
            if let Some(expansion) = result.expansion {
                diagnostics.expanded.push(expansion);
            }
            if result.beyond_cutoff {
                diagnostics.beyond_cutoff.push(point.id.clone());
            }
            rows.push(AssociationRow {
                reference_id: point.id.clone(),
                county_fips: point.county_fips.clone(),
                county_name: point.county_name.clone(),
                state_fips: point.state_fips.clone(),
                region: point.region.clone(),
                sub_region: point.sub_region.clone(),
                geometry: point.geometry.clone(),
                stations: result.stations,
            });
        }

        let table = AssociationTable::new(self.search.max_stations, rows);
        log_summary(&table, &diagnostics);
        Ok(AssociationOutput { table, diagnostics })
    }

    fn associate_partition(
        &self,
        key: &PartitionKey,
        members: &[usize],
        points: &[ReferencePoint],
        candidates: &[&Station],
    ) -> Vec<PointResult> {
        let projection = self.projector.for_region(&key.region);
        let positions: Vec<[f64; 2]> = candidates
            .iter()
            .map(|s| projection.project(s.location))
            .collect();
        let finder = NearestStationFinder::new(&positions, self.search);

        members
            .par_iter()
            .map(|&i| {
                let point = &points[i];
                // Locations were validated before partitioning.
                let projected = point
                    .location()
                    .map(|loc| projection.project(loc))
                    .unwrap_or([f64::NAN, f64::NAN]);
                let search = finder.query(projected);

                let found: Vec<(usize, f64)> = search
                    .neighbors
                    .iter()
                    .map(|n| (n.index, n.distance_m))
                    .collect();
                let weighted = self.weights.calculate(&found);

                let stations = weighted
                    .weights
                    .iter()
                    .filter_map(|(index, weight)| {
                        let distance_m = found.iter().find(|(i, _)| i == index)?.1;
                        let station = candidates[*index];
                        Some(AssignedStation {
                            station_id: station.id.clone(),
                            station_name: station.name.clone(),
                            distance_m,
                            weight: *weight,
                        })
                    })
                    .collect();

                PointResult {
                    stations,
                    expansion: (search.expansions > 0).then(|| RadiusExpansion {
                        reference_id: point.id.clone(),
                        expansions: search.expansions,
                        final_radius_m: search.final_radius_m,
                    }),
                    beyond_cutoff: weighted.beyond_cutoff,
                }
            })
            .collect()
    }
}

fn log_summary(table: &AssociationTable, diagnostics: &AssociationDiagnostics) {
    info!(
        "Associated {} reference points: {} without station coverage, {} required radius expansion, {} with all candidates beyond the distance cutoff",
        table.len(),
        diagnostics.uncovered.len(),
        diagnostics.expanded.len(),
        diagnostics.beyond_cutoff.len()
    );
    if !diagnostics.uncovered.is_empty() {
        warn!(
            "Coverage gaps at reference points: {}{}",
            diagnostics
                .uncovered
                .iter()
                .take(10)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            if diagnostics.uncovered.len() > 10 { ", ..." } else { "" }
        );
    }

    let mut by_region: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for row in &table.rows {
        let entry = by_region.entry(row.region.as_str()).or_default();
        entry.0 += 1;
        if row.is_covered() {
            entry.1 += 1;
        }
    }
    for (region, (total, covered)) in by_region {
        info!("Region {}: {}/{} reference points covered", region, covered, total);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::geo::{Bounds, Geometry, LatLon};
    use crate::types::region::{RegionDefinition, RegionMap};
    use crate::types::station::CountyFips;

    fn region_map() -> RegionMap {
        let mut map = RegionMap::default();
        for (id, bounds) in [
            (
                "gulf_coast",
                Bounds {
                    min_lon: -98.0,
                    min_lat: 24.0,
                    max_lon: -80.0,
                    max_lat: 31.0,
                },
            ),
            (
                "southeast",
                Bounds {
                    min_lon: -82.0,
                    min_lat: 25.0,
                    max_lon: -75.0,
                    max_lat: 36.0,
                },
            ),
        ] {
            map.regions.insert(
                id.to_string(),
                RegionDefinition {
                    name: id.to_string(),
                    state_codes: vec![],
                    bounds,
                    projection: None,
                },
            );
        }
        map
    }

    fn station(id: &str, lat: f64, lon: f64, region: &str) -> Station {
        Station {
            id: id.to_string(),
            name: format!("Station {id}"),
            location: LatLon(lat, lon),
            region: region.to_string(),
            sub_region: None,
        }
    }

    fn point(fips: &str, lat: f64, lon: f64, region: &str) -> ReferencePoint {
        ReferencePoint::county(
            CountyFips::parse(fips).unwrap(),
            format!("County {fips}"),
            region,
            Geometry::Point(LatLon(lat, lon)),
        )
    }

    fn builder() -> AssociationBuilder {
        AssociationBuilder::new(
            RegionProjector::new(&region_map()),
            SearchParams::default(),
            WeightCalculator::default(),
        )
    }

    #[test]
    fn test_every_point_appears_once_in_order() {
        let stations = vec![
            station("8771450", 29.31, -94.79, "gulf_coast"),
            station("8720218", 30.40, -81.43, "southeast"),
        ];
        let points = vec![
            point("48167", 29.30, -94.80, "gulf_coast"),
            point("12031", 30.33, -81.66, "southeast"),
            point("48061", 26.06, -97.21, "gulf_coast"),
            point("48167", 29.35, -94.75, "gulf_coast"),
        ];
        let output = builder().build(&points, &stations).unwrap();
        let ids: Vec<&str> = output.table.rows.iter().map(|r| r.reference_id.as_str()).collect();
        assert_eq!(ids, vec!["48167", "12031", "48061", "48167"]);
        assert_eq!(output.table.rows[0].stations[0].station_id, "8771450");
        assert_eq!(output.table.rows[1].stations[0].station_id, "8720218");
        // Brownsville is ~370 km from Galveston.
        assert!(output.table.rows[2].stations.is_empty());
        assert_eq!(output.diagnostics.uncovered, vec!["48061".to_string()]);
    }

    #[test]
    fn test_weights_sum_to_one() {
        let stations = vec![
            station("a", 29.31, -94.79, "gulf_coast"),
            station("b", 29.23, -94.40, "gulf_coast"),
            station("c", 28.95, -95.31, "gulf_coast"),
        ];
        let points = vec![point("48167", 29.28, -94.70, "gulf_coast")];
        let output = builder().build(&points, &stations).unwrap();
        let row = &output.table.rows[0];
        assert!(row.n_stations() >= 1);
        assert!((row.total_weight() - 1.0).abs() < 1e-9);
        for pair in row.stations.windows(2) {
            assert!(pair[0].distance_m <= pair[1].distance_m);
            assert!(pair[0].weight >= pair[1].weight);
        }
    }

    #[test]
    fn test_region_restriction() {
        let stations = vec![station("other", 29.31, -94.79, "southeast")];
        let points = vec![point("48167", 29.30, -94.80, "gulf_coast")];

        let restricted = builder().build(&points, &stations).unwrap();
        assert!(restricted.table.rows[0].stations.is_empty());

        let open = builder()
            .with_region_constraints(false, false)
            .build(&points, &stations)
            .unwrap();
        assert_eq!(open.table.rows[0].stations.len(), 1);
    }

    #[test]
    fn test_expansion_recorded() {
        // ~66 km north of the point: needs one expansion past 50 km.
        let stations = vec![station("a", 29.90, -94.80, "gulf_coast")];
        let points = vec![point("48167", 29.30, -94.80, "gulf_coast")];
        let output = builder().build(&points, &stations).unwrap();
        assert_eq!(output.diagnostics.expanded.len(), 1);
        assert_eq!(output.diagnostics.expanded[0].expansions, 1);
        assert_eq!(output.table.rows[0].n_stations(), 1);
    }

    #[test]
    fn test_invalid_location_is_fatal() {
        let stations = vec![station("bad", 123.0, -94.0, "gulf_coast")];
        let err = builder().build(&[], &stations).unwrap_err();
        assert!(matches!(err, AssociationError::InvalidStationLocation { .. }));

        let empty = ReferencePoint::county(
            CountyFips::parse("48167").unwrap(),
            "Galveston",
            "gulf_coast",
            Geometry::polygon(vec![]),
        );
        let err = builder().build(&[empty], &[]).unwrap_err();
        assert!(matches!(err, AssociationError::InvalidReferenceLocation { .. }));
    }

    #[test]
    fn test_diagnostics_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("coverage.json");
        let diagnostics = AssociationDiagnostics {
            uncovered: vec!["48061".to_string()],
            expanded: vec![],
            beyond_cutoff: vec![],
        };
        diagnostics.write_json(&path).unwrap();
        let loaded: AssociationDiagnostics =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(loaded, diagnostics);
    }
}
