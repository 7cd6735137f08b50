//! Nearest-station search over projected coordinates with an expanding radius.

use crate::association::weights::DistanceFallback;
use ordered_float::OrderedFloat;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// A station position in projected meters, tagged with its index in the
/// caller's station slice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedStation {
    pub index: usize,
    pub position: [f64; 2],
}

impl RTreeObject for ProjectedStation {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for ProjectedStation {
    /// Squared Euclidean distance in projected meters.
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx * dx + dy * dy
    }
}

/// Radius schedule and result size of a search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchParams {
    /// K, the maximum number of stations per point.
    pub max_stations: usize,
    pub initial_radius_m: f64,
    pub max_radius_m: f64,
    pub radius_increment_m: f64,
    pub fallback: DistanceFallback,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            max_stations: 3,
            initial_radius_m: 50_000.0,
            max_radius_m: 200_000.0,
            radius_increment_m: 25_000.0,
            fallback: DistanceFallback::CoverageGap,
        }
    }
}

impl SearchParams {
    /// Upper bound on the number of radius expansions a single query performs.
    pub fn max_expansions(&self) -> u32 {
        if self.max_radius_m <= self.initial_radius_m || self.radius_increment_m <= 0.0 {
            return 0;
        }
        ((self.max_radius_m - self.initial_radius_m) / self.radius_increment_m).ceil() as u32
    }
}

/// One station found for a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Index into the station slice the finder was built from.
    pub index: usize,
    pub distance_m: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    /// At most K neighbors, nearest first. Equal distances are ordered by index.
    pub neighbors: Vec<Neighbor>,
    /// How often the radius was increased before the search ended.
    pub expansions: u32,
    /// Radius of the last search attempt.
    pub final_radius_m: f64,
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

/// Spatial index over projected station positions, built once per partition.
#[derive(Debug, Clone)]
pub struct NearestStationFinder {
    rtree: RTree<ProjectedStation>,
    params: SearchParams,
}

impl NearestStationFinder {
    /// Builds the index. `positions[i]` is the projected position of station `i`.
    pub fn new(positions: &[[f64; 2]], params: SearchParams) -> Self {
        let stations = positions
            .iter()
            .enumerate()
            .map(|(index, position)| ProjectedStation {
                index,
                position: *position,
            })
            .collect();
        Self {
            rtree: RTree::bulk_load(stations),
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.rtree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.rtree.size() == 0
    }

    pub fn params(&self) -> &SearchParams {
        &self.params
    }

    /// Finds up to K stations around `point`.
    ///
    /// Starts at the initial radius and grows it by the increment until at
    /// least one station is inside or the maximum radius has been searched.
    /// The radius series is strictly increasing and capped, so the loop ends
    /// after at most [`SearchParams::max_expansions`] expansions.
    pub fn query(&self, point: [f64; 2]) -> SearchResult {
        let params = &self.params;
        let k = params.max_stations;
        let mut radius = params.initial_radius_m.min(params.max_radius_m);
        let mut expansions = 0;

        if k == 0 || self.is_empty() {
            return SearchResult {
                neighbors: vec![],
                expansions,
                final_radius_m: radius,
            };
        }

        loop {
            let neighbors = self.within(point, Some(radius), k);
            if !neighbors.is_empty() {
                return SearchResult {
                    neighbors,
                    expansions,
                    final_radius_m: radius,
                };
            }

            let next = (radius + params.radius_increment_m).min(params.max_radius_m);
            if next <= radius {
                break;
            }
            radius = next;
            expansions += 1;
        }

        let neighbors = match params.fallback {
            DistanceFallback::CoverageGap => vec![],
            DistanceFallback::UseAllCandidates => self.within(point, None, k),
        };
        SearchResult {
            neighbors,
            expansions,
            final_radius_m: radius,
        }
    }

    /// The K nearest stations within `radius` (unbounded when `None`).
    ///
    /// Stations tied with the K-th distance are collected before sorting so
    /// the index tie-break does not depend on R-tree traversal order.
    fn within(&self, point: [f64; 2], radius: Option<f64>, k: usize) -> Vec<Neighbor> {
        let limit_2 = radius.map(|r| r * r).unwrap_or(f64::INFINITY);
        let mut found: Vec<(OrderedFloat<f64>, usize)> = Vec::with_capacity(k + 1);

        for (station, distance_2) in self.rtree.nearest_neighbor_iter_with_distance_2(&point) {
            if distance_2 > limit_2 {
                break;
            }
            if found.len() >= k {
                if let Some((last, _)) = found.last() {
                    if distance_2 > last.0 {
                        break;
                    }
                }
            }
            found.push((OrderedFloat(distance_2), station.index));
        }

        found.sort();
        found.truncate(k);
        found
            .into_iter()
            .map(|(distance_2, index)| Neighbor {
                index,
                distance_m: distance_2.0.sqrt(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finder(positions: &[[f64; 2]], params: SearchParams) -> NearestStationFinder {
        NearestStationFinder::new(positions, params)
    }

    #[test]
    fn test_nearest_within_initial_radius() {
        let f = finder(
            &[[0.0, 3000.0], [0.0, 1000.0], [0.0, 2000.0], [0.0, 4000.0]],
            SearchParams::default(),
        );
        let result = f.query([0.0, 0.0]);
        assert_eq!(result.expansions, 0);
        let indices: Vec<usize> = result.neighbors.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![1, 2, 0]);
        for pair in result.neighbors.windows(2) {
            assert!(pair[0].distance_m <= pair[1].distance_m);
        }
    }

    #[test]
    fn test_ties_broken_by_index() {
        let f = finder(
            &[[1000.0, 0.0], [-1000.0, 0.0], [0.0, 1000.0], [0.0, -1000.0]],
            SearchParams::default(),
        );
        let result = f.query([0.0, 0.0]);
        let indices: Vec<usize> = result.neighbors.iter().map(|n| n.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_radius_expansion() {
        let f = finder(&[[0.0, 90_000.0]], SearchParams::default());
        let result = f.query([0.0, 0.0]);
        assert_eq!(result.neighbors.len(), 1);
        assert_eq!(result.expansions, 2);
        assert_eq!(result.final_radius_m, 100_000.0);
    }

    #[test]
    fn test_expansion_terminates_at_max_radius() {
        let params = SearchParams::default();
        assert_eq!(params.max_expansions(), 6);

        let f = finder(&[[0.0, 500_000.0]], params);
        let result = f.query([0.0, 0.0]);
        assert!(result.is_empty());
        assert_eq!(result.expansions, 6);
        assert_eq!(result.final_radius_m, 200_000.0);
    }

    #[test]
    fn test_uneven_increment_caps_at_max() {
        let params = SearchParams {
            initial_radius_m: 50_000.0,
            max_radius_m: 120_000.0,
            radius_increment_m: 50_000.0,
            ..Default::default()
        };
        assert_eq!(params.max_expansions(), 2);
        let result = finder(&[[0.0, 115_000.0]], params).query([0.0, 0.0]);
        assert_eq!(result.expansions, 2);
        assert_eq!(result.final_radius_m, 120_000.0);
        assert_eq!(result.neighbors.len(), 1);
    }

    #[test]
    fn test_use_all_candidates_fallback() {
        let params = SearchParams {
            fallback: DistanceFallback::UseAllCandidates,
            ..Default::default()
        };
        let result = finder(&[[0.0, 500_000.0], [0.0, 600_000.0]], params).query([0.0, 0.0]);
        assert_eq!(result.neighbors.len(), 2);
        assert_eq!(result.neighbors[0].index, 0);
        assert!((result.neighbors[0].distance_m - 500_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_index() {
        let result = finder(&[], SearchParams::default()).query([0.0, 0.0]);
        assert!(result.is_empty());
        assert_eq!(result.expansions, 0);
    }
}
