//! Chooses the Albers projection used for each region.

use crate::projection::albers::AlbersEqualArea;
use crate::types::geo::Bounds;
use crate::types::region::{AlbersParams, ProjectionHint, RegionMap};
use log::warn;
use std::collections::HashMap;

/// Albers definition used for regions without a usable definition.
pub const CONUS_ALBERS: AlbersParams = AlbersParams {
    lat_1: 20.0,
    lat_2: 60.0,
    lat_0: 40.0,
    lon_0: -96.0,
};

/// Smallest latitude span (degrees) used when deriving parallels from bounds.
const MIN_LAT_SPAN: f64 = 1.0;

/// Fixed definitions for regions poorly served by a bounds-derived cone.
pub fn well_known_projection(name: &str) -> Option<AlbersParams> {
    let params = match name.to_ascii_lowercase().as_str() {
        "alaska" => AlbersParams {
            lat_1: 55.0,
            lat_2: 65.0,
            lat_0: 50.0,
            lon_0: -154.0,
        },
        "hawaii" => AlbersParams {
            lat_1: 8.0,
            lat_2: 18.0,
            lat_0: 13.0,
            lon_0: -157.0,
        },
        "pacific_islands" => AlbersParams {
            lat_1: 0.0,
            lat_2: 20.0,
            lat_0: 10.0,
            lon_0: 160.0,
        },
        "puerto_rico" => AlbersParams {
            lat_1: 17.0,
            lat_2: 19.0,
            lat_0: 18.0,
            lon_0: -66.5,
        },
        "virgin_islands" => AlbersParams {
            lat_1: 17.0,
            lat_2: 19.0,
            lat_0: 18.0,
            lon_0: -64.75,
        },
        "conus" => CONUS_ALBERS,
        _ => return None,
    };
    Some(params)
}

/// Standard parallels at 1/6 and 5/6 of the latitude span, origin at the
/// center of the bounding box.
pub fn derive_from_bounds(bounds: &Bounds) -> AlbersParams {
    let center = bounds.center();
    let span = bounds.lat_span().max(MIN_LAT_SPAN);
    let south = center.latitude() - span / 2.0;
    AlbersParams {
        lat_1: south + span / 6.0,
        lat_2: south + span * 5.0 / 6.0,
        lat_0: center.latitude(),
        lon_0: center.longitude(),
    }
}

/// Resolves and caches one projection per region of a [`RegionMap`].
///
/// Resolution order: an explicit projection hint, a well-known definition
/// matching the region id, then parameters derived from the region bounds.
#[derive(Debug, Clone)]
pub struct RegionProjector {
    projections: HashMap<String, AlbersEqualArea>,
    fallback: AlbersEqualArea,
}

impl RegionProjector {
    pub fn new(region_map: &RegionMap) -> Self {
        let projections = region_map
            .regions
            .iter()
            .map(|(id, def)| {
                let params = match &def.projection {
                    Some(ProjectionHint::Albers(params)) => *params,
                    Some(ProjectionHint::WellKnown(name)) => {
                        well_known_projection(name).unwrap_or_else(|| {
                            warn!(
                                "Region '{}' names unknown projection '{}'; deriving from bounds",
                                id, name
                            );
                            derive_from_bounds(&def.bounds)
                        })
                    }
                    None => well_known_projection(id)
                        .unwrap_or_else(|| derive_from_bounds(&def.bounds)),
                };
                (id.clone(), AlbersEqualArea::new(params))
            })
            .collect();

        Self {
            projections,
            fallback: AlbersEqualArea::new(CONUS_ALBERS),
        }
    }

    /// The projection for `region`.
    ///
    /// Unknown regions get the CONUS Albers definition and a warning.
    pub fn for_region(&self, region: &str) -> &AlbersEqualArea {
        match self.projections.get(region) {
            Some(projection) => projection,
            None => {
                warn!(
                    "No projection defined for region '{}'; using CONUS Albers",
                    region
                );
                &self.fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::albers::planar_distance;
    use crate::types::geo::LatLon;
    use crate::types::region::RegionDefinition;
    use haversine::{distance, Location as HaversineLocation, Units};

    fn region_map() -> RegionMap {
        let mut map = RegionMap::default();
        map.regions.insert(
            "gulf_coast".to_string(),
            RegionDefinition {
                name: "Gulf Coast".to_string(),
                state_codes: vec!["48".into(), "22".into(), "28".into(), "01".into(), "12".into()],
                bounds: Bounds {
                    min_lon: -97.9,
                    min_lat: 24.4,
                    max_lon: -80.0,
                    max_lat: 31.0,
                },
                projection: None,
            },
        );
        map.regions.insert(
            "alaska".to_string(),
            RegionDefinition {
                name: "Alaska".to_string(),
                state_codes: vec!["02".into()],
                bounds: Bounds {
                    min_lon: -179.0,
                    min_lat: 51.0,
                    max_lon: -130.0,
                    max_lat: 71.5,
                },
                projection: None,
            },
        );
        map.regions.insert(
            "guam".to_string(),
            RegionDefinition {
                name: "Guam".to_string(),
                state_codes: vec!["66".into()],
                bounds: Bounds {
                    min_lon: 144.6,
                    min_lat: 13.2,
                    max_lon: 145.0,
                    max_lat: 13.7,
                },
                projection: Some(ProjectionHint::WellKnown("pacific_islands".to_string())),
            },
        );
        map
    }

    #[test]
    fn test_derived_parallels() {
        let params = derive_from_bounds(&Bounds {
            min_lon: -100.0,
            min_lat: 24.0,
            max_lon: -80.0,
            max_lat: 36.0,
        });
        assert!((params.lat_1 - 26.0).abs() < 1e-9);
        assert!((params.lat_2 - 34.0).abs() < 1e-9);
        assert!((params.lat_0 - 30.0).abs() < 1e-9);
        assert!((params.lon_0 + 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_narrow_region_has_minimum_span() {
        let params = derive_from_bounds(&Bounds {
            min_lon: -65.1,
            min_lat: 18.0,
            max_lon: -64.5,
            max_lat: 18.0,
        });
        assert!(params.lat_2 - params.lat_1 > 0.5);
    }

    #[test]
    fn test_resolution_order() {
        let projector = RegionProjector::new(&region_map());
        assert_eq!(
            projector.for_region("alaska").params(),
            well_known_projection("alaska").unwrap()
        );
        assert_eq!(
            projector.for_region("guam").params(),
            well_known_projection("pacific_islands").unwrap()
        );
        assert_eq!(projector.for_region("atlantis").params(), CONUS_ALBERS);
    }

    #[test]
    fn test_same_region_same_projection() {
        let a = RegionProjector::new(&region_map());
        let b = RegionProjector::new(&region_map());
        assert_eq!(a.for_region("gulf_coast"), b.for_region("gulf_coast"));
    }

    #[test]
    fn test_regional_distance_accuracy() {
        let projector = RegionProjector::new(&region_map());
        let projection = projector.for_region("gulf_coast");
        let pairs = [
            (LatLon(29.31, -94.79), LatLon(30.25, -88.07)),
            (LatLon(24.55, -81.81), LatLon(25.77, -80.13)),
            (LatLon(27.76, -97.39), LatLon(26.06, -97.22)),
        ];
        for (a, b) in pairs {
            let planar = planar_distance(projection.project(a), projection.project(b));
            let reference = distance(
                HaversineLocation {
                    latitude: a.0,
                    longitude: a.1,
                },
                HaversineLocation {
                    latitude: b.0,
                    longitude: b.1,
                },
                Units::Kilometers,
            ) * 1000.0;
            assert!(
                (planar - reference).abs() / reference < 0.01,
                "{:?} -> {:?}: planar {} vs haversine {}",
                a,
                b,
                planar,
                reference
            );
        }
    }
}
