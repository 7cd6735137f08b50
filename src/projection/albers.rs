//! Albers Equal-Area Conic projection on the GRS80 ellipsoid.
//!
//! Forward equations follow Snyder, "Map Projections: A Working Manual"
//! (USGS PP 1395), chapter 14. Output coordinates are easting/northing in
//! meters relative to the projection origin, so Euclidean distance between
//! projected points approximates ground distance inside the region the
//! standard parallels were chosen for.

use crate::types::geo::LatLon;
use crate::types::region::AlbersParams;
use std::f64::consts::PI;

/// GRS80 semi-major axis (meters).
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
/// GRS80 first eccentricity squared.
const ECCENTRICITY_SQ: f64 = 0.006_694_380_022_90;

/// A fully initialised Albers projection.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbersEqualArea {
    params: AlbersParams,
    /// Central meridian in radians
    lon0: f64,
    /// Cone constant
    n: f64,
    c: f64,
    rho0: f64,
}

impl AlbersEqualArea {
    /// Create a projection from parameters in degrees.
    ///
    /// # Arguments
    /// * `params` - Standard parallels, latitude of origin and central meridian.
    pub fn new(params: AlbersParams) -> Self {
        let to_rad = PI / 180.0;
        let phi1 = params.lat_1 * to_rad;
        let phi2 = params.lat_2 * to_rad;
        let phi0 = params.lat_0 * to_rad;

        let m1 = m(phi1);
        let m2 = m(phi2);
        let q0 = q(phi0);
        let q1 = q(phi1);
        let q2 = q(phi2);

        let n = if (q2 - q1).abs() < 1e-12 {
            // Tangent cone
            phi1.sin()
        } else {
            (m1 * m1 - m2 * m2) / (q2 - q1)
        };
        let c = m1 * m1 + n * q1;
        let rho0 = SEMI_MAJOR_AXIS * (c - n * q0).max(0.0).sqrt() / n;

        Self {
            params,
            lon0: params.lon_0 * to_rad,
            n,
            c,
            rho0,
        }
    }

    pub fn params(&self) -> AlbersParams {
        self.params
    }

    /// Project a geographic coordinate to `[x, y]` in meters.
    pub fn project(&self, point: LatLon) -> [f64; 2] {
        let to_rad = PI / 180.0;
        let phi = point.latitude() * to_rad;
        let lambda = point.longitude() * to_rad;

        let rho = SEMI_MAJOR_AXIS * (self.c - self.n * q(phi)).max(0.0).sqrt() / self.n;
        let theta = self.n * normalize_angle(lambda - self.lon0);

        [rho * theta.sin(), self.rho0 - rho * theta.cos()]
    }
}

/// Euclidean distance between two projected points.
pub fn planar_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    (dx * dx + dy * dy).sqrt()
}

fn m(phi: f64) -> f64 {
    let sin = phi.sin();
    phi.cos() / (1.0 - ECCENTRICITY_SQ * sin * sin).sqrt()
}

fn q(phi: f64) -> f64 {
    let e = ECCENTRICITY_SQ.sqrt();
    let sin = phi.sin();
    let es = e * sin;
    (1.0 - ECCENTRICITY_SQ)
        * (sin / (1.0 - es * es) - (1.0 / (2.0 * e)) * ((1.0 - es) / (1.0 + es)).ln())
}

/// Wrap an angle into `[-PI, PI]` so regions spanning the antimeridian project
/// onto one side of the cone.
fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle;
    while a > PI {
        a -= 2.0 * PI;
    }
    while a < -PI {
        a += 2.0 * PI;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use haversine::{distance, Location as HaversineLocation, Units};

    fn conus() -> AlbersEqualArea {
        AlbersEqualArea::new(AlbersParams {
            lat_1: 29.5,
            lat_2: 45.5,
            lat_0: 23.0,
            lon_0: -96.0,
        })
    }

    fn haversine_m(a: LatLon, b: LatLon) -> f64 {
        distance(
            HaversineLocation {
                latitude: a.0,
                longitude: a.1,
            },
            HaversineLocation {
                latitude: b.0,
                longitude: b.1,
            },
            Units::Kilometers,
        ) * 1000.0
    }

    #[test]
    fn test_origin_projects_to_zero() {
        let p = conus().project(LatLon(23.0, -96.0));
        assert!(p[0].abs() < 1e-6);
        assert!(p[1].abs() < 1e-6);
    }

    #[test]
    fn test_known_usgs_albers_value() {
        // Snyder's worked example on Clarke 1866: x=1,885,472.7, y=1,535,925.0
        // for 35N 75W. The GRS80 result stays within a kilometer of it.
        let p = conus().project(LatLon(35.0, -75.0));
        assert!((p[0] - 1_885_472.7).abs() < 1_000.0, "x = {}", p[0]);
        assert!((p[1] - 1_535_925.0).abs() < 1_000.0, "y = {}", p[1]);
    }

    #[test]
    fn test_distance_close_to_great_circle() {
        let projection = conus();
        let galveston = LatLon(29.31, -94.79);
        let freeport = LatLon(28.95, -95.31);
        let planar = planar_distance(projection.project(galveston), projection.project(freeport));
        let reference = haversine_m(galveston, freeport);
        assert!(
            (planar - reference).abs() / reference < 0.01,
            "planar {} vs haversine {}",
            planar,
            reference
        );
    }

    #[test]
    fn test_antimeridian_wrap() {
        let pacific = AlbersEqualArea::new(AlbersParams {
            lat_1: 0.0,
            lat_2: 20.0,
            lat_0: 10.0,
            lon_0: 160.0,
        });
        let east = pacific.project(LatLon(10.0, 179.5));
        let west = pacific.project(LatLon(10.0, -179.5));
        let planar = planar_distance(east, west);
        assert!(planar < 150_000.0, "distance across antimeridian = {}", planar);
    }
}
