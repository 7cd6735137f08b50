//! Geographic primitives shared by stations, reference points and regions.

use geo::{BoundingRect, Centroid, Coord, LineString, MapCoords, MultiPolygon, Polygon};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a geographical coordinate using latitude and longitude.
///
/// Latitude is the first element (index 0), and longitude is the second (index 1).
/// Both values are represented as `f64` decimal degrees.
///
/// # Examples
///
/// ```
/// use coastal_htf::LatLon;
///
/// let galveston = LatLon(29.31, -94.79);
/// assert_eq!(galveston.0, 29.31); // Latitude
/// assert_eq!(galveston.1, -94.79); // Longitude
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon(pub f64, pub f64);

impl LatLon {
    pub fn latitude(&self) -> f64 {
        self.0
    }

    pub fn longitude(&self) -> f64 {
        self.1
    }

    /// Whether both components are finite and inside the valid degree ranges.
    pub fn is_valid(&self) -> bool {
        self.0.is_finite()
            && self.1.is_finite()
            && (-90.0..=90.0).contains(&self.0)
            && (-180.0..=180.0).contains(&self.1)
    }
}

/// Axis-aligned geographic bounding box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Bounds {
    pub fn center(&self) -> LatLon {
        LatLon(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    pub fn lat_span(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn contains(&self, point: LatLon) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.0)
            && (self.min_lon..=self.max_lon).contains(&point.1)
    }
}

/// Geometry of a reference point: the point itself or a county outline.
///
/// Coordinates of outlines are `x = longitude`, `y = latitude`. Multipart
/// outlines cover counties made of several islands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(LatLon),
    Polygon(Polygon<f64>),
    MultiPolygon(MultiPolygon<f64>),
}

impl Geometry {
    /// Outline without holes. The ring is closed automatically.
    pub fn polygon(exterior: Vec<LatLon>) -> Self {
        Geometry::Polygon(Polygon::new(ring(&exterior), vec![]))
    }

    /// The location used for station search.
    ///
    /// For outlines this is the area centroid. Outlines spanning more than
    /// 180° of longitude are treated as crossing the antimeridian. Returns
    /// `None` for an empty outline.
    pub fn representative_point(&self) -> Option<LatLon> {
        match self {
            Geometry::Point(p) => Some(*p),
            Geometry::Polygon(polygon) => {
                outline_centroid(&MultiPolygon::new(vec![polygon.clone()]))
            }
            Geometry::MultiPolygon(parts) => outline_centroid(parts),
        }
    }

    /// Renders the geometry as WKT (`x y` = `lon lat`).
    pub fn to_wkt(&self) -> String {
        match self {
            Geometry::Point(p) => format!("POINT ({} {})", p.1, p.0),
            Geometry::Polygon(polygon) if polygon.exterior().0.is_empty() => {
                "POLYGON EMPTY".to_string()
            }
            Geometry::Polygon(polygon) => format!("POLYGON {}", polygon_wkt(polygon)),
            Geometry::MultiPolygon(parts) if parts.0.is_empty() => {
                "MULTIPOLYGON EMPTY".to_string()
            }
            Geometry::MultiPolygon(parts) => format!(
                "MULTIPOLYGON ({})",
                parts.iter().map(polygon_wkt).collect::<Vec<_>>().join(", ")
            ),
        }
    }

    /// Parses `POINT`, `POLYGON` and `MULTIPOLYGON` WKT, including holes and
    /// the `EMPTY` forms.
    pub fn from_wkt(wkt: &str) -> Option<Geometry> {
        let trimmed = wkt.trim();
        let Some(open) = trimmed.find('(') else {
            return match normalize_tag(trimmed).as_str() {
                "POLYGON EMPTY" => Some(Geometry::Polygon(Polygon::new(
                    LineString::new(vec![]),
                    vec![],
                ))),
                "MULTIPOLYGON EMPTY" => Some(Geometry::MultiPolygon(MultiPolygon::new(vec![]))),
                _ => None,
            };
        };
        let tag = trimmed[..open].trim().to_ascii_uppercase();
        let body = strip_parens(&trimmed[open..])?;

        match tag.as_str() {
            "POINT" => {
                let mut coords = parse_coords(body)?;
                if coords.len() != 1 {
                    return None;
                }
                coords.pop().map(|c| Geometry::Point(LatLon(c.y, c.x)))
            }
            "POLYGON" => parse_polygon(body).map(Geometry::Polygon),
            "MULTIPOLYGON" => split_top_level(body)?
                .into_iter()
                .map(|part| parse_polygon(strip_parens(part)?))
                .collect::<Option<Vec<_>>>()
                .map(|parts| Geometry::MultiPolygon(MultiPolygon::new(parts))),
            _ => None,
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wkt())
    }
}

fn ring(points: &[LatLon]) -> LineString<f64> {
    LineString::new(points.iter().map(|p| Coord { x: p.1, y: p.0 }).collect())
}

fn outline_centroid(parts: &MultiPolygon<f64>) -> Option<LatLon> {
    let rect = parts.bounding_rect()?;
    let centroid = if rect.max().x - rect.min().x > 180.0 {
        let shifted = parts.map_coords(|c| Coord {
            x: if c.x < 0.0 { c.x + 360.0 } else { c.x },
            y: c.y,
        });
        shifted.centroid()?
    } else {
        parts.centroid()?
    };
    let lon = if centroid.x() > 180.0 {
        centroid.x() - 360.0
    } else {
        centroid.x()
    };
    Some(LatLon(centroid.y(), lon))
}

fn ring_wkt(ring: &LineString<f64>) -> String {
    let coords: Vec<String> = ring.coords().map(|c| format!("{} {}", c.x, c.y)).collect();
    format!("({})", coords.join(", "))
}

fn polygon_wkt(polygon: &Polygon<f64>) -> String {
    let rings: Vec<String> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_wkt)
        .collect();
    format!("({})", rings.join(", "))
}

fn normalize_tag(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase()
}

fn strip_parens(s: &str) -> Option<&str> {
    let s = s.trim();
    s.strip_prefix('(')?.strip_suffix(')').map(str::trim)
}

/// Splits on commas outside of parentheses. `None` on unbalanced input.
fn split_top_level(s: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            ',' if depth == 0 => {
                parts.push(s[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    parts.push(s[start..].trim());
    Some(parts)
}

/// `(exterior), (hole), ...` without the enclosing parentheses.
fn parse_polygon(body: &str) -> Option<Polygon<f64>> {
    let mut rings = split_top_level(body)?
        .into_iter()
        .map(|r| parse_coords(strip_parens(r)?).map(LineString::new));
    let exterior = rings.next()??;
    let interiors = rings.collect::<Option<Vec<_>>>()?;
    Some(Polygon::new(exterior, interiors))
}

fn parse_coords(s: &str) -> Option<Vec<Coord<f64>>> {
    s.split(',')
        .map(|pair| {
            let mut parts = pair.split_whitespace();
            let x: f64 = parts.next()?.parse().ok()?;
            let y: f64 = parts.next()?.parse().ok()?;
            if parts.next().is_some() {
                return None;
            }
            Some(Coord { x, y })
        })
        .collect()
}
