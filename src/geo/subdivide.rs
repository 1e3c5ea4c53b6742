//! Approximate aliquot-part boundaries.
//!
//! The default [`SubdivisionMode::VertexFilter`] takes the bounding-box
//! midpoint of the parent and keeps only the parent's own vertices that fall
//! on the requested side of it. This is not PLSS geometry: no new vertices are
//! created, so a quarter of a plain square is a single corner point.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::GeoError;

/// `x` is longitude (easting), `y` latitude (northing).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Quarter {
    NE,
    NW,
    SE,
    SW,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Half {
    N,
    S,
    E,
    W,
}

/// One slicing step: a quarter or a half of whatever came before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aliquot {
    Quarter(Quarter),
    Half(Half),
}

impl fmt::Display for Aliquot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aliquot::Quarter(q) => write!(f, "{q:?} 1/4"),
            Aliquot::Half(h) => write!(f, "{h:?} 1/2"),
        }
    }
}

impl FromStr for Quarter {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NE" => Ok(Quarter::NE),
            "NW" => Ok(Quarter::NW),
            "SE" => Ok(Quarter::SE),
            "SW" => Ok(Quarter::SW),
            other => Err(GeoError::Parse(format!("unknown quarter {other:?}"))),
        }
    }
}

impl FromStr for Half {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" => Ok(Half::N),
            "S" => Ok(Half::S),
            "E" => Ok(Half::E),
            "W" => Ok(Half::W),
            other => Err(GeoError::Parse(format!("unknown half {other:?}"))),
        }
    }
}

/// The calculator's fixed-order request: quarter, then quarter-quarter, then half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subdivision {
    pub quarter: Option<Quarter>,
    pub quarter_quarter: Option<Quarter>,
    pub half: Option<Half>,
}

impl Subdivision {
    pub fn steps(&self) -> Vec<Aliquot> {
        self.quarter
            .map(Aliquot::Quarter)
            .into_iter()
            .chain(self.quarter_quarter.map(Aliquot::Quarter))
            .chain(self.half.map(Aliquot::Half))
            .collect()
    }

    /// Maps outermost-first steps onto the fixed order. Fails for sequences the
    /// fixed order cannot express, such as a half taken before a quarter.
    pub fn from_steps(steps: &[Aliquot]) -> Result<Self, GeoError> {
        let mut out = Subdivision::default();
        for step in steps {
            match *step {
                Aliquot::Quarter(q) if out.half.is_none() && out.quarter.is_none() => {
                    out.quarter = Some(q)
                }
                Aliquot::Quarter(q) if out.half.is_none() && out.quarter_quarter.is_none() => {
                    out.quarter_quarter = Some(q)
                }
                Aliquot::Half(h) if out.half.is_none() => out.half = Some(h),
                other => {
                    return Err(GeoError::Parse(format!(
                        "{other} cannot follow the earlier parts of this description"
                    )))
                }
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubdivisionMode {
    /// Keep the parent's vertices on the requested side of the midpoint.
    #[default]
    VertexFilter,
    /// Slice the parent's bounding box and return the slice's corners.
    BoundingBox,
}

impl FromStr for SubdivisionMode {
    type Err = GeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vertex" | "vertex-filter" | "vertex_filter" => Ok(SubdivisionMode::VertexFilter),
            "bbox" | "bounding-box" | "bounding_box" => Ok(SubdivisionMode::BoundingBox),
            other => Err(GeoError::Parse(format!("unknown subdivision mode {other:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Bounds {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Bounds {
    fn of(points: &[Point]) -> Result<Self, GeoError> {
        let first = points.first().ok_or(GeoError::EmptyParent)?;
        let mut b = Bounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in points {
            if !p.x.is_finite() || !p.y.is_finite() {
                return Err(GeoError::BadCoordinates(format!("({}, {})", p.x, p.y)));
            }
            b.min_x = b.min_x.min(p.x);
            b.min_y = b.min_y.min(p.y);
            b.max_x = b.max_x.max(p.x);
            b.max_y = b.max_y.max(p.y);
        }
        Ok(b)
    }

    fn mid(&self) -> Point {
        Point::new((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    fn corners(&self) -> Vec<Point> {
        vec![
            Point::new(self.min_x, self.min_y),
            Point::new(self.min_x, self.max_y),
            Point::new(self.max_x, self.max_y),
            Point::new(self.max_x, self.min_y),
        ]
    }
}

/// Whether `p` lies on the `step` side of `mid`. Points on the midline belong to both sides.
fn keeps(step: Aliquot, mid: Point, p: Point) -> bool {
    let east = p.x >= mid.x;
    let west = p.x <= mid.x;
    let north = p.y >= mid.y;
    let south = p.y <= mid.y;
    match step {
        Aliquot::Quarter(Quarter::NE) => east && north,
        Aliquot::Quarter(Quarter::NW) => west && north,
        Aliquot::Quarter(Quarter::SE) => east && south,
        Aliquot::Quarter(Quarter::SW) => west && south,
        Aliquot::Half(Half::N) => north,
        Aliquot::Half(Half::S) => south,
        Aliquot::Half(Half::E) => east,
        Aliquot::Half(Half::W) => west,
    }
}

fn slice_box(step: Aliquot, b: Bounds) -> Bounds {
    let mid = b.mid();
    let mut out = b;
    match step {
        Aliquot::Quarter(q) => {
            match q {
                Quarter::NE | Quarter::NW => out.min_y = mid.y,
                Quarter::SE | Quarter::SW => out.max_y = mid.y,
            }
            match q {
                Quarter::NE | Quarter::SE => out.min_x = mid.x,
                Quarter::NW | Quarter::SW => out.max_x = mid.x,
            }
        }
        Aliquot::Half(Half::N) => out.min_y = mid.y,
        Aliquot::Half(Half::S) => out.max_y = mid.y,
        Aliquot::Half(Half::E) => out.min_x = mid.x,
        Aliquot::Half(Half::W) => out.max_x = mid.x,
    }
    out
}

fn apply_step(points: &[Point], step: Aliquot, mode: SubdivisionMode) -> Result<Vec<Point>, GeoError> {
    let bounds = Bounds::of(points)?;
    match mode {
        SubdivisionMode::VertexFilter => {
            let mid = bounds.mid();
            Ok(points.iter().copied().filter(|p| keeps(step, mid, *p)).collect())
        }
        SubdivisionMode::BoundingBox => Ok(slice_box(step, bounds).corners()),
    }
}

/// Applies `steps` in order, outermost first.
pub fn subdivide_steps(
    parent: &[Point],
    steps: &[Aliquot],
    mode: SubdivisionMode,
) -> Result<Vec<Point>, GeoError> {
    Bounds::of(parent)?;
    let mut current = parent.to_vec();
    for step in steps {
        current = apply_step(&current, *step, mode)?;
    }
    Ok(current)
}

/// Quarter, quarter-quarter, then half, using the vertex filter.
pub fn subdivide(parent: &[Point], subdivision: &Subdivision) -> Result<Vec<Point>, GeoError> {
    subdivide_steps(parent, &subdivision.steps(), SubdivisionMode::VertexFilter)
}

pub fn subdivide_with(
    parent: &[Point],
    subdivision: &Subdivision,
    mode: SubdivisionMode,
) -> Result<Vec<Point>, GeoError> {
    subdivide_steps(parent, &subdivision.steps(), mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 0.0),
        ]
    }

    #[test]
    fn ne_quarter_of_square_keeps_the_ne_corner() {
        let sub = Subdivision {
            quarter: Some(Quarter::NE),
            ..Subdivision::default()
        };
        let out = subdivide(&square(), &sub).unwrap();
        assert_eq!(out, vec![Point::new(2.0, 2.0)]);
    }

    #[test]
    fn west_half_keeps_both_west_corners() {
        let sub = Subdivision {
            half: Some(Half::W),
            ..Subdivision::default()
        };
        let out = subdivide(&square(), &sub).unwrap();
        assert_eq!(out, vec![Point::new(0.0, 0.0), Point::new(0.0, 2.0)]);
    }

    #[test]
    fn midline_vertices_belong_to_both_sides() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
        ];
        let steps = [Aliquot::Half(Half::E)];
        let east = subdivide_steps(&pts, &steps, SubdivisionMode::VertexFilter).unwrap();
        assert_eq!(east, vec![Point::new(1.0, 1.0), Point::new(2.0, 2.0)]);
    }

    #[test]
    fn bounding_box_mode_returns_the_slice_rectangle() {
        let sub = Subdivision {
            quarter: Some(Quarter::SW),
            quarter_quarter: Some(Quarter::NE),
            half: None,
        };
        let out = subdivide_with(&square(), &sub, SubdivisionMode::BoundingBox).unwrap();
        assert_eq!(
            out,
            vec![
                Point::new(0.5, 0.5),
                Point::new(0.5, 1.0),
                Point::new(1.0, 1.0),
                Point::new(1.0, 0.5),
            ]
        );
    }

    #[test]
    fn empty_parent_and_nan_are_rejected() {
        let sub = Subdivision::default();
        assert!(matches!(subdivide(&[], &sub), Err(GeoError::EmptyParent)));
        let bad = [Point::new(f64::NAN, 1.0)];
        assert!(matches!(
            subdivide(&bad, &sub),
            Err(GeoError::BadCoordinates(_))
        ));
    }

    #[test]
    fn from_steps_rejects_half_before_quarter() {
        let ok = Subdivision::from_steps(&[
            Aliquot::Quarter(Quarter::SW),
            Aliquot::Quarter(Quarter::NE),
            Aliquot::Half(Half::E),
        ])
        .unwrap();
        assert_eq!(ok.quarter, Some(Quarter::SW));
        assert_eq!(ok.quarter_quarter, Some(Quarter::NE));
        assert_eq!(ok.half, Some(Half::E));

        let err = Subdivision::from_steps(&[Aliquot::Half(Half::N), Aliquot::Quarter(Quarter::NE)]);
        assert!(matches!(err, Err(GeoError::Parse(_))));
    }

    #[test]
    fn mode_parses_from_cli_names() {
        assert_eq!("bbox".parse::<SubdivisionMode>().unwrap(), SubdivisionMode::BoundingBox);
        assert_eq!(SubdivisionMode::default(), SubdivisionMode::VertexFilter);
    }
}
