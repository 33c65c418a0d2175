use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::simulation_engine::intersections::JunctionId;

/// Consecutive points closer than this are merged when building a polyline.
const POINT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn lerp(&self, other: &Point, t: f64) -> Point {
        Point::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }
}

/// A point on a lane together with the direction of travel (radians,
/// `atan2` convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub heading: f64,
}

/// Ordered points parameterised by cumulative arc length.
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline {
    points: Vec<Point>,
    cumulative: Vec<f64>,
}

impl Polyline {
    /// Builds a polyline, dropping repeated points. Returns `None` when fewer
    /// than two distinct points remain.
    pub fn new(points: Vec<Point>) -> Option<Self> {
        let mut distinct: Vec<Point> = Vec::with_capacity(points.len());
        for point in points {
            match distinct.last() {
                Some(last) if last.distance(&point) < POINT_EPSILON => {}
                _ => distinct.push(point),
            }
        }
        if distinct.len() < 2 {
            return None;
        }

        let mut cumulative = Vec::with_capacity(distinct.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for pair in distinct.windows(2) {
            total += pair[0].distance(&pair[1]);
            cumulative.push(total);
        }
        Some(Self {
            points: distinct,
            cumulative,
        })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn length(&self) -> f64 {
        self.cumulative[self.cumulative.len() - 1]
    }

    pub fn start(&self) -> Point {
        self.points[0]
    }

    pub fn end(&self) -> Point {
        self.points[self.points.len() - 1]
    }

    pub fn reversed(&self) -> Self {
        let mut points = self.points.clone();
        points.reverse();
        let total = self.length();
        let cumulative = self.cumulative.iter().rev().map(|c| total - c).collect();
        Self { points, cumulative }
    }

    pub fn start_heading(&self) -> f64 {
        piece_heading(&self.points[0], &self.points[1])
    }

    pub fn end_heading(&self) -> f64 {
        let n = self.points.len();
        piece_heading(&self.points[n - 2], &self.points[n - 1])
    }

    /// Position and heading at arc length `s`, clamped to `[0, length]`.
    pub fn sample(&self, s: f64) -> Pose {
        let last_piece = self.points.len() - 2;
        if !(s > 0.0) {
            return Pose {
                position: self.points[0],
                heading: self.start_heading(),
            };
        }
        if s >= self.length() {
            return Pose {
                position: self.end(),
                heading: self.end_heading(),
            };
        }

        let piece = self
            .cumulative
            .partition_point(|&c| c <= s)
            .saturating_sub(1)
            .min(last_piece);
        let a = &self.points[piece];
        let b = &self.points[piece + 1];
        let piece_length = self.cumulative[piece + 1] - self.cumulative[piece];
        let t = ((s - self.cumulative[piece]) / piece_length).clamp(0.0, 1.0);
        Pose {
            position: a.lerp(b, t),
            heading: piece_heading(a, b),
        }
    }
}

fn piece_heading(a: &Point, b: &Point) -> f64 {
    (b.y - a.y).atan2(b.x - a.x)
}

/// Smallest absolute difference between two headings, in `[0, PI]`.
pub fn heading_deviation(a: f64, b: f64) -> f64 {
    let tau = std::f64::consts::TAU;
    let diff = (a - b).rem_euclid(tau);
    diff.min(tau - diff)
}

/// Index of a lane in the network arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LaneId(pub u32);

impl LaneId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Direction of travel relative to the segment's point order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Textual lane reference used in the input tables: `S:0` for forward lane 0
/// of segment `S`, `S:r1` for reverse lane 1, and bare `S` for `S:0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LaneKey {
    pub segment: String,
    pub direction: Direction,
    pub index: usize,
}

impl LaneKey {
    pub fn new(segment: impl Into<String>, direction: Direction, index: usize) -> Self {
        Self {
            segment: segment.into(),
            direction,
            index,
        }
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            Direction::Forward => write!(f, "{}:{}", self.segment, self.index),
            Direction::Reverse => write!(f, "{}:r{}", self.segment, self.index),
        }
    }
}

impl FromStr for LaneKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty lane reference".to_string());
        }
        let Some((segment, lane)) = s.rsplit_once(':') else {
            return Ok(LaneKey::new(s, Direction::Forward, 0));
        };
        if segment.is_empty() {
            return Err(format!("lane reference `{s}` has no segment"));
        }
        let (direction, digits) = match lane.strip_prefix('r') {
            Some(rest) => (Direction::Reverse, rest),
            None => (Direction::Forward, lane),
        };
        let index = digits
            .parse::<usize>()
            .map_err(|_| format!("lane reference `{s}` has a bad lane index"))?;
        Ok(LaneKey::new(segment, direction, index))
    }
}

/// One direction of travel on one lane of a road segment.
#[derive(Debug, Clone)]
pub struct Lane {
    pub id: LaneId,
    pub key: LaneKey,
    /// Index of the owning segment in the network arena.
    pub segment: usize,
    /// Junction at the start of the lane.
    pub from: JunctionId,
    /// Junction at the end of the lane.
    pub to: JunctionId,
    pub geometry: Polyline,
    pub speed_limit: f64,
    /// Ordered by heading deviation; the first entry is the natural
    /// continuation.
    pub successors: Vec<LaneId>,
    pub predecessors: Vec<LaneId>,
}

impl Lane {
    pub fn length(&self) -> f64 {
        self.geometry.length()
    }

    pub fn direction(&self) -> Direction {
        self.key.direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn l_shape() -> Polyline {
        Polyline::new(vec![
            Point::new(0.0, 0.0),
            Point::new(30.0, 0.0),
            Point::new(30.0, 40.0),
        ])
        .unwrap()
    }

    #[test]
    fn rejects_single_distinct_point() {
        assert!(Polyline::new(vec![Point::new(1.0, 1.0), Point::new(1.0, 1.0)]).is_none());
        assert!(Polyline::new(vec![Point::new(1.0, 1.0)]).is_none());
    }

    #[test]
    fn samples_endpoints_exactly() {
        let line = l_shape();
        assert_abs_diff_eq!(line.length(), 70.0, epsilon = 1e-12);
        assert_eq!(line.sample(0.0).position, Point::new(0.0, 0.0));
        assert_eq!(line.sample(line.length()).position, Point::new(30.0, 40.0));
    }

    #[test]
    fn samples_interior_pieces() {
        let line = l_shape();
        let pose = line.sample(45.0);
        assert_abs_diff_eq!(pose.position.x, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.position.y, 15.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.heading, std::f64::consts::FRAC_PI_2, epsilon = 1e-9);

        let corner = line.sample(30.0);
        assert_abs_diff_eq!(corner.position.x, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(corner.position.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn sampling_is_monotonic_and_continuous() {
        let line = l_shape();
        let step = 0.01;
        let mut previous = line.sample(0.0).position;
        let mut s = step;
        while s <= line.length() {
            let current = line.sample(s).position;
            let moved = previous.distance(&current);
            assert!(moved <= step + 1e-9, "jump of {moved} at s={s}");
            assert!(moved > 0.0, "stalled at s={s}");
            previous = current;
            s += step;
        }
    }

    #[test]
    fn reversed_swaps_endpoints() {
        let line = l_shape().reversed();
        assert_eq!(line.start(), Point::new(30.0, 40.0));
        assert_eq!(line.end(), Point::new(0.0, 0.0));
        let pose = line.sample(20.0);
        assert_abs_diff_eq!(pose.position.y, 20.0, epsilon = 1e-9);
        assert_abs_diff_eq!(pose.heading, -std::f64::consts::FRAC_PI_2, epsilon = 1e-9);
    }

    #[test]
    fn parses_lane_keys() {
        assert_eq!(
            "A7".parse::<LaneKey>().unwrap(),
            LaneKey::new("A7", Direction::Forward, 0)
        );
        assert_eq!(
            "A7:2".parse::<LaneKey>().unwrap(),
            LaneKey::new("A7", Direction::Forward, 2)
        );
        assert_eq!(
            "A7:r1".parse::<LaneKey>().unwrap(),
            LaneKey::new("A7", Direction::Reverse, 1)
        );
        assert!("A7:x".parse::<LaneKey>().is_err());
        assert!(":1".parse::<LaneKey>().is_err());
        assert_eq!(LaneKey::new("B", Direction::Reverse, 0).to_string(), "B:r0");
    }

    #[test]
    fn heading_deviation_wraps() {
        assert_abs_diff_eq!(heading_deviation(3.1, -3.1), std::f64::consts::TAU - 6.2, epsilon = 1e-9);
        assert_abs_diff_eq!(heading_deviation(0.5, 0.5), 0.0, epsilon = 1e-12);
    }
}
