//! Geometry for the connecting line drawn through each group.

use std::collections::BTreeMap;

use serde::Serialize;

use super::Node;

/// Pixel size of one grid cell.
pub const CELL_SIZE: f32 = 50.0;

/// Minimum horizontal reach of Bezier control points, in pixels.
const MIN_CONTROL_OFFSET: f32 = CELL_SIZE * 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

pub fn cell_center(row: u32, col: u32) -> Point {
    Point {
        x: col as f32 * CELL_SIZE + CELL_SIZE / 2.0,
        y: row as f32 * CELL_SIZE + CELL_SIZE / 2.0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBezier {
    pub p0: Point,
    pub p1: Point,
    pub p2: Point,
    pub p3: Point,
}

impl CubicBezier {
    /// Horizontal S-curve between two centers; control points extend along x.
    pub fn between(start: Point, end: Point) -> Self {
        let offset = ((end.x - start.x).abs() * 0.5).max(MIN_CONTROL_OFFSET);
        let direction = if end.x >= start.x { 1.0 } else { -1.0 };

        Self {
            p0: start,
            p1: Point { x: start.x + offset * direction, y: start.y },
            p2: Point { x: end.x - offset * direction, y: end.y },
            p3: end,
        }
    }

    pub fn eval(&self, t: f32) -> Point {
        let t = t.clamp(0.0, 1.0);
        let u = 1.0 - t;
        let (a, b, c, d) = (u * u * u, 3.0 * u * u * t, 3.0 * u * t * t, t * t * t);

        Point {
            x: a * self.p0.x + b * self.p1.x + c * self.p2.x + d * self.p3.x,
            y: a * self.p0.y + b * self.p1.y + c * self.p2.y + d * self.p3.y,
        }
    }
}

/// The drawable path of one group, ordered by sequence index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupPath {
    pub group_id: String,
    pub color: String,
    pub points: Vec<Point>,
}

impl GroupPath {
    pub fn segments(&self) -> Vec<CubicBezier> {
        self.points
            .windows(2)
            .map(|pair| CubicBezier::between(pair[0], pair[1]))
            .collect()
    }

    /// `x,y x,y ...` for an SVG `<polyline points=...>`.
    pub fn polyline_points(&self) -> String {
        self.points
            .iter()
            .map(|p| format!("{},{}", p.x, p.y))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// SVG path data with one cubic segment per consecutive pair.
    pub fn svg_path(&self) -> String {
        let Some(first) = self.points.first() else {
            return String::new();
        };

        let mut data = format!("M {} {}", first.x, first.y);
        for segment in self.segments() {
            data.push_str(&format!(
                " C {} {} {} {} {} {}",
                segment.p1.x, segment.p1.y, segment.p2.x, segment.p2.y, segment.p3.x, segment.p3.y
            ));
        }
        data
    }
}

/// Builds paths for every group with at least two members.
///
/// `grouped` must already be ordered by sequence index within each group.
pub fn group_paths(grouped: &BTreeMap<String, Vec<Node>>) -> Vec<GroupPath> {
    grouped
        .iter()
        .filter(|(_, members)| members.len() >= 2)
        .map(|(group_id, members)| GroupPath {
            group_id: group_id.clone(),
            color: members[0].color.clone(),
            points: members.iter().map(|n| cell_center(n.row, n.col)).collect(),
        })
        .collect()
}
