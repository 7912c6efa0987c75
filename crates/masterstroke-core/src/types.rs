// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the capture pipeline.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

use crate::error::{CaptureError, Result};

/// Unique identifier for a single capture request (log correlation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureId(pub Uuid);

impl CaptureId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CaptureId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CaptureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// -- Geometry -----------------------------------------------------------------

/// A point in image coordinates (x to the right, y downward).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Area of a simple polygon via the shoelace formula (always non-negative).
pub fn polygon_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        twice_area += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    twice_area.abs() / 2.0
}

/// Four corners of a detected sheet, always held in canonical order
/// `[top_left, top_right, bottom_right, bottom_left]`.
///
/// Serialized as a plain array of four points; deserialization re-orders
/// the corners, so input order does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[Point; 4]", into = "[Point; 4]")]
pub struct Quad {
    corners: [Point; 4],
}

impl Quad {
    /// Build a quad from four corners in any order.
    pub fn new(corners: [Point; 4]) -> Self {
        Self {
            corners: order_corners(corners),
        }
    }

    /// Build a quad from a point slice, which must hold exactly four points.
    pub fn from_points(points: &[Point]) -> Result<Self> {
        let corners: [Point; 4] = points.try_into().map_err(|_| {
            CaptureError::GeometryPrecondition(format!(
                "expected exactly 4 points, got {}",
                points.len()
            ))
        })?;
        Ok(Self::new(corners))
    }

    /// Corners in canonical order.
    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    pub fn top_right(&self) -> Point {
        self.corners[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.corners[3]
    }

    /// Enclosed area in square pixels.
    pub fn area(&self) -> f64 {
        polygon_area(&self.corners)
    }

    /// Re-apply canonical ordering. Idempotent.
    pub fn ordered(&self) -> Self {
        Self::new(self.corners)
    }

    /// Multiply every coordinate by `factor` (used to undo a detection downscale).
    pub fn scaled(&self, factor: f64) -> Self {
        Self::new(
            self.corners
                .map(|p| Point::new(p.x * factor, p.y * factor)),
        )
    }
}

impl TryFrom<[Point; 4]> for Quad {
    type Error = CaptureError;

    fn try_from(corners: [Point; 4]) -> Result<Self> {
        if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(CaptureError::GeometryPrecondition(
                "quad corners must have finite coordinates".into(),
            ));
        }
        Ok(Self::new(corners))
    }
}

impl From<Quad> for [Point; 4] {
    fn from(quad: Quad) -> Self {
        quad.corners
    }
}

/// Label four points as `[top_left, top_right, bottom_right, bottom_left]`.
///
/// Top-left has the smallest `x + y`, bottom-right the largest; top-right has
/// the smallest `y - x`, bottom-left the largest. Ties are broken on the raw
/// coordinates so the result never depends on input order. When the four
/// labels collide (a sheet rotated by ~45 degrees), the points are instead
/// sorted clockwise around their centroid, starting from the top-left label.
pub fn order_corners(points: [Point; 4]) -> [Point; 4] {
    let sum = |p: &Point| p.x + p.y;
    let diff = |p: &Point| p.y - p.x;

    let top_left = extreme_by(&points, sum, Ordering::Less);
    let bottom_right = extreme_by(&points, sum, Ordering::Greater);
    let top_right = extreme_by(&points, diff, Ordering::Less);
    let bottom_left = extreme_by(&points, diff, Ordering::Greater);

    let labelled = [top_left, top_right, bottom_right, bottom_left];
    let mut seen = labelled.to_vec();
    seen.sort_unstable();
    seen.dedup();
    if seen.len() == 4 {
        return labelled.map(|i| points[i]);
    }

    order_clockwise(points, top_left)
}

/// Index of the point with the extreme `key`, tie-broken on `(x, y)`.
fn extreme_by(points: &[Point; 4], key: impl Fn(&Point) -> f64, want: Ordering) -> usize {
    let compare = |a: &Point, b: &Point| {
        key(a)
            .total_cmp(&key(b))
            .then(a.x.total_cmp(&b.x))
            .then(a.y.total_cmp(&b.y))
    };
    let mut best = 0;
    for i in 1..4 {
        if compare(&points[i], &points[best]) == want {
            best = i;
        }
    }
    best
}

fn order_clockwise(points: [Point; 4], start: usize) -> [Point; 4] {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let angle = |p: &Point| (p.y - cy).atan2(p.x - cx);

    let mut sorted = points;
    // With y pointing down, increasing atan2 runs clockwise on screen.
    sorted.sort_by(|a, b| {
        angle(a)
            .total_cmp(&angle(b))
            .then(a.x.total_cmp(&b.x))
            .then(a.y.total_cmp(&b.y))
    });
    let offset = sorted
        .iter()
        .position(|p| *p == points[start])
        .unwrap_or(0);
    sorted.rotate_left(offset);
    sorted
}

/// 3x3 projective transform, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Homography(pub [[f64; 3]; 3]);

impl Homography {
    pub const IDENTITY: Homography =
        Homography([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    /// Map `p` through the transform. Returns `None` for points sent to infinity.
    pub fn project(&self, p: Point) -> Option<Point> {
        let m = &self.0;
        let w = m[2][0] * p.x + m[2][1] * p.y + m[2][2];
        if w.abs() < 1e-12 {
            return None;
        }
        Some(Point::new(
            (m[0][0] * p.x + m[0][1] * p.y + m[0][2]) / w,
            (m[1][0] * p.x + m[1][1] * p.y + m[1][2]) / w,
        ))
    }

    /// Rows of the matrix.
    pub fn as_rows(&self) -> &[[f64; 3]; 3] {
        &self.0
    }

    /// Flattened row-major coefficients.
    pub fn to_flat(&self) -> [f64; 9] {
        let m = &self.0;
        [
            m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
        ]
    }
}

// -- Detection ----------------------------------------------------------------

/// Signal family a candidate quad came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Canny edges on a smoothed intensity image.
    Edge,
    /// Global Otsu binarization.
    Threshold,
    /// Low-saturation, high-value colour mask.
    Color,
    /// Morphological gradient.
    Morphology,
}

impl StrategyKind {
    /// Every strategy, in arbitration order.
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::Edge,
        StrategyKind::Threshold,
        StrategyKind::Color,
        StrategyKind::Morphology,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Edge => "edge",
            Self::Threshold => "threshold",
            Self::Color => "color",
            Self::Morphology => "morphology",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// -- Quality feedback ---------------------------------------------------------

/// Feedback band for an alignment score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    /// Paper covers less than 20% of the frame.
    TooFar,
    /// Usable, but the user should move closer.
    MoveCloser,
    /// Paper nearly fills the frame; corners may be clipped.
    CheckCorners,
    Excellent,
}

/// Outcome of classifying an alignment score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub accepted: bool,
    pub band: QualityBand,
    pub message: String,
}

impl QualityAssessment {
    /// Classify an alignment score (paper area / frame area).
    pub fn from_score(score: f64) -> Self {
        let (accepted, band, message) = if score < 0.2 {
            (
                false,
                QualityBand::TooFar,
                "Paper too small or far away. Move closer to fill more of the frame.",
            )
        } else if score < 0.4 {
            (
                true,
                QualityBand::MoveCloser,
                "Good capture. For best results, move slightly closer.",
            )
        } else if score > 0.9 {
            (
                true,
                QualityBand::CheckCorners,
                "Warning: Paper very close to edges. Ensure all corners are visible.",
            )
        } else {
            (true, QualityBand::Excellent, "Excellent capture!")
        };
        Self {
            accepted,
            band,
            message: message.to_string(),
        }
    }
}

/// Status of the capture request handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}
