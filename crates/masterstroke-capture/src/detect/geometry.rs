// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Polygon helpers for candidate selection: hull and closed-curve
// simplification on top of imageproc, interior angles, and vertex reduction.

use imageproc::geometry::{approximate_polygon_dp, convex_hull};
use masterstroke_core::{Point, polygon_area};

use super::primitives::Contour;

/// Convex hull of a traced contour.
///
/// Traced borders revisit pixels on one-pixel-wide runs. Repeated points are
/// removed first; the hull's angular sort needs distinct points.
pub fn contour_hull(contour: &[imageproc::point::Point<i32>]) -> Contour {
    let mut points = contour.to_vec();
    points.sort_unstable_by_key(|p| (p.y, p.x));
    points.dedup();
    convex_hull(points)
}

/// Douglas-Peucker simplification of a closed hull.
///
/// The hull is cut at its first vertex and the vertex farthest from it, and
/// each open chain is simplified on its own, so both anchors survive.
pub fn simplify_closed(hull: &[imageproc::point::Point<i32>], epsilon: f64) -> Contour {
    let n = hull.len();
    if n <= 3 || epsilon <= 0.0 {
        return hull.to_vec();
    }

    let origin = hull[0];
    let far = (1..n)
        .max_by_key(|&i| {
            let (dx, dy) = ((hull[i].x - origin.x) as i64, (hull[i].y - origin.y) as i64);
            dx * dx + dy * dy
        })
        .unwrap_or(1);

    let mut simplified = approximate_polygon_dp(&hull[..=far], epsilon, false);
    simplified.pop();

    let mut closing = hull[far..].to_vec();
    closing.push(origin);
    simplified.extend(approximate_polygon_dp(&closing, epsilon, false));
    simplified.pop();
    simplified
}

/// Raster vertices as sub-pixel points.
pub fn to_points(polygon: &[imageproc::point::Point<i32>]) -> Vec<Point> {
    polygon
        .iter()
        .map(|p| Point::new(p.x as f64, p.y as f64))
        .collect()
}

/// Interior angle in degrees at every vertex of a closed polygon.
pub fn interior_angles(polygon: &[Point]) -> Vec<f64> {
    let n = polygon.len();
    (0..n)
        .map(|i| {
            let prev = polygon[(i + n - 1) % n];
            let vertex = polygon[i];
            let next = polygon[(i + 1) % n];
            let (ax, ay) = (prev.x - vertex.x, prev.y - vertex.y);
            let (bx, by) = (next.x - vertex.x, next.y - vertex.y);
            let norms = (ax.hypot(ay) * bx.hypot(by)) + 1e-6;
            let cosine = ((ax * bx + ay * by) / norms).clamp(-1.0, 1.0);
            cosine.acos().to_degrees()
        })
        .collect()
}

/// Shrink a polygon to four vertices by repeatedly dropping the vertex whose
/// removal changes the enclosed area the least.
pub fn reduce_to_quad(mut polygon: Vec<Point>) -> Option<[Point; 4]> {
    if polygon.len() < 4 {
        return None;
    }
    while polygon.len() > 4 {
        let full = polygon_area(&polygon);
        let mut cheapest = 0;
        let mut smallest_change = f64::INFINITY;
        for i in 0..polygon.len() {
            let mut without = polygon.clone();
            without.remove(i);
            let change = (full - polygon_area(&without)).abs();
            if change < smallest_change {
                smallest_change = change;
                cheapest = i;
            }
        }
        polygon.remove(cheapest);
    }
    polygon.try_into().ok()
}
