// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Candidate selection -- picks the contour that best looks like a sheet of
// paper: four roughly right-angled corners covering a plausible share of the
// frame.

use imageproc::geometry::{arc_length, contour_area};
use masterstroke_core::{CaptureConfig, Point, Quad, polygon_area};
use tracing::trace;

use super::geometry::{contour_hull, interior_angles, reduce_to_quad, simplify_closed, to_points};
use super::primitives::Contour;

/// Simplification tolerances, as fractions of the hull perimeter, tried in
/// order.
const EPSILON_FRACTIONS: [f64; 5] = [0.01, 0.02, 0.03, 0.04, 0.05];

/// Interior angles must fall within this range (degrees).
const MIN_CORNER_ANGLE: f64 = 45.0;
const MAX_CORNER_ANGLE: f64 = 135.0;

/// Area bounds, as exclusive fractions of the frame area.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadSelector {
    pub min_area_ratio: f64,
    pub max_area_ratio: f64,
}

impl Default for QuadSelector {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

impl QuadSelector {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            min_area_ratio: config.min_area_ratio,
            max_area_ratio: config.max_area_ratio,
        }
    }

    /// Largest acceptable quadrilateral among `contours`, canonically ordered.
    pub fn select(&self, contours: &[Contour], frame_width: u32, frame_height: u32) -> Option<Quad> {
        let frame_area = frame_width as f64 * frame_height as f64;
        if frame_area <= 0.0 {
            return None;
        }

        let mut best: Option<([Point; 4], f64)> = None;
        for contour in contours {
            if let Some((corners, area)) = self.best_for_contour(contour, frame_area) {
                if best.is_none_or(|(_, best_area)| area > best_area) {
                    best = Some((corners, area));
                }
            }
        }
        best.map(|(corners, _)| Quad::new(corners))
    }

    fn best_for_contour(&self, contour: &Contour, frame_area: f64) -> Option<([Point; 4], f64)> {
        if contour.len() < 4 {
            return None;
        }
        let hull = contour_hull(contour);
        if hull.len() < 4 {
            return None;
        }
        let perimeter = arc_length(&hull, true);

        let mut best: Option<([Point; 4], f64)> = None;
        let mut consider = |corners: [Point; 4], area: f64| {
            if best.is_none_or(|(_, best_area)| area > best_area) {
                best = Some((corners, area));
            }
        };

        for fraction in EPSILON_FRACTIONS {
            let approx = simplify_closed(&hull, fraction * perimeter);
            match approx.len() {
                4 => {
                    let area = contour_area(&approx);
                    let ratio = area / frame_area;
                    let polygon = to_points(&approx);
                    if ratio > self.min_area_ratio
                        && ratio < self.max_area_ratio
                        && is_roughly_rectangular(&polygon)
                    {
                        trace!(fraction, ratio, "Four-vertex candidate accepted");
                        if let Ok(corners) = polygon.try_into() {
                            consider(corners, area);
                        }
                        break;
                    }
                }
                5 | 6 => {
                    if let Some(corners) = reduce_to_quad(to_points(&approx)) {
                        let area = polygon_area(&corners);
                        if area / frame_area > self.min_area_ratio {
                            trace!(fraction, ratio = area / frame_area, "Reduced candidate accepted");
                            consider(corners, area);
                        }
                    }
                }
                _ => {}
            }
        }
        best
    }
}

/// Every interior angle within [45, 135] degrees.
pub fn is_roughly_rectangular(polygon: &[Point]) -> bool {
    interior_angles(polygon)
        .into_iter()
        .all(|angle| (MIN_CORNER_ANGLE..=MAX_CORNER_ANGLE).contains(&angle))
}

/// [`QuadSelector::select`] with the default area bounds.
pub fn select_quad(contours: &[Contour], frame_width: u32, frame_height: u32) -> Option<Quad> {
    QuadSelector::default().select(contours, frame_width, frame_height)
}
