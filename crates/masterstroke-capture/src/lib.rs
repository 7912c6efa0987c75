// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// masterstroke-capture -- Guided capture pipeline for MASTER-STROKE.
//
// Finds the sheet of paper in a camera frame (four independent detection
// strategies plus an arbiter), rectifies it to a square, normalizes its
// lighting, and optionally blends a reference drawing over the preview.

pub mod codec;
pub mod detect;
pub mod lighting;
pub mod overlay;
pub mod pipeline;
pub mod rectify;

// Re-export the primary entry points so callers can use
// `masterstroke_capture::CapturePipeline` etc.
pub use detect::{DetectionCandidate, QuadArbiter};
pub use lighting::{BrightnessProfile, normalize_color, normalize_lighting};
pub use overlay::{
    OverlaySource, RasterOverlay, StaticOverlay, SvgOverlay, blend_overlay, overlay_for_path,
};
pub use pipeline::{CapturePipeline, CaptureResult, assess_quality};
pub use rectify::rectify;
