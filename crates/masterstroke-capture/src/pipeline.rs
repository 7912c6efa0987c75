// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capture orchestration -- detect, rectify, normalize, overlay, encode.

use std::time::{Duration, Instant};

use image::{DynamicImage, RgbImage};
use masterstroke_core::error::{CaptureError, Result};
use masterstroke_core::{CaptureConfig, Homography, QualityAssessment, Quad, StrategyKind};
use tracing::{info, instrument, warn};

use crate::codec;
use crate::detect::{DetectionCandidate, QuadArbiter};
use crate::lighting::normalize_color;
use crate::overlay::{OverlaySource, blend_overlay};
use crate::rectify::rectify;

/// Outcome of a successful capture.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    flat: RgbImage,
    homography: Homography,
    quad: Quad,
    strategy: StrategyKind,
    alignment_score: f64,
    preview_png: Vec<u8>,
    elapsed: Duration,
}

impl CaptureResult {
    /// Package a capture, rejecting an image that is not `size`x`size` and a
    /// score outside [0, 1].
    pub fn new(
        flat: RgbImage,
        size: u32,
        homography: Homography,
        detection: DetectionCandidate,
        alignment_score: f64,
        preview_png: Vec<u8>,
        elapsed: Duration,
    ) -> Result<Self> {
        let (width, height) = flat.dimensions();
        if size == 0 || width != size || height != size {
            return Err(CaptureError::InvalidResult(format!(
                "expected a {size}x{size} image, got {width}x{height}"
            )));
        }
        if !(0.0..=1.0).contains(&alignment_score) {
            return Err(CaptureError::InvalidResult(format!(
                "alignment score must be within [0, 1], got {alignment_score}"
            )));
        }
        if homography.to_flat().iter().any(|c| !c.is_finite()) {
            return Err(CaptureError::InvalidResult(
                "homography has non-finite coefficients".into(),
            ));
        }
        Ok(Self {
            flat,
            homography,
            quad: detection.quad,
            strategy: detection.strategy,
            alignment_score,
            preview_png,
            elapsed,
        })
    }

    /// Rectified, lighting-normalized sheet without the overlay.
    pub fn flat(&self) -> &RgbImage {
        &self.flat
    }

    pub fn homography(&self) -> &Homography {
        &self.homography
    }

    /// Detected sheet corners in the input frame.
    pub fn quad(&self) -> &Quad {
        &self.quad
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Sheet area divided by frame area.
    pub fn alignment_score(&self) -> f64 {
        self.alignment_score
    }

    /// PNG of the preview shown to the user (overlay included).
    pub fn preview_png(&self) -> &[u8] {
        &self.preview_png
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn quality(&self) -> QualityAssessment {
        assess_quality(self.alignment_score)
    }

    pub fn into_flat(self) -> RgbImage {
        self.flat
    }
}

/// Classify an alignment score into user feedback.
pub fn assess_quality(score: f64) -> QualityAssessment {
    QualityAssessment::from_score(score)
}

/// The guided capture pipeline. Holds no per-call state; one instance can
/// serve any number of captures.
pub struct CapturePipeline {
    config: CaptureConfig,
    arbiter: QuadArbiter,
}

impl CapturePipeline {
    /// Returns `Config` when `config` fails validation.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        config.validate()?;
        let arbiter = QuadArbiter::new(&config);
        Ok(Self { config, arbiter })
    }

    /// Pipeline with a custom arbiter (e.g. a reduced strategy set).
    pub fn with_arbiter(config: CaptureConfig, arbiter: QuadArbiter) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, arbiter })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Run a full capture on `frame`, blending `overlay` into the preview
    /// when given.
    #[instrument(skip_all, fields(width = frame.width(), height = frame.height()))]
    pub fn run(
        &self,
        frame: &DynamicImage,
        overlay: Option<&dyn OverlaySource>,
    ) -> Result<CaptureResult> {
        let started = Instant::now();
        let rgb = self.validate_frame(frame)?;

        let detection = self
            .arbiter
            .detect(&rgb)
            .ok_or(CaptureError::NoPaperDetected)?;

        let frame_area = rgb.width() as f64 * rgb.height() as f64;
        let alignment_score = (detection.quad.area() / frame_area).clamp(0.0, 1.0);

        let size = self.config.output_size;
        let (warped, homography) = rectify(&rgb, detection.quad.corners(), size)?;
        let flat = normalize_color(&warped);

        let preview_png = match overlay {
            Some(source) => {
                let rendered = source.render(size, size)?;
                let preview = blend_overlay(&flat, Some(&rendered), self.config.overlay_opacity)?;
                codec::encode_png(&preview)?
            }
            None => codec::encode_png(&flat)?,
        };

        let elapsed = started.elapsed();
        self.report_latency(elapsed, detection.strategy, alignment_score);

        CaptureResult::new(
            flat,
            size,
            homography,
            detection,
            alignment_score,
            preview_png,
            elapsed,
        )
    }

    fn validate_frame(&self, frame: &DynamicImage) -> Result<RgbImage> {
        let (width, height) = (frame.width(), frame.height());
        if width == 0 || height == 0 {
            return Err(CaptureError::InvalidInput(format!(
                "frame is empty ({width}x{height})"
            )));
        }
        let min_side = self.config.min_frame_side;
        if width < min_side || height < min_side {
            return Err(CaptureError::InvalidInput(format!(
                "frame is {width}x{height}; both sides must be at least {min_side}"
            )));
        }
        if !frame.color().has_color() {
            return Err(CaptureError::InvalidInput(format!(
                "expected a colour frame, got {:?}",
                frame.color()
            )));
        }
        Ok(frame.to_rgb8())
    }

    fn report_latency(&self, elapsed: Duration, strategy: StrategyKind, alignment_score: f64) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        let budget_ms = self.config.latency_budget_ms;
        if elapsed > Duration::from_millis(budget_ms) {
            warn!(elapsed_ms, budget_ms, %strategy, alignment_score, "Capture exceeded latency budget");
        } else {
            info!(elapsed_ms, %strategy, alignment_score, "Capture complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage};
    use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
    use imageproc::point::Point as RasterPoint;
    use imageproc::rect::Rect;
    use masterstroke_core::Point;

    use crate::overlay::StaticOverlay;

    fn small_config() -> CaptureConfig {
        CaptureConfig {
            output_size: 256,
            ..CaptureConfig::default()
        }
    }

    fn synthetic_sample() -> DynamicImage {
        let mut frame = RgbImage::from_pixel(900, 1200, Rgb([128, 128, 128]));
        let sheet = [
            RasterPoint::new(200, 150),
            RasterPoint::new(700, 180),
            RasterPoint::new(680, 950),
            RasterPoint::new(180, 920),
        ];
        draw_polygon_mut(&mut frame, &sheet, Rgb([255, 255, 255]));
        DynamicImage::ImageRgb8(frame)
    }

    fn detection_for(quad: Quad) -> DetectionCandidate {
        DetectionCandidate {
            quad,
            strategy: StrategyKind::Edge,
            area_ratio: 0.5,
        }
    }

    fn unit_quad() -> Quad {
        Quad::new([
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ])
    }

    #[test]
    fn synthetic_sample_produces_full_result() {
        let pipeline = CapturePipeline::new(CaptureConfig::default()).unwrap();
        let result = pipeline.run(&synthetic_sample(), None).unwrap();

        assert_eq!(result.flat().dimensions(), (1080, 1080));
        assert!(result.alignment_score() >= 0.2 && result.alignment_score() <= 1.0);
        assert!(result.quad().top_left().distance(&Point::new(200.0, 150.0)) < 12.0);
        assert_eq!(&result.preview_png()[..4], b"\x89PNG");
        assert!(result.quality().accepted);
    }

    #[test]
    fn detected_sheet_rectifies_to_paper() {
        let frame = synthetic_sample().to_rgb8();
        let detection = QuadArbiter::new(&CaptureConfig::default())
            .detect(&frame)
            .unwrap();
        let (warped, _) = rectify(&frame, detection.quad.corners(), 1080).unwrap();

        // Detection may sit slightly outside the true outline, so the outer
        // rows can pick up some background; they must still read as paper.
        let band = 20;
        let mut sum = 0.0;
        let mut count = 0.0;
        for y in 0..1080 {
            for x in 0..1080 {
                if x < band || y < band || x >= 1080 - band || y >= 1080 - band {
                    sum += warped.get_pixel(x, y).0[0] as f64;
                    count += 1.0;
                }
            }
        }
        let border_mean = sum / count;
        assert!(border_mean > 128.0, "border mean {border_mean}");
    }

    #[test]
    fn homography_sends_detected_corners_to_output_corners() {
        let pipeline = CapturePipeline::new(small_config()).unwrap();
        let result = pipeline.run(&synthetic_sample(), None).unwrap();
        let far = 255.0;
        let targets = [
            Point::new(0.0, 0.0),
            Point::new(far, 0.0),
            Point::new(far, far),
            Point::new(0.0, far),
        ];
        for (corner, target) in result.quad().corners().iter().zip(targets) {
            let mapped = result.homography().project(*corner).unwrap();
            assert!(mapped.distance(&target) < 0.5);
        }
    }

    #[test]
    fn uniform_frame_is_a_detection_failure() {
        let frame = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([128, 128, 128])));
        let err = CapturePipeline::new(small_config()).unwrap().run(&frame, None).unwrap_err();
        assert!(err.is_detection_failure());
    }

    #[test]
    fn grayscale_frame_is_invalid_input() {
        let frame = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 100, Luma([90])));
        let err = CapturePipeline::new(small_config()).unwrap().run(&frame, None).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidInput(_)));
    }

    #[test]
    fn empty_and_tiny_frames_are_invalid_input() {
        let pipeline = CapturePipeline::new(small_config()).unwrap();
        let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let tiny = DynamicImage::ImageRgb8(RgbImage::new(8, 400));
        assert!(matches!(pipeline.run(&empty, None), Err(CaptureError::InvalidInput(_))));
        assert!(matches!(pipeline.run(&tiny, None), Err(CaptureError::InvalidInput(_))));
    }

    #[test]
    fn overlay_changes_preview_but_not_flat() {
        let pipeline = CapturePipeline::new(small_config()).unwrap();
        let frame = synthetic_sample();
        let plain = pipeline.run(&frame, None).unwrap();

        let ghost = StaticOverlay::new(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            256,
            256,
            Rgba([255, 0, 0, 255]),
        )));
        let ghosted = pipeline.run(&frame, Some(&ghost)).unwrap();

        assert_eq!(plain.flat(), ghosted.flat());
        assert_ne!(plain.preview_png(), ghosted.preview_png());

        let preview = codec::decode_frame(ghosted.preview_png()).unwrap().to_rgb8();
        let [r, g, _] = preview.get_pixel(128, 128).0;
        assert!(r > g);
    }

    #[test]
    fn failing_overlay_is_reported_as_overlay_error() {
        let pipeline = CapturePipeline::new(small_config()).unwrap();
        let missing = crate::overlay::RasterOverlay::new("/nonexistent/ghost.png");
        let err = pipeline.run(&synthetic_sample(), Some(&missing)).unwrap_err();
        assert!(matches!(err, CaptureError::Overlay(_)));
        assert!(!err.is_detection_failure());
    }

    #[test]
    fn dark_scene_is_brightened() {
        let mut frame = RgbImage::from_pixel(800, 600, Rgb([10, 10, 10]));
        draw_filled_rect_mut(&mut frame, Rect::at(150, 100).of_size(500, 400), Rgb([45, 45, 45]));
        let result = CapturePipeline::new(small_config())
            .unwrap()
            .run(&DynamicImage::ImageRgb8(frame), None)
            .unwrap();

        let flat = result.flat();
        assert!(flat.get_pixel(128, 128).0[1] > 90);
        let mean = flat.pixels().map(|p| p.0[1] as f64).sum::<f64>() / flat.pixels().len() as f64;
        assert!(mean > 80.0, "mean {mean}");
    }

    #[test]
    fn repeated_runs_are_identical() {
        let pipeline = CapturePipeline::new(small_config()).unwrap();
        let frame = synthetic_sample();
        let a = pipeline.run(&frame, None).unwrap();
        let b = pipeline.run(&frame, None).unwrap();
        assert_eq!(a.quad(), b.quad());
        assert_eq!(a.flat(), b.flat());
        assert_eq!(a.alignment_score(), b.alignment_score());
    }

    #[test]
    fn result_rejects_out_of_range_score() {
        let err = CaptureResult::new(
            RgbImage::new(4, 4),
            4,
            Homography::IDENTITY,
            detection_for(unit_quad()),
            1.2,
            Vec::new(),
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidResult(_)));
    }

    #[test]
    fn result_rejects_non_square_image() {
        let err = CaptureResult::new(
            RgbImage::new(4, 5),
            4,
            Homography::IDENTITY,
            detection_for(unit_quad()),
            0.5,
            Vec::new(),
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidResult(_)));
    }

    #[test]
    fn result_rejects_image_of_the_wrong_size() {
        let err = CaptureResult::new(
            RgbImage::new(4, 4),
            8,
            Homography::IDENTITY,
            detection_for(unit_quad()),
            0.5,
            Vec::new(),
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, CaptureError::InvalidResult(ref msg) if msg.contains("8x8")));

        let ok = CaptureResult::new(
            RgbImage::new(8, 8),
            8,
            Homography::IDENTITY,
            detection_for(unit_quad()),
            0.5,
            Vec::new(),
            Duration::ZERO,
        );
        assert!(ok.is_ok());
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let zero_target = CaptureConfig {
            downscale_target: 0,
            ..CaptureConfig::default()
        };
        assert!(matches!(
            CapturePipeline::new(zero_target),
            Err(CaptureError::Config(_))
        ));

        let opaque = CaptureConfig {
            overlay_opacity: 1.5,
            ..small_config()
        };
        let arbiter = QuadArbiter::new(&opaque);
        assert!(matches!(
            CapturePipeline::with_arbiter(opaque, arbiter),
            Err(CaptureError::Config(_))
        ));
    }

    #[test]
    fn quality_assessment_matches_feedback_bands() {
        assert!(!assess_quality(0.15).accepted);
        assert_eq!(assess_quality(0.6).message, "Excellent capture!");
        assert!(assess_quality(0.95).message.starts_with("Warning"));
    }
}
