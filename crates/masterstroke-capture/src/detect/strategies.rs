// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Detection strategies -- four independent ways of turning a frame into
// candidate paper outlines. Each exploits a different signal so that at least
// one survives poor lighting, low contrast, or a cluttered background.

use image::{GrayImage, RgbImage};
use imageproc::contrast::{ThresholdType, otsu_level, threshold};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::bilateral_filter;
use imageproc::morphology::{close, open};
use imageproc::stats::percentile;
use masterstroke_core::{CaptureConfig, StrategyKind};
use thiserror::Error;
use tracing::{debug, instrument};

use super::primitives::{
    Contour, downscale, external_contours, morphological_gradient, whiteness_mask,
};

/// Why a strategy produced no output. The arbiter treats every variant as an
/// abstention.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("frame is empty ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("{strategy} strategy panicked: {message}")]
    Panicked {
        strategy: StrategyKind,
        message: String,
    },
}

/// Contours found by one strategy, in the coordinates of the image the
/// strategy actually processed.
#[derive(Debug, Clone)]
pub struct StrategyOutput {
    pub contours: Vec<Contour>,
    /// Dimensions of the processed image.
    pub width: u32,
    pub height: u32,
    /// Factor applied to the input frame before tracing (1.0 when none).
    pub scale: f64,
}

impl StrategyOutput {
    fn unscaled(contours: Vec<Contour>, frame: &RgbImage) -> Self {
        Self {
            contours,
            width: frame.width(),
            height: frame.height(),
            scale: 1.0,
        }
    }
}

/// A way of extracting candidate outlines from a frame.
///
/// Implementations must not share intermediate results with each other.
pub trait DetectionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn contours(&self, frame: &RgbImage) -> Result<StrategyOutput, StrategyError>;
}

/// The four strategies in arbitration order.
pub fn default_strategies(config: &CaptureConfig) -> Vec<Box<dyn DetectionStrategy>> {
    vec![
        Box::new(EdgeStrategy::from_config(config)),
        Box::new(ThresholdStrategy),
        Box::new(ColorStrategy::default()),
        Box::new(MorphologyStrategy),
    ]
}

fn ensure_non_empty(frame: &RgbImage) -> Result<(), StrategyError> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(StrategyError::EmptyFrame {
            width: frame.width(),
            height: frame.height(),
        });
    }
    Ok(())
}

fn to_gray(frame: &RgbImage) -> GrayImage {
    image::imageops::grayscale(frame)
}

// -- Edge ---------------------------------------------------------------------

/// Canny edges on a bilateral-smoothed intensity image. The edge map is
/// dilated to bridge small gaps in the paper outline and eroded back by the
/// same amount so the traced border stays on the edge itself.
#[derive(Debug, Clone)]
pub struct EdgeStrategy {
    downscale_threshold: u32,
    downscale_target: u32,
}

impl EdgeStrategy {
    const SMOOTHING_WINDOW: u32 = 9;
    const SMOOTHING_SIGMA_COLOR: f32 = 75.0;
    const SMOOTHING_SIGMA_SPATIAL: f32 = 75.0;
    // Two passes of a 5x5 square.
    const BRIDGE_RADIUS: u8 = 4;

    pub fn new(downscale_threshold: u32, downscale_target: u32) -> Self {
        Self {
            downscale_threshold,
            downscale_target,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.downscale_threshold, config.downscale_target)
    }
}

impl Default for EdgeStrategy {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

impl DetectionStrategy for EdgeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Edge
    }

    #[instrument(skip_all, name = "edge_strategy")]
    fn contours(&self, frame: &RgbImage) -> Result<StrategyOutput, StrategyError> {
        ensure_non_empty(frame)?;
        let (gray, scale) = downscale(
            &to_gray(frame),
            self.downscale_threshold,
            self.downscale_target,
        );

        let smoothed = bilateral_filter(
            &gray,
            Self::SMOOTHING_WINDOW,
            Self::SMOOTHING_SIGMA_COLOR,
            Self::SMOOTHING_SIGMA_SPATIAL,
        );
        let median = percentile(&smoothed, 50) as f32;
        let lower = (0.67 * median).clamp(0.0, 255.0);
        let upper = (1.33 * median).clamp(0.0, 255.0);
        let edges = canny(&smoothed, lower, upper);
        let bridged = close(&edges, Norm::LInf, Self::BRIDGE_RADIUS);

        let contours = external_contours(&bridged);
        debug!(scale, median, lower, upper, contours = contours.len(), "Edge contours traced");
        Ok(StrategyOutput {
            contours,
            width: gray.width(),
            height: gray.height(),
            scale,
        })
    }
}

// -- Threshold ----------------------------------------------------------------

/// Global Otsu binarization cleaned up with a close and an open.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdStrategy;

impl DetectionStrategy for ThresholdStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Threshold
    }

    #[instrument(skip_all, name = "threshold_strategy")]
    fn contours(&self, frame: &RgbImage) -> Result<StrategyOutput, StrategyError> {
        ensure_non_empty(frame)?;
        let gray = to_gray(frame);
        let level = otsu_level(&gray);
        let binary = threshold(&gray, level, ThresholdType::Binary);
        let cleaned = open(&close(&binary, Norm::LInf, 2), Norm::LInf, 2);

        let contours = external_contours(&cleaned);
        debug!(level, contours = contours.len(), "Threshold contours traced");
        Ok(StrategyOutput::unscaled(contours, frame))
    }
}

// -- Color --------------------------------------------------------------------

/// Bright, unsaturated pixels: white paper against a coloured or dark surface.
#[derive(Debug, Clone, Copy)]
pub struct ColorStrategy {
    pub max_saturation: u8,
    pub min_value: u8,
}

impl Default for ColorStrategy {
    fn default() -> Self {
        Self {
            max_saturation: 30,
            min_value: 180,
        }
    }
}

impl DetectionStrategy for ColorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Color
    }

    #[instrument(skip_all, name = "color_strategy")]
    fn contours(&self, frame: &RgbImage) -> Result<StrategyOutput, StrategyError> {
        ensure_non_empty(frame)?;
        let mask = whiteness_mask(frame, self.max_saturation, self.min_value);
        let cleaned = close(&mask, Norm::LInf, 2);

        let contours = external_contours(&cleaned);
        debug!(contours = contours.len(), "Color contours traced");
        Ok(StrategyOutput::unscaled(contours, frame))
    }
}

// -- Morphology ---------------------------------------------------------------

/// Morphological gradient, Otsu-binarized and closed with a large square so
/// the outline of the sheet becomes one connected band.
#[derive(Debug, Clone, Copy, Default)]
pub struct MorphologyStrategy;

impl MorphologyStrategy {
    const GRADIENT_RADIUS: u8 = 2;
    const CLOSE_RADIUS: u8 = 5;
}

impl DetectionStrategy for MorphologyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Morphology
    }

    #[instrument(skip_all, name = "morphology_strategy")]
    fn contours(&self, frame: &RgbImage) -> Result<StrategyOutput, StrategyError> {
        ensure_non_empty(frame)?;
        let gray = to_gray(frame);
        let gradient = morphological_gradient(&gray, Self::GRADIENT_RADIUS);
        let level = otsu_level(&gradient);
        let binary = threshold(&gradient, level, ThresholdType::Binary);
        let closed = close(&binary, Norm::LInf, Self::CLOSE_RADIUS);

        let contours = external_contours(&closed);
        debug!(level, contours = contours.len(), "Morphology contours traced");
        Ok(StrategyOutput::unscaled(contours, frame))
    }
}
