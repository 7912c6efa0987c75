// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Quad arbiter -- runs every detection strategy, selects a quad from each,
// and keeps the candidate covering the largest share of the frame.

use std::panic::{AssertUnwindSafe, catch_unwind};

use image::RgbImage;
use masterstroke_core::{CaptureConfig, Quad, StrategyKind};
use rayon::prelude::*;
use tracing::{debug, info, instrument};

use super::selector::QuadSelector;
use super::strategies::{DetectionStrategy, StrategyError, StrategyOutput, default_strategies};

/// A quad proposed by one strategy, in full-frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionCandidate {
    pub quad: Quad,
    pub strategy: StrategyKind,
    /// Quad area divided by frame area.
    pub area_ratio: f64,
}

/// Runs the strategies and arbitrates between their candidates.
pub struct QuadArbiter {
    strategies: Vec<Box<dyn DetectionStrategy>>,
    selector: QuadSelector,
    parallel: bool,
}

impl QuadArbiter {
    /// Arbiter over the four standard strategies.
    pub fn new(config: &CaptureConfig) -> Self {
        Self::with_strategies(default_strategies(config), config)
    }

    /// Arbiter over a custom strategy list. List order decides ties.
    pub fn with_strategies(
        strategies: Vec<Box<dyn DetectionStrategy>>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            strategies,
            selector: QuadSelector::from_config(config),
            parallel: config.parallel_strategies,
        }
    }

    /// Every accepted candidate, in strategy order.
    pub fn candidates(&self, frame: &RgbImage) -> Vec<DetectionCandidate> {
        let outputs: Vec<(StrategyKind, Result<StrategyOutput, StrategyError>)> = if self.parallel {
            self.strategies
                .par_iter()
                .map(|strategy| (strategy.kind(), run_isolated(strategy.as_ref(), frame)))
                .collect()
        } else {
            self.strategies
                .iter()
                .map(|strategy| (strategy.kind(), run_isolated(strategy.as_ref(), frame)))
                .collect()
        };

        outputs
            .into_iter()
            .filter_map(|(kind, output)| match output {
                Ok(output) => self.candidate_from(kind, &output, frame),
                Err(err) => {
                    debug!(strategy = %kind, error = %err, "Strategy abstained");
                    None
                }
            })
            .collect()
    }

    /// The candidate with the highest area ratio, or `None` when no strategy
    /// found paper.
    #[instrument(skip_all, fields(width = frame.width(), height = frame.height()))]
    pub fn detect(&self, frame: &RgbImage) -> Option<DetectionCandidate> {
        let mut best: Option<DetectionCandidate> = None;
        for candidate in self.candidates(frame) {
            if best.is_none_or(|b| candidate.area_ratio > b.area_ratio) {
                best = Some(candidate);
            }
        }

        match &best {
            Some(winner) => info!(
                strategy = %winner.strategy,
                area_ratio = winner.area_ratio,
                "Paper detected"
            ),
            None => info!("No paper detected"),
        }
        best
    }

    fn candidate_from(
        &self,
        kind: StrategyKind,
        output: &StrategyOutput,
        frame: &RgbImage,
    ) -> Option<DetectionCandidate> {
        let quad = self
            .selector
            .select(&output.contours, output.width, output.height)?;
        let quad = if output.scale != 1.0 {
            quad.scaled(1.0 / output.scale)
        } else {
            quad
        };

        let frame_area = frame.width() as f64 * frame.height() as f64;
        let area_ratio = quad.area() / frame_area;
        if area_ratio <= self.selector.min_area_ratio || area_ratio >= self.selector.max_area_ratio {
            debug!(strategy = %kind, area_ratio, "Candidate outside area bounds");
            return None;
        }

        debug!(strategy = %kind, area_ratio, "Candidate accepted");
        Some(DetectionCandidate {
            quad,
            strategy: kind,
            area_ratio,
        })
    }
}

/// Run one strategy, turning a panic inside the image toolkit into an error
/// so the remaining strategies still get their say.
fn run_isolated(
    strategy: &dyn DetectionStrategy,
    frame: &RgbImage,
) -> Result<StrategyOutput, StrategyError> {
    catch_unwind(AssertUnwindSafe(|| strategy.contours(frame))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(StrategyError::Panicked {
            strategy: strategy.kind(),
            message,
        })
    })
}
