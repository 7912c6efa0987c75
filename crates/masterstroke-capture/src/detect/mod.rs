// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Paper detection -- strategies, candidate selection, and arbitration.

pub mod arbiter;
pub mod geometry;
pub mod primitives;
pub mod selector;
pub mod strategies;

pub use arbiter::{DetectionCandidate, QuadArbiter};
pub use selector::{QuadSelector, select_quad};
pub use strategies::{
    ColorStrategy, DetectionStrategy, EdgeStrategy, MorphologyStrategy, StrategyError,
    StrategyOutput, ThresholdStrategy, default_strategies,
};
