// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for the capture pipeline.

use thiserror::Error;

/// Top-level error type for all capture operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    // -- Caller errors --
    #[error("invalid input frame: {0}")]
    InvalidInput(String),

    // -- Expected outcome --
    #[error("failed to detect paper in image")]
    NoPaperDetected,

    // -- Programming errors upstream --
    #[error("geometry precondition violated: {0}")]
    GeometryPrecondition(String),

    #[error("invalid capture result: {0}")]
    InvalidResult(String),

    // -- External collaborators --
    #[error("overlay rendering failed: {0}")]
    Overlay(String),

    #[error("image codec failed: {0}")]
    Codec(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("capture server error: {0}")]
    Server(String),

    // -- Storage / transport --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CaptureError {
    /// `true` for the expected "no paper in frame" outcome.
    pub fn is_detection_failure(&self) -> bool {
        matches!(self, Self::NoPaperDetected)
    }

    /// HTTP status code the request handler reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_) => 400,
            Self::NoPaperDetected => 422,
            Self::Overlay(_) => 502,
            Self::GeometryPrecondition(_)
            | Self::InvalidResult(_)
            | Self::Codec(_)
            | Self::Config(_)
            | Self::Server(_)
            | Self::Io(_)
            | Self::Serialization(_) => 500,
        }
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CaptureError>;
