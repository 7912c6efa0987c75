// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline and server configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// Tunables for a single capture run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Side length of the rectified square output, in pixels.
    pub output_size: u32,
    /// Opacity of the ghost overlay in the preview (0 = invisible, 1 = opaque).
    pub overlay_opacity: f32,
    /// The edge strategy downscales frames whose larger side exceeds this.
    pub downscale_threshold: u32,
    /// Larger side after downscaling.
    pub downscale_target: u32,
    /// Candidates at or below this fraction of the frame are rejected.
    pub min_area_ratio: f64,
    /// Candidates at or above this fraction of the frame are rejected.
    pub max_area_ratio: f64,
    /// Runs slower than this are reported at `warn` level.
    pub latency_budget_ms: u64,
    /// Run the four detection strategies concurrently.
    pub parallel_strategies: bool,
    /// Smallest accepted frame width/height.
    pub min_frame_side: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_size: 1080,
            overlay_opacity: 0.3,
            downscale_threshold: 1500,
            downscale_target: 1000,
            min_area_ratio: 0.10,
            max_area_ratio: 0.95,
            latency_budget_ms: 500,
            parallel_strategies: true,
            min_frame_side: 16,
        }
    }
}

impl CaptureConfig {
    /// Reject settings the pipeline cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.output_size < 2 {
            return Err(CaptureError::Config(format!(
                "output_size must be at least 2, got {}",
                self.output_size
            )));
        }
        if !(0.0..=1.0).contains(&self.overlay_opacity) {
            return Err(CaptureError::Config(format!(
                "overlay_opacity must be within [0, 1], got {}",
                self.overlay_opacity
            )));
        }
        if !(0.0 < self.min_area_ratio && self.min_area_ratio < self.max_area_ratio)
            || self.max_area_ratio > 1.0
        {
            return Err(CaptureError::Config(format!(
                "area ratio bounds must satisfy 0 < min < max <= 1, got ({}, {})",
                self.min_area_ratio, self.max_area_ratio
            )));
        }
        if self.downscale_target == 0 || self.downscale_target > self.downscale_threshold {
            return Err(CaptureError::Config(format!(
                "downscale_target must be in 1..={}, got {}",
                self.downscale_threshold, self.downscale_target
            )));
        }
        Ok(())
    }
}

/// Settings for the capture request handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Address to bind (default all interfaces).
    pub bind_address: String,
    /// Requests larger than this are rejected with 413.
    pub max_request_bytes: usize,
    /// Pipeline runs longer than this are reported as detection failures.
    pub request_timeout_ms: u64,
    /// Directory overlay files are resolved against. Overlays are disabled
    /// when unset.
    pub overlay_dir: Option<PathBuf>,
    /// Pipeline settings applied to every request.
    pub capture: CaptureConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".into(),
            max_request_bytes: 32 * 1024 * 1024,
            request_timeout_ms: 5_000,
            overlay_dir: None,
            capture: CaptureConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing keys take their default values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: ServerConfig = serde_json::from_str(&data)?;
        config.capture.validate()?;
        Ok(config)
    }

    /// Write the config as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}
