// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// MASTER-STROKE -- Core types, configuration, and error definitions shared by
// the capture pipeline and the request handler.

pub mod config;
pub mod error;
pub mod human_errors;
pub mod types;

pub use config::{CaptureConfig, ServerConfig};
pub use error::CaptureError;
pub use types::*;
