// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Human-readable error messages for the capture client.
//
// Every technical error is mapped to plain English with a clear suggestion.
// Severity drives how the mobile client presents it.

use crate::error::CaptureError;

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Something went wrong on our side; trying again may help.
    Transient,
    /// The user must change something (framing, lighting, file).
    ActionRequired,
    /// Retrying the same request will not help.
    Permanent,
}

/// A human-readable error with plain English message and actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    /// Plain English summary (shown as a heading).
    pub message: String,
    /// What the user should try (shown as body text).
    pub suggestion: String,
    /// Whether the client may retry the same upload as-is.
    pub retriable: bool,
    pub severity: Severity,
}

/// Convert a `CaptureError` into a `HumanError` for the capture screen.
pub fn humanize_error(err: &CaptureError) -> HumanError {
    match err {
        CaptureError::NoPaperDetected => HumanError {
            message: "We couldn't find your paper.".into(),
            suggestion: "Place the whole sheet in view on a darker surface, with all four corners visible, and try again.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        CaptureError::InvalidInput(detail) => HumanError {
            message: "This photo can't be used.".into(),
            suggestion: format!("Take a new colour photo (JPEG or PNG) and try again. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        CaptureError::Overlay(detail) => humanize_overlay_error(detail),

        CaptureError::Codec(_) => HumanError {
            message: "We couldn't prepare the preview image.".into(),
            suggestion: "Try again. If this keeps happening, please report it.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        CaptureError::GeometryPrecondition(_) | CaptureError::InvalidResult(_) => HumanError {
            message: "Something went wrong while straightening your photo.".into(),
            suggestion: "Try taking the photo again from a slightly different angle.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        CaptureError::Config(detail) => HumanError {
            message: "The capture service is misconfigured.".into(),
            suggestion: format!("Please report this to whoever runs the service. ({detail})"),
            retriable: false,
            severity: Severity::Permanent,
        },

        CaptureError::Server(_) => HumanError {
            message: "The capture service had a problem.".into(),
            suggestion: "Wait a moment and try again.".into(),
            retriable: true,
            severity: Severity::Transient,
        },

        CaptureError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                HumanError {
                    message: "A file the service needs couldn't be found.".into(),
                    suggestion: "Check the reference drawing still exists, then try again.".into(),
                    retriable: false,
                    severity: Severity::ActionRequired,
                }
            } else {
                HumanError {
                    message: "There was a problem reading or writing a file.".into(),
                    suggestion: "Try again. If this keeps happening, please report it.".into(),
                    retriable: true,
                    severity: Severity::Transient,
                }
            }
        }

        CaptureError::Serialization(_) => HumanError {
            message: "The service had an internal data problem.".into(),
            suggestion: "Try again. If this keeps happening, please report it.".into(),
            retriable: true,
            severity: Severity::Transient,
        },
    }
}

/// Reference-drawing failures are split by cause: a missing file needs a
/// different step than a file that exists but won't decode.
fn humanize_overlay_error(detail: &str) -> HumanError {
    let lower = detail.to_ascii_lowercase();

    if lower.contains("not found") || lower.contains("no such file") {
        HumanError {
            message: "We couldn't find the reference drawing.".into(),
            suggestion: "Choose the drawing step again, then retake the photo.".into(),
            retriable: false,
            severity: Severity::ActionRequired,
        }
    } else if lower.contains("outside") || lower.contains("disabled") {
        HumanError {
            message: "That reference drawing isn't available.".into(),
            suggestion: "Pick one of the drawings offered in the app.".into(),
            retriable: false,
            severity: Severity::Permanent,
        }
    } else {
        HumanError {
            message: "We couldn't draw the reference image over your photo.".into(),
            suggestion: format!("Your photo was fine; try again, or continue without the guide. (Detail: {detail})"),
            retriable: true,
            severity: Severity::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_paper_is_action_required() {
        let human = humanize_error(&CaptureError::NoPaperDetected);
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(!human.retriable);
    }

    #[test]
    fn missing_overlay_file_is_action_required() {
        let err = CaptureError::Overlay("overlay file not found: step3.png".into());
        assert_eq!(humanize_error(&err).severity, Severity::ActionRequired);
    }

    #[test]
    fn undecodable_overlay_is_transient() {
        let err = CaptureError::Overlay("failed to decode overlay: bad PNG signature".into());
        let human = humanize_error(&err);
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.suggestion.contains("bad PNG signature"));
    }

    #[test]
    fn invalid_input_mentions_detail() {
        let err = CaptureError::InvalidInput("frame is 0x0".into());
        assert!(humanize_error(&err).suggestion.contains("0x0"));
    }

    #[test]
    fn config_error_is_permanent() {
        let err = CaptureError::Config("output_size must be at least 2".into());
        assert_eq!(humanize_error(&err).severity, Severity::Permanent);
    }
}
