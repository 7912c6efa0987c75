// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Capture request handler -- accepts photos from the mobile client and
// answers with the rectified preview and alignment feedback.
//
// The server listens on a configurable TCP port (default 8000).  Each
// connection carries exactly one HTTP/1.1 request; the response always
// closes the connection.  The pipeline itself is CPU-bound, so every capture
// runs on the blocking pool under the configured request timeout.
//
// # Routes
//
//   - GET  /                  health check
//   - POST /capture           encoded JPEG/PNG body, optional X-Overlay-Path
//   - POST /capture/validate  alignment_score (form-encoded or JSON)
//   - OPTIONS <any route>     CORS preflight

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use masterstroke_capture::codec::decode_frame;
use masterstroke_capture::{CapturePipeline, CaptureResult, overlay_for_path};
use masterstroke_core::error::{CaptureError, Result};
use masterstroke_core::human_errors::humanize_error;
use masterstroke_core::{CaptureId, QualityAssessment, QualityBand, ServerConfig, ServerStatus, StrategyKind};

use crate::http::{HttpRequest, HttpResponse, ReadOutcome, read_request, send_response};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Name reported by the health check.
const SERVICE_NAME: &str = "MASTER-STROKE Capture API";

/// Header naming the reference drawing to blend into the preview.
pub const OVERLAY_HEADER: &str = "x-overlay-path";

/// Upload media types the pipeline accepts.
const ACCEPTED_MEDIA_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

/// Detail string for every 500 response; internals stay in the log.
const INTERNAL_ERROR_DETAIL: &str = "Internal server error";

const ROUTE_HEALTH: &str = "/";
const ROUTE_CAPTURE: &str = "/capture";
const ROUTE_VALIDATE: &str = "/capture/validate";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

/// Body of a successful `POST /capture`.
#[derive(Debug, Serialize)]
struct CaptureResponse {
    capture_id: String,
    alignment_score: f64,
    /// Base64-encoded PNG.
    preview_png: String,
    warp_matrix: [[f64; 3]; 3],
    quality_feedback: String,
    quality_valid: bool,
    quality_band: QualityBand,
    strategy: StrategyKind,
    elapsed_ms: u64,
}

impl CaptureResponse {
    fn from_result(result: &CaptureResult) -> Self {
        let QualityAssessment {
            accepted,
            band,
            message,
        } = result.quality();
        Self {
            capture_id: CaptureId::new().to_string(),
            alignment_score: result.alignment_score(),
            preview_png: BASE64.encode(result.preview_png()),
            warp_matrix: *result.homography().as_rows(),
            quality_feedback: message,
            quality_valid: accepted,
            quality_band: band,
            strategy: result.strategy(),
            elapsed_ms: u64::try_from(result.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidateRequest {
    alignment_score: f64,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    valid: bool,
    feedback: String,
    score: f64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

fn error_response(status: u16, detail: impl Into<String>, suggestion: Option<String>) -> HttpResponse {
    HttpResponse::json(
        status,
        &ErrorResponse {
            detail: detail.into(),
            suggestion,
        },
    )
}

/// Map a pipeline error to its response.  500s never leak the cause.
fn capture_error_response(err: &CaptureError) -> HttpResponse {
    let status = err.status_code();
    let suggestion = Some(humanize_error(err).suggestion);
    if status == 500 {
        error!(error = %err, "capture failed with internal error");
        error_response(status, INTERNAL_ERROR_DETAIL, suggestion)
    } else {
        error_response(status, err.to_string(), suggestion)
    }
}

// ---------------------------------------------------------------------------
// Shared state passed to connection handlers
// ---------------------------------------------------------------------------

/// State shared across all connection-handling tasks.
struct SharedState {
    pipeline: Arc<CapturePipeline>,
    /// Root for `X-Overlay-Path`; overlays are refused when unset.
    overlay_dir: Option<PathBuf>,
    request_timeout: Duration,
    max_request_bytes: usize,
    active_connections: Arc<AtomicU32>,
}

impl SharedState {
    fn from_config(config: &ServerConfig, active_connections: Arc<AtomicU32>) -> Result<Self> {
        Ok(Self {
            pipeline: Arc::new(CapturePipeline::new(config.capture.clone())?),
            overlay_dir: config.overlay_dir.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_request_bytes: config.max_request_bytes,
            active_connections,
        })
    }
}

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

/// The capture HTTP server.
pub struct CaptureServer {
    config: ServerConfig,
    status: ServerStatus,
    shutdown_signal: Arc<Notify>,
    task_handle: Option<JoinHandle<()>>,
    active_connections: Arc<AtomicU32>,
    local_addr: Option<SocketAddr>,
}

impl CaptureServer {
    /// Create a server in `Stopped` state.  Call [`start`](Self::start) to
    /// begin accepting connections.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            status: ServerStatus::Stopped,
            shutdown_signal: Arc::new(Notify::new()),
            task_handle: None,
            active_connections: Arc::new(AtomicU32::new(0)),
            local_addr: None,
        }
    }

    /// Configured port.  Port 0 asks the OS for a free one; see
    /// [`local_addr`](Self::local_addr) for the actual binding.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    pub fn status(&self) -> ServerStatus {
        self.status
    }

    pub fn active_connections(&self) -> u32 {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Address the listener is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the pipeline settings are invalid and `Server` if
    /// the address cannot be bound.
    pub async fn start(&mut self) -> Result<()> {
        if self.status == ServerStatus::Running {
            debug!(port = self.config.port, "capture server already running");
            return Ok(());
        }

        self.status = ServerStatus::Starting;

        let shared =
            match SharedState::from_config(&self.config, Arc::clone(&self.active_connections)) {
                Ok(shared) => Arc::new(shared),
                Err(e) => {
                    self.status = ServerStatus::Error;
                    return Err(e);
                }
            };

        let host = self.config.bind_address.as_str();
        let listener = match TcpListener::bind((host, self.config.port)).await {
            Ok(listener) => listener,
            Err(e) => {
                self.status = ServerStatus::Error;
                return Err(CaptureError::Server(format!(
                    "bind {host}:{}: {e}",
                    self.config.port
                )));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| CaptureError::Server(format!("local address: {e}")))?;

        info!(
            addr = %local_addr,
            output_size = self.config.capture.output_size,
            overlays = self.config.overlay_dir.is_some(),
            "capture server listening"
        );

        let shutdown = Arc::clone(&self.shutdown_signal);

        let handle = tokio::spawn(async move {
            Self::accept_loop(listener, shutdown, shared).await;
        });

        self.task_handle = Some(handle);
        self.local_addr = Some(local_addr);
        self.status = ServerStatus::Running;
        Ok(())
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    /// In-flight requests are allowed to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if self.status != ServerStatus::Running {
            return Ok(());
        }

        info!(addr = ?self.local_addr, "stopping capture server");
        self.shutdown_signal.notify_one();

        if let Some(handle) = self.task_handle.take() {
            handle
                .await
                .map_err(|e| CaptureError::Server(format!("task join: {e}")))?;
        }

        self.local_addr = None;
        self.status = ServerStatus::Stopped;
        info!(port = self.config.port, "capture server stopped");
        Ok(())
    }

    async fn accept_loop(listener: TcpListener, shutdown: Arc<Notify>, shared: Arc<SharedState>) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("accept loop received shutdown signal");
                    break;
                }

                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, "incoming connection");
                            let state = Arc::clone(&shared);
                            tokio::spawn(async move {
                                state.active_connections.fetch_add(1, Ordering::Relaxed);
                                if let Err(e) = Self::handle_connection(stream, peer_addr, &state).await {
                                    warn!(peer = %peer_addr, error = %e, "connection handler error");
                                }
                                state.active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    /// Read one request, route it, write the response.
    async fn handle_connection(
        mut stream: TcpStream,
        peer_addr: SocketAddr,
        state: &SharedState,
    ) -> Result<()> {
        let outcome = read_request(&mut stream, state.max_request_bytes)
            .await
            .map_err(|e| CaptureError::Server(format!("read from {peer_addr}: {e}")))?;

        let response = match outcome {
            ReadOutcome::Closed => {
                debug!(peer = %peer_addr, "connection closed without a request");
                return Ok(());
            }
            ReadOutcome::TooLarge { declared } => {
                warn!(
                    peer = %peer_addr,
                    declared,
                    limit = state.max_request_bytes,
                    "request body too large"
                );
                error_response(
                    413,
                    format!(
                        "Request body of {declared} bytes exceeds the {} byte limit",
                        state.max_request_bytes
                    ),
                    None,
                )
            }
            ReadOutcome::Malformed(reason) => {
                warn!(peer = %peer_addr, reason = %reason, "malformed HTTP request");
                error_response(400, format!("Malformed request: {reason}"), None)
            }
            ReadOutcome::Request(request) => {
                let response = dispatch(&request, state).await;
                info!(
                    peer = %peer_addr,
                    method = %request.method,
                    path = %request.path,
                    status = response.status,
                    "request handled"
                );
                response
            }
        };

        send_response(&mut stream, &response)
            .await
            .map_err(|e| CaptureError::Server(format!("write to {peer_addr}: {e}")))
    }
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

async fn dispatch(request: &HttpRequest, state: &SharedState) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("OPTIONS", ROUTE_HEALTH | ROUTE_CAPTURE | ROUTE_VALIDATE) => HttpResponse::empty(204),
        ("GET", ROUTE_HEALTH) => HttpResponse::json(
            200,
            &HealthResponse {
                status: "ok",
                service: SERVICE_NAME,
            },
        ),
        ("POST", ROUTE_CAPTURE) => handle_capture(request, state).await,
        ("POST", ROUTE_VALIDATE) => handle_validate(request),
        (method, ROUTE_HEALTH | ROUTE_CAPTURE | ROUTE_VALIDATE) => {
            error_response(405, format!("Method {method} not allowed"), None)
        }
        (_, path) => error_response(404, format!("No route for {path}"), None),
    }
}

// ---------------------------------------------------------------------------
// POST /capture
// ---------------------------------------------------------------------------

async fn handle_capture(request: &HttpRequest, state: &SharedState) -> HttpResponse {
    let media_type = request.media_type().unwrap_or_default();
    if !ACCEPTED_MEDIA_TYPES.contains(&media_type.as_str()) {
        return error_response(400, format!("Unsupported file type: {media_type}"), None);
    }
    if request.body.is_empty() {
        return error_response(400, "Empty file", None);
    }

    let overlay_path = match request.header(OVERLAY_HEADER) {
        Some(name) => match resolve_overlay(state.overlay_dir.as_deref(), name) {
            Ok(path) => Some(path),
            Err(reason) => {
                warn!(requested = %name, reason = %reason, "overlay request refused");
                let suggestion = humanize_error(&CaptureError::Overlay(reason.clone())).suggestion;
                return error_response(400, reason, Some(suggestion));
            }
        },
        None => None,
    };

    let frame = match decode_frame(&request.body) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(bytes = request.body.len(), error = %e, "upload could not be decoded");
            return error_response(
                400,
                "Failed to decode image",
                Some(humanize_error(&e).suggestion),
            );
        }
    };

    info!(
        width = frame.width(),
        height = frame.height(),
        overlay = ?overlay_path.as_ref().map(|p| p.display().to_string()),
        "processing capture"
    );

    let pipeline = Arc::clone(&state.pipeline);
    let job = tokio::task::spawn_blocking(move || {
        let overlay = overlay_path.map(overlay_for_path);
        pipeline.run(&frame, overlay.as_deref())
    });

    let result = match tokio::time::timeout(state.request_timeout, job).await {
        Err(_) => {
            warn!(
                timeout_ms = state.request_timeout.as_millis() as u64,
                "capture exceeded request timeout"
            );
            return capture_error_response(&CaptureError::NoPaperDetected);
        }
        Ok(Err(join_err)) => {
            return capture_error_response(&CaptureError::Server(format!(
                "capture task failed: {join_err}"
            )));
        }
        Ok(Ok(Err(e))) => {
            if e.status_code() != 500 {
                warn!(error = %e, status = e.status_code(), "capture failed");
            }
            return capture_error_response(&e);
        }
        Ok(Ok(Ok(result))) => result,
    };

    info!(
        score = result.alignment_score(),
        strategy = %result.strategy(),
        elapsed_ms = result.elapsed().as_millis() as u64,
        "capture successful"
    );
    HttpResponse::json(200, &CaptureResponse::from_result(&result))
}

/// Resolve `requested` against the overlay directory.  Only plain relative
/// paths are accepted; `..`, roots and prefixes are refused.
fn resolve_overlay(dir: Option<&Path>, requested: &str) -> std::result::Result<PathBuf, String> {
    let Some(dir) = dir else {
        return Err("overlays are disabled on this server".into());
    };
    let relative = Path::new(requested);
    let plain = !requested.is_empty()
        && relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if !plain {
        return Err(format!(
            "overlay path {requested:?} is outside the overlay directory"
        ));
    }
    Ok(dir.join(relative))
}

// ---------------------------------------------------------------------------
// POST /capture/validate
// ---------------------------------------------------------------------------

fn handle_validate(request: &HttpRequest) -> HttpResponse {
    let score = match parse_alignment_score(request) {
        Ok(score) => score,
        Err(reason) => return error_response(400, reason, None),
    };
    if !(0.0..=1.0).contains(&score) {
        return error_response(
            400,
            format!("alignment_score must be within [0, 1], got {score}"),
            None,
        );
    }

    let assessment = QualityAssessment::from_score(score);
    debug!(score, band = ?assessment.band, "validated alignment score");
    HttpResponse::json(
        200,
        &ValidateResponse {
            valid: assessment.accepted,
            feedback: assessment.message,
            score,
        },
    )
}

/// Accept either `{"alignment_score": f64}` or `alignment_score=<f64>`.
fn parse_alignment_score(request: &HttpRequest) -> std::result::Result<f64, String> {
    if request.media_type().as_deref() == Some("application/json") {
        return serde_json::from_slice::<ValidateRequest>(&request.body)
            .map(|body| body.alignment_score)
            .map_err(|e| format!("invalid JSON body: {e}"));
    }

    let body = std::str::from_utf8(&request.body)
        .map_err(|_| "form body is not valid UTF-8".to_string())?;
    let value = body
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == "alignment_score")
        .map(|(_, value)| value.trim())
        .ok_or_else(|| "alignment_score is required".to_string())?;
    value
        .parse::<f64>()
        .map_err(|_| format!("alignment_score is not a number: {value:?}"))
}
