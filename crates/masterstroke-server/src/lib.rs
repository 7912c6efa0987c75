// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// masterstroke-server -- HTTP front end for the capture pipeline.
//
// Exposes `POST /capture` (image in, alignment score + preview out),
// `POST /capture/validate` (score in, feedback out), and a `GET /` health
// check over a deliberately small HTTP/1.1 implementation on raw TCP.

pub mod http;
pub mod server;

pub use server::CaptureServer;
