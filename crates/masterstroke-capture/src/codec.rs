// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Frame decoding and preview encoding.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, RgbImage};
use masterstroke_core::error::{CaptureError, Result};
use tracing::{debug, instrument};

/// Decode an uploaded frame (JPEG, PNG, or anything else `image` recognises).
///
/// Undecodable or empty data is the caller's fault and maps to
/// [`CaptureError::InvalidInput`].
#[instrument(skip(data), fields(data_len = data.len()))]
pub fn decode_frame(data: &[u8]) -> Result<DynamicImage> {
    if data.is_empty() {
        return Err(CaptureError::InvalidInput("empty image data".into()));
    }
    let frame = image::load_from_memory(data)
        .map_err(|err| CaptureError::InvalidInput(format!("failed to decode image: {err}")))?;
    debug!(
        width = frame.width(),
        height = frame.height(),
        color = ?frame.color(),
        "Frame decoded"
    );
    Ok(frame)
}

/// Encode an RGB image as PNG.
#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(
        Cursor::new(&mut buf),
        CompressionType::Default,
        FilterType::Adaptive,
    );
    image
        .write_with_encoder(encoder)
        .map_err(|err| CaptureError::Codec(format!("PNG encoding failed: {err}")))?;
    debug!(bytes = buf.len(), "PNG encoded");
    Ok(buf)
}
