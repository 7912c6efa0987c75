// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the capture pipeline. The end-to-end run is the
// number that matters against the 500 ms latency budget; detection and
// lighting are broken out to show where the time goes.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_polygon_mut;
use imageproc::point::Point;

use masterstroke_capture::{CapturePipeline, QuadArbiter, normalize_color};
use masterstroke_core::CaptureConfig;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// 900x1200 gray frame with a white, slightly rotated sheet.
fn synthetic_frame() -> RgbImage {
    let mut frame = RgbImage::from_pixel(900, 1200, Rgb([128, 128, 128]));
    let sheet = [
        Point::new(200, 150),
        Point::new(700, 180),
        Point::new(680, 950),
        Point::new(180, 920),
    ];
    draw_polygon_mut(&mut frame, &sheet, Rgb([255, 255, 255]));
    frame
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_full_capture(c: &mut Criterion) {
    let pipeline =
        CapturePipeline::new(CaptureConfig::default()).expect("default config is valid");
    let frame = DynamicImage::ImageRgb8(synthetic_frame());

    c.bench_function("capture (900x1200 -> 1080x1080)", |b| {
        b.iter(|| black_box(pipeline.run(black_box(&frame), None)));
    });
}

fn bench_detection(c: &mut Criterion) {
    let frame = synthetic_frame();
    let parallel = QuadArbiter::new(&CaptureConfig::default());
    let sequential = QuadArbiter::new(&CaptureConfig {
        parallel_strategies: false,
        ..CaptureConfig::default()
    });

    c.bench_function("detect (parallel strategies)", |b| {
        b.iter(|| black_box(parallel.detect(black_box(&frame))));
    });
    c.bench_function("detect (sequential strategies)", |b| {
        b.iter(|| black_box(sequential.detect(black_box(&frame))));
    });
}

fn bench_lighting(c: &mut Criterion) {
    let flat = RgbImage::from_fn(1080, 1080, |x, y| {
        let v = (40 + (x + y) / 24) as u8;
        Rgb([v, v, v.saturating_sub(5)])
    });

    c.bench_function("normalize_color (1080x1080)", |b| {
        b.iter(|| black_box(normalize_color(black_box(&flat))));
    });
}

criterion_group!(benches, bench_full_capture, bench_detection, bench_lighting);
criterion_main!(benches);
