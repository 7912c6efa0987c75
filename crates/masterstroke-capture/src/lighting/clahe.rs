// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Contrast-limited adaptive histogram equalization.
//
// The image is split into a grid of tiles; each tile gets its own clipped,
// equalized lookup table, and every pixel is mapped through a bilinear blend
// of the four nearest tile tables so no seams appear at tile borders.

use image::{GrayImage, Luma};

/// Equalize `gray` with a `tiles_x` by `tiles_y` grid, clipping each tile's
/// histogram at `clip_limit` times the mean bin height.
pub fn clahe(gray: &GrayImage, clip_limit: f64, tiles_x: u32, tiles_y: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tile_w = width.div_ceil(tiles_x.clamp(1, width));
    let tile_h = height.div_ceil(tiles_y.clamp(1, height));
    let grid_x = width.div_ceil(tile_w);
    let grid_y = height.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((grid_x * grid_y) as usize);
    for ty in 0..grid_y {
        for tx in 0..grid_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);
            luts.push(tile_lut(gray, x0, y0, x1, y1, clip_limit));
        }
    }

    let inv_tw = 1.0 / tile_w as f64;
    let inv_th = 1.0 / tile_h as f64;
    let lut = |tx: u32, ty: u32| &luts[(ty * grid_x + tx) as usize];

    let mut out = GrayImage::new(width, height);
    for y in 0..height {
        let tyf = y as f64 * inv_th - 0.5;
        let ty_lo = tyf.floor();
        let ya = tyf - ty_lo;
        let ty1 = ty_lo.max(0.0) as u32;
        let ty2 = ((ty_lo + 1.0).max(0.0) as u32).min(grid_y - 1);

        for x in 0..width {
            let txf = x as f64 * inv_tw - 0.5;
            let tx_lo = txf.floor();
            let xa = txf - tx_lo;
            let tx1 = tx_lo.max(0.0) as u32;
            let tx2 = ((tx_lo + 1.0).max(0.0) as u32).min(grid_x - 1);

            let v = gray.get_pixel(x, y).0[0] as usize;
            let top = lut(tx1, ty1)[v] as f64 * (1.0 - xa) + lut(tx2, ty1)[v] as f64 * xa;
            let bottom = lut(tx1, ty2)[v] as f64 * (1.0 - xa) + lut(tx2, ty2)[v] as f64 * xa;
            let value = top * (1.0 - ya) + bottom * ya;
            out.put_pixel(x, y, Luma([value.round().clamp(0.0, 255.0) as u8]));
        }
    }
    out
}

fn tile_lut(gray: &GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, clip_limit: f64) -> [u8; 256] {
    let mut hist = [0u64; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            hist[gray.get_pixel(x, y).0[0] as usize] += 1;
        }
    }
    let area = ((x1 - x0) as u64 * (y1 - y0) as u64).max(1);

    if clip_limit > 0.0 {
        let limit = ((clip_limit * area as f64 / 256.0) as u64).max(1);
        let mut clipped = 0u64;
        for bin in hist.iter_mut() {
            if *bin > limit {
                clipped += *bin - limit;
                *bin = limit;
            }
        }

        // Spread the excess evenly, then hand out the remainder at a stride.
        let batch = clipped / 256;
        let mut residual = clipped - batch * 256;
        for bin in hist.iter_mut() {
            *bin += batch;
        }
        if residual > 0 {
            let step = (256 / residual).max(1) as usize;
            for bin in hist.iter_mut().step_by(step) {
                if residual == 0 {
                    break;
                }
                *bin += 1;
                residual -= 1;
            }
        }
    }

    let scale = 255.0 / area as f64;
    let mut lut = [0u8; 256];
    let mut cumulative = 0u64;
    for (value, &count) in hist.iter().enumerate() {
        cumulative += count;
        lut[value] = (cumulative as f64 * scale).round().min(255.0) as u8;
    }
    lut
}
