// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Low-level raster helpers shared by the detection strategies: downscaling,
// the whiteness mask, the morphological gradient, and outer-contour
// extraction.

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};
use imageproc::contours::{BorderType, find_contours};
use imageproc::morphology::{Mask, grayscale_dilate, grayscale_erode};
use imageproc::point::Point as RasterPoint;
use palette::{FromColor, Hsv, Srgb};

/// A traced contour in raster coordinates.
pub type Contour = Vec<RasterPoint<i32>>;

/// Resize so the larger side is `target`, returning the image and the
/// applied factor. Images whose larger side does not exceed `threshold` are
/// returned as-is with factor 1.
pub fn downscale(gray: &GrayImage, threshold: u32, target: u32) -> (GrayImage, f64) {
    let (width, height) = gray.dimensions();
    let max_dim = width.max(height);
    if max_dim <= threshold {
        return (gray.clone(), 1.0);
    }
    let scale = target as f64 / max_dim as f64;
    let new_width = ((width as f64 * scale).round() as u32).max(1);
    let new_height = ((height as f64 * scale).round() as u32).max(1);
    (
        imageops::resize(gray, new_width, new_height, FilterType::Triangle),
        scale,
    )
}

/// Mask of pixels with low saturation and high value (white paper).
///
/// Saturation and value are compared on a 0-255 scale; hue is ignored.
pub fn whiteness_mask(rgb: &RgbImage, max_saturation: u8, min_value: u8) -> GrayImage {
    let max_saturation = max_saturation as f32 / 255.0;
    let min_value = min_value as f32 / 255.0;
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let hsv: Hsv = Hsv::from_color(Srgb::new(r, g, b).into_format::<f32>());
        if hsv.saturation <= max_saturation && hsv.value >= min_value {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

// -- Grayscale morphology -----------------------------------------------------

/// Dilation minus erosion with a `(2r+1)x(2r+1)` square: bright along
/// intensity boundaries.
pub fn morphological_gradient(gray: &GrayImage, radius: u8) -> GrayImage {
    let mask = Mask::square(radius);
    let dilated = grayscale_dilate(gray, &mask);
    let eroded = grayscale_erode(gray, &mask);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([dilated.get_pixel(x, y).0[0] - eroded.get_pixel(x, y).0[0]])
    })
}

// -- Contours -----------------------------------------------------------------

/// Outermost borders of the foreground regions of a binary image.
///
/// Borders nested inside another region (holes and the islands within them)
/// are skipped.
pub fn external_contours(binary: &GrayImage) -> Vec<Contour> {
    find_contours::<i32>(binary)
        .into_iter()
        .filter(|contour| {
            matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none()
        })
        .map(|contour| contour.points)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::contrast::{ThresholdType, otsu_level, threshold};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use imageproc::stats::percentile;

    #[test]
    fn otsu_level_splits_two_flat_regions() {
        let mut gray = GrayImage::from_pixel(40, 40, Luma([128]));
        draw_filled_rect_mut(&mut gray, Rect::at(10, 10).of_size(20, 20), Luma([255]));
        let level = otsu_level(&gray);
        assert_eq!(level, 128);

        let binary = threshold(&gray, level, ThresholdType::Binary);
        assert_eq!(binary.get_pixel(0, 0).0[0], 0);
        assert_eq!(binary.get_pixel(20, 20).0[0], 255);
    }

    #[test]
    fn uniform_image_binarizes_to_all_foreground() {
        let gray = GrayImage::from_pixel(10, 10, Luma([90]));
        let level = otsu_level(&gray);
        assert_eq!(level, 0);
        let binary = threshold(&gray, level, ThresholdType::Binary);
        assert!(binary.pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn median_of_mostly_dark_image() {
        let mut gray = GrayImage::from_pixel(10, 10, Luma([20]));
        draw_filled_rect_mut(&mut gray, Rect::at(0, 0).of_size(10, 3), Luma([200]));
        assert_eq!(percentile(&gray, 50), 20);
    }

    #[test]
    fn downscale_keeps_small_frames() {
        let gray = GrayImage::new(800, 600);
        let (out, scale) = downscale(&gray, 1500, 1000);
        assert_eq!(out.dimensions(), (800, 600));
        assert_eq!(scale, 1.0);
    }

    #[test]
    fn downscale_large_frames_to_target() {
        let gray = GrayImage::new(2000, 1500);
        let (out, scale) = downscale(&gray, 1500, 1000);
        assert_eq!(out.dimensions(), (1000, 750));
        assert!((scale - 0.5).abs() < 1e-12);
    }

    #[test]
    fn whiteness_mask_rejects_saturated_and_dark() {
        let mut rgb = RgbImage::from_pixel(3, 1, image::Rgb([240, 238, 235]));
        rgb.put_pixel(1, 0, image::Rgb([250, 40, 40]));
        rgb.put_pixel(2, 0, image::Rgb([90, 90, 90]));
        let mask = whiteness_mask(&rgb, 30, 180);
        assert_eq!(mask.get_pixel(0, 0).0[0], 255);
        assert_eq!(mask.get_pixel(1, 0).0[0], 0);
        assert_eq!(mask.get_pixel(2, 0).0[0], 0);
    }

    #[test]
    fn gradient_highlights_step_edges_only() {
        let mut gray = GrayImage::from_pixel(30, 30, Luma([50]));
        draw_filled_rect_mut(&mut gray, Rect::at(10, 0).of_size(20, 30), Luma([200]));
        let gradient = morphological_gradient(&gray, 2);
        assert_eq!(gradient.get_pixel(2, 15).0[0], 0);
        assert_eq!(gradient.get_pixel(25, 15).0[0], 0);
        assert_eq!(gradient.get_pixel(10, 15).0[0], 150);
        assert_eq!(gradient.get_pixel(8, 15).0[0], 150);
    }

    #[test]
    fn external_contours_skip_nested_regions() {
        let mut binary = GrayImage::new(60, 60);
        draw_filled_rect_mut(&mut binary, Rect::at(5, 5).of_size(50, 50), Luma([255]));
        draw_filled_rect_mut(&mut binary, Rect::at(15, 15).of_size(30, 30), Luma([0]));
        draw_filled_rect_mut(&mut binary, Rect::at(25, 25).of_size(10, 10), Luma([255]));
        let contours = external_contours(&binary);
        assert_eq!(contours.len(), 1);
        assert!(contours[0].iter().any(|p| p.x == 5 && p.y == 5));
    }
}
