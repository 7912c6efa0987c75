// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Perspective rectification -- maps the detected sheet onto a square canvas.

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{Interpolation, Projection, warp_into};
use masterstroke_core::error::{CaptureError, Result};
use masterstroke_core::{Homography, Point, Quad, polygon_area};
use nalgebra::{SMatrix, SVector};
use tracing::{debug, instrument};

/// Warp the region bounded by `corners` into a `size`x`size` image.
///
/// Corners may arrive in any order; they are labelled canonically first so
/// the sheet's top-left lands at `(0, 0)`. Output pixels that fall outside
/// the source frame are black.
#[instrument(skip(frame, corners), fields(width = frame.width(), height = frame.height()))]
pub fn rectify(frame: &RgbImage, corners: &[Point], size: u32) -> Result<(RgbImage, Homography)> {
    if size < 2 {
        return Err(CaptureError::GeometryPrecondition(format!(
            "output size must be at least 2, got {size}"
        )));
    }
    let quad = Quad::from_points(corners)?;
    let homography = homography_to_square(&quad, size)?;

    let coefficients = homography.to_flat().map(|c| c as f32);
    let projection = Projection::from_matrix(coefficients).ok_or_else(|| {
        CaptureError::GeometryPrecondition("perspective transform is not invertible".into())
    })?;

    let mut output = RgbImage::new(size, size);
    warp_into(
        frame,
        &projection,
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
        &mut output,
    );

    debug!(size, "Frame rectified");
    Ok((output, homography))
}

/// Homography taking the quad's corners to the corners of a `size`x`size`
/// square: TL to (0,0), TR to (size-1,0), BR to (size-1,size-1), BL to
/// (0,size-1).
pub fn homography_to_square(quad: &Quad, size: u32) -> Result<Homography> {
    let far = (size - 1) as f64;
    let targets = [
        Point::new(0.0, 0.0),
        Point::new(far, 0.0),
        Point::new(far, far),
        Point::new(0.0, far),
    ];
    solve_homography(quad.corners(), &targets)
}

/// Solve for the 3x3 projective transform mapping each `src[i]` to `dst[i]`,
/// with the bottom-right coefficient fixed at 1.
pub fn solve_homography(src: &[Point; 4], dst: &[Point; 4]) -> Result<Homography> {
    if has_collinear_triple(src) || has_collinear_triple(dst) {
        return Err(CaptureError::GeometryPrecondition(
            "corners are degenerate (three or more collinear)".into(),
        ));
    }

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (s, d) = (src[i], dst[i]);
        let row_x = [s.x, s.y, 1.0, 0.0, 0.0, 0.0, -s.x * d.x, -s.y * d.x];
        let row_y = [0.0, 0.0, 0.0, s.x, s.y, 1.0, -s.x * d.y, -s.y * d.y];
        for col in 0..8 {
            a[(2 * i, col)] = row_x[col];
            a[(2 * i + 1, col)] = row_y[col];
        }
        b[2 * i] = d.x;
        b[2 * i + 1] = d.y;
    }

    let h = a.lu().solve(&b).ok_or_else(|| {
        CaptureError::GeometryPrecondition("corners are degenerate (collinear or repeated)".into())
    })?;
    if h.iter().any(|c| !c.is_finite()) {
        return Err(CaptureError::GeometryPrecondition(
            "perspective solve produced non-finite coefficients".into(),
        ));
    }

    Ok(Homography([
        [h[0], h[1], h[2]],
        [h[3], h[4], h[5]],
        [h[6], h[7], 1.0],
    ]))
}

fn has_collinear_triple(points: &[Point; 4]) -> bool {
    (0..4).any(|skip| {
        let triangle: Vec<Point> = points
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != skip)
            .map(|(_, p)| *p)
            .collect();
        polygon_area(&triangle) < 1e-9
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use imageproc::drawing::draw_polygon_mut;
    use imageproc::point::Point as RasterPoint;

    fn sheet_corners() -> [Point; 4] {
        [
            Point::new(200.0, 150.0),
            Point::new(700.0, 180.0),
            Point::new(680.0, 950.0),
            Point::new(180.0, 920.0),
        ]
    }

    fn sample_frame() -> RgbImage {
        let mut frame = RgbImage::from_pixel(900, 1200, Rgb([128, 128, 128]));
        let sheet: Vec<RasterPoint<i32>> = sheet_corners()
            .iter()
            .map(|p| RasterPoint::new(p.x as i32, p.y as i32))
            .collect();
        draw_polygon_mut(&mut frame, &sheet, Rgb([255, 255, 255]));
        frame
    }

    #[test]
    fn homography_maps_corners_onto_square() {
        let quad = Quad::new(sheet_corners());
        let h = homography_to_square(&quad, 1080).unwrap();
        let expected = [
            Point::new(0.0, 0.0),
            Point::new(1079.0, 0.0),
            Point::new(1079.0, 1079.0),
            Point::new(0.0, 1079.0),
        ];
        for (corner, target) in quad.corners().iter().zip(expected) {
            let mapped = h.project(*corner).unwrap();
            assert!(mapped.distance(&target) < 0.5, "{corner:?} -> {mapped:?}");
        }
    }

    #[test]
    fn rectified_sheet_is_bright_and_square() {
        // Shuffled corner order on purpose.
        let corners = [
            sheet_corners()[2],
            sheet_corners()[0],
            sheet_corners()[3],
            sheet_corners()[1],
        ];
        let (flat, _) = rectify(&sample_frame(), &corners, 1080).unwrap();
        assert_eq!(flat.dimensions(), (1080, 1080));

        let border: Vec<u8> = (0..1080)
            .step_by(20)
            .flat_map(|i| [flat.get_pixel(i, 3).0[0], flat.get_pixel(3, i).0[0]])
            .collect();
        let mean = border.iter().map(|&v| v as f64).sum::<f64>() / border.len() as f64;
        assert!(mean > 200.0, "border mean {mean}");
        assert_eq!(flat.get_pixel(540, 540).0, [255, 255, 255]);
    }

    #[test]
    fn axis_aligned_square_is_identity() {
        let quad = Quad::new([
            Point::new(0.0, 0.0),
            Point::new(99.0, 0.0),
            Point::new(99.0, 99.0),
            Point::new(0.0, 99.0),
        ]);
        let h = homography_to_square(&quad, 100).unwrap();
        for (row, expected) in h.as_rows().iter().zip(Homography::IDENTITY.as_rows()) {
            for (a, b) in row.iter().zip(expected) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn wrong_point_count_is_a_precondition_error() {
        let frame = RgbImage::new(10, 10);
        let err = rectify(&frame, &sheet_corners()[..3], 64).unwrap_err();
        assert!(matches!(err, CaptureError::GeometryPrecondition(_)));
    }

    #[test]
    fn collinear_corners_are_rejected() {
        let line = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(20.0, 20.0),
            Point::new(30.0, 30.0),
        ];
        let err = rectify(&RgbImage::new(50, 50), &line, 64).unwrap_err();
        assert!(matches!(err, CaptureError::GeometryPrecondition(_)));
    }

    #[test]
    fn pixels_outside_the_frame_are_black() {
        let frame = RgbImage::from_pixel(100, 100, Rgb([200, 200, 200]));
        let corners = [
            Point::new(-100.0, -100.0),
            Point::new(99.0, -100.0),
            Point::new(99.0, 99.0),
            Point::new(-100.0, 99.0),
        ];
        let (flat, _) = rectify(&frame, &corners, 64).unwrap();
        assert_eq!(flat.get_pixel(2, 2).0, [0, 0, 0]);
        assert_eq!(flat.get_pixel(60, 60).0, [200, 200, 200]);
    }
}
