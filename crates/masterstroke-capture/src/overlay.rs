// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ghost overlay -- blends a semi-transparent reference drawing over the
// rectified capture so the user can compare their work against the step.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage, RgbaImage};
use masterstroke_core::error::{CaptureError, Result};
use resvg::{tiny_skia, usvg};
use tracing::{debug, instrument};

/// Something that can produce a reference drawing at a requested size.
pub trait OverlaySource: Send + Sync {
    fn render(&self, width: u32, height: u32) -> Result<DynamicImage>;
}

/// An overlay loaded from a raster image file (typically a PNG with alpha).
#[derive(Debug, Clone)]
pub struct RasterOverlay {
    path: PathBuf,
}

impl RasterOverlay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OverlaySource for RasterOverlay {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    fn render(&self, width: u32, height: u32) -> Result<DynamicImage> {
        if !self.path.is_file() {
            return Err(CaptureError::Overlay(format!(
                "overlay file not found: {}",
                self.path.display()
            )));
        }
        let image = image::open(&self.path).map_err(|err| {
            CaptureError::Overlay(format!(
                "failed to decode overlay {}: {err}",
                self.path.display()
            ))
        })?;
        debug!(
            source_width = image.width(),
            source_height = image.height(),
            "Overlay loaded"
        );
        Ok(fit(image, width, height))
    }
}

/// A vector overlay, rasterized at exactly the requested size.
#[derive(Debug, Clone)]
pub struct SvgOverlay {
    source: SvgSource,
}

#[derive(Debug, Clone)]
enum SvgSource {
    File(PathBuf),
    Markup(Vec<u8>),
}

impl SvgOverlay {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            source: SvgSource::File(path.into()),
        }
    }

    pub fn from_markup(markup: impl Into<Vec<u8>>) -> Self {
        Self {
            source: SvgSource::Markup(markup.into()),
        }
    }

    fn label(&self) -> Cow<'_, str> {
        match &self.source {
            SvgSource::File(path) => path.display().to_string().into(),
            SvgSource::Markup(_) => "inline markup".into(),
        }
    }

    fn data(&self) -> Result<Cow<'_, [u8]>> {
        match &self.source {
            SvgSource::Markup(markup) => Ok(Cow::Borrowed(markup.as_slice())),
            SvgSource::File(path) => {
                if !path.is_file() {
                    return Err(CaptureError::Overlay(format!(
                        "overlay file not found: {}",
                        path.display()
                    )));
                }
                std::fs::read(path).map(Cow::Owned).map_err(|err| {
                    CaptureError::Overlay(format!("failed to read overlay {}: {err}", path.display()))
                })
            }
        }
    }
}

impl OverlaySource for SvgOverlay {
    #[instrument(skip(self), fields(source = %self.label()))]
    fn render(&self, width: u32, height: u32) -> Result<DynamicImage> {
        let data = self.data()?;
        let tree = usvg::Tree::from_data(&data, &usvg::Options::default()).map_err(|err| {
            CaptureError::Overlay(format!("failed to parse SVG overlay {}: {err}", self.label()))
        })?;
        let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
            CaptureError::Overlay(format!("cannot rasterize SVG overlay at {width}x{height}"))
        })?;

        // Stretch the document box onto the target, like raster overlays.
        let size = tree.size();
        let transform = tiny_skia::Transform::from_scale(
            width as f32 / size.width(),
            height as f32 / size.height(),
        );
        resvg::render(&tree, transform, &mut pixmap.as_mut());
        debug!(
            source_width = size.width(),
            source_height = size.height(),
            "SVG overlay rasterized"
        );

        let raw: Vec<u8> = pixmap
            .pixels()
            .iter()
            .flat_map(|pixel| {
                let c = pixel.demultiply();
                [c.red(), c.green(), c.blue(), c.alpha()]
            })
            .collect();
        RgbaImage::from_raw(width, height, raw)
            .map(DynamicImage::ImageRgba8)
            .ok_or_else(|| CaptureError::Overlay("rasterized SVG has the wrong size".into()))
    }
}

/// Overlay source for a file, chosen by extension: `.svg` is rasterized as a
/// vector drawing, anything else is decoded as a raster image.
pub fn overlay_for_path(path: impl Into<PathBuf>) -> Box<dyn OverlaySource> {
    let path = path.into();
    let is_svg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("svg"));
    if is_svg {
        Box::new(SvgOverlay::new(path))
    } else {
        Box::new(RasterOverlay::new(path))
    }
}

/// An overlay already held in memory.
#[derive(Debug, Clone)]
pub struct StaticOverlay {
    image: DynamicImage,
}

impl StaticOverlay {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }
}

impl OverlaySource for StaticOverlay {
    fn render(&self, width: u32, height: u32) -> Result<DynamicImage> {
        Ok(fit(self.image.clone(), width, height))
    }
}

fn fit(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() == width && image.height() == height {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

/// Blend `overlay` over `base` at the given opacity.
///
/// With an alpha channel, each pixel's weight is `opacity * alpha / 255`;
/// otherwise the weight is `opacity` everywhere. Without an overlay the base
/// is returned unchanged.
pub fn blend_overlay(
    base: &RgbImage,
    overlay: Option<&DynamicImage>,
    opacity: f32,
) -> Result<RgbImage> {
    if !(0.0..=1.0).contains(&opacity) {
        return Err(CaptureError::GeometryPrecondition(format!(
            "opacity must be within [0, 1], got {opacity}"
        )));
    }
    let Some(overlay) = overlay else {
        return Ok(base.clone());
    };
    if (overlay.width(), overlay.height()) != base.dimensions() {
        return Err(CaptureError::GeometryPrecondition(format!(
            "overlay is {}x{} but base is {}x{}",
            overlay.width(),
            overlay.height(),
            base.width(),
            base.height()
        )));
    }

    let has_alpha = overlay.color().has_alpha();
    let rgba = overlay.to_rgba8();
    let blended = RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let under = base.get_pixel(x, y).0;
        let over = rgba.get_pixel(x, y).0;
        let weight = if has_alpha {
            opacity * over[3] as f32 / 255.0
        } else {
            opacity
        };
        let mix = |b: u8, o: u8| {
            ((1.0 - weight) * b as f32 + weight * o as f32)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        Rgb([
            mix(under[0], over[0]),
            mix(under[1], over[1]),
            mix(under[2], over[2]),
        ])
    });
    Ok(blended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    fn base() -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([200, 100, 50]))
    }

    fn opaque_overlay() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(16, 16, Rgb([0, 0, 255])))
    }

    #[test]
    fn no_overlay_returns_base() {
        assert_eq!(blend_overlay(&base(), None, 0.3).unwrap(), base());
    }

    #[test]
    fn zero_opacity_returns_base() {
        let out = blend_overlay(&base(), Some(&opaque_overlay()), 0.0).unwrap();
        assert_eq!(out, base());
    }

    #[test]
    fn full_opacity_without_alpha_returns_overlay() {
        let out = blend_overlay(&base(), Some(&opaque_overlay()), 1.0).unwrap();
        assert_eq!(out, opaque_overlay().to_rgb8());
    }

    #[test]
    fn partial_opacity_mixes_linearly() {
        let out = blend_overlay(&base(), Some(&opaque_overlay()), 0.3).unwrap();
        // 0.7 * 200 + 0.3 * 0 = 140; 0.7 * 50 + 0.3 * 255 = 111.5
        assert_eq!(out.get_pixel(0, 0).0, [140, 70, 112]);
    }

    #[test]
    fn transparent_pixels_leave_base_untouched() {
        let mut overlay = RgbaImage::from_pixel(16, 16, Rgba([0, 0, 0, 0]));
        overlay.put_pixel(4, 4, Rgba([0, 0, 0, 255]));
        let overlay = DynamicImage::ImageRgba8(overlay);

        let out = blend_overlay(&base(), Some(&overlay), 0.5).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [200, 100, 50]);
        assert_eq!(out.get_pixel(4, 4).0, [100, 50, 25]);
    }

    #[test]
    fn mismatched_dimensions_fail() {
        let small = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let err = blend_overlay(&base(), Some(&small), 0.3).unwrap_err();
        assert!(matches!(err, CaptureError::GeometryPrecondition(_)));
    }

    #[test]
    fn opacity_out_of_range_fails() {
        for opacity in [-0.1, 1.5, f32::NAN] {
            assert!(blend_overlay(&base(), Some(&opaque_overlay()), opacity).is_err());
        }
    }

    #[test]
    fn raster_overlay_loads_and_resizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step1.png");
        RgbaImage::from_pixel(32, 20, Rgba([10, 20, 30, 128]))
            .save(&path)
            .unwrap();

        let rendered = RasterOverlay::new(&path).render(64, 64).unwrap();
        assert_eq!(rendered.dimensions(), (64, 64));
        assert!(rendered.color().has_alpha());
        assert!((127..=129).contains(&rendered.get_pixel(10, 10).0[3]));
    }

    #[test]
    fn missing_overlay_file_is_an_overlay_error() {
        let err = RasterOverlay::new("/nonexistent/step.png")
            .render(10, 10)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Overlay(ref msg) if msg.contains("not found")));
        assert_eq!(err.status_code(), 502);
    }

    #[test]
    fn undecodable_overlay_file_is_an_overlay_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not a png").unwrap();
        let err = RasterOverlay::new(&path).render(10, 10).unwrap_err();
        assert!(matches!(err, CaptureError::Overlay(_)));
    }

    #[test]
    fn static_overlay_keeps_matching_size() {
        let source = StaticOverlay::new(opaque_overlay());
        let rendered = source.render(16, 16).unwrap();
        assert_eq!(rendered.to_rgb8(), opaque_overlay().to_rgb8());
    }

    // Left half opaque red, right half empty, on a 10x10 document box.
    const HALF_RED_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10" viewBox="0 0 10 10"><rect x="0" y="0" width="5" height="10" fill="#ff0000"/></svg>"##;

    #[test]
    fn svg_overlay_rasterizes_at_the_requested_size() {
        let rendered = SvgOverlay::from_markup(HALF_RED_SVG).render(16, 16).unwrap();
        assert_eq!(rendered.dimensions(), (16, 16));
        assert_eq!(rendered.get_pixel(3, 8).0, [255, 0, 0, 255]);
        assert_eq!(rendered.get_pixel(12, 8).0[3], 0);
    }

    #[test]
    fn svg_overlay_blends_like_a_raster_overlay() {
        let rendered = SvgOverlay::from_markup(HALF_RED_SVG).render(16, 16).unwrap();
        let out = blend_overlay(&base(), Some(&rendered), 0.5).unwrap();
        // 0.5 * 200 + 0.5 * 255 = 227.5; 0.5 * 100 = 50; 0.5 * 50 = 25
        assert_eq!(out.get_pixel(3, 8).0, [228, 50, 25]);
        assert_eq!(out.get_pixel(12, 8).0, [200, 100, 50]);
    }

    #[test]
    fn svg_overlay_reads_files_and_reports_bad_markup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("step2.svg");
        std::fs::write(&path, HALF_RED_SVG).unwrap();
        let rendered = SvgOverlay::new(&path).render(32, 32).unwrap();
        assert_eq!(rendered.get_pixel(4, 4).0, [255, 0, 0, 255]);

        std::fs::write(&path, "<svg").unwrap();
        let err = SvgOverlay::new(&path).render(32, 32).unwrap_err();
        assert!(matches!(err, CaptureError::Overlay(ref msg) if msg.contains("parse")));

        let err = SvgOverlay::new(dir.path().join("absent.svg"))
            .render(32, 32)
            .unwrap_err();
        assert!(matches!(err, CaptureError::Overlay(ref msg) if msg.contains("not found")));
    }

    #[test]
    fn overlay_source_is_chosen_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let svg = dir.path().join("step.SVG");
        std::fs::write(&svg, HALF_RED_SVG).unwrap();
        let rendered = overlay_for_path(&svg).render(8, 8).unwrap();
        assert_eq!(rendered.get_pixel(1, 4).0, [255, 0, 0, 255]);

        // A PNG path goes through the raster decoder, which rejects SVG text.
        let png = dir.path().join("step.png");
        std::fs::write(&png, HALF_RED_SVG).unwrap();
        let err = overlay_for_path(&png).render(8, 8).unwrap_err();
        assert!(matches!(err, CaptureError::Overlay(ref msg) if msg.contains("decode")));
    }
}
