// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Lighting normalization -- brings frames shot in a dim room or under harsh
// light into a consistent brightness range.
//
// The decision procedure is an explicit state machine. A frame is classified
// once from its original statistics, receives the matching CLAHE/gamma/rescale
// treatment, and then falls into a final percentile stretch only if its mean
// is still extreme.

pub mod clahe;

use image::{GrayImage, Luma, Rgb, RgbImage};
use palette::{Clamp, FromColor, Lab, Srgb};
use tracing::{debug, instrument};

use self::clahe::clahe;

const TILES: u32 = 8;
const MILD_CLIP: f64 = 2.0;
const STRONG_CLIP: f64 = 3.0;

const DARK_MEAN: f64 = 80.0;
const BRIGHT_MEAN: f64 = 200.0;

/// Mean and standard deviation of an intensity frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrightnessProfile {
    pub mean: f64,
    pub std_dev: f64,
}

impl BrightnessProfile {
    pub fn of(gray: &GrayImage) -> Self {
        let n = gray.width() as f64 * gray.height() as f64;
        if n == 0.0 {
            return Self {
                mean: 0.0,
                std_dev: 0.0,
            };
        }
        let (sum, sum_sq) = gray.pixels().fold((0.0, 0.0), |(s, sq), p| {
            let v = p.0[0] as f64;
            (s + v, sq + v * v)
        });
        let mean = sum / n;
        let variance = (sum_sq / n - mean * mean).max(0.0);
        Self {
            mean,
            std_dev: variance.sqrt(),
        }
    }

    /// Already in a good range with usable contrast.
    pub fn is_well_lit(&self) -> bool {
        (100.0..=180.0).contains(&self.mean) && self.std_dev > 20.0
    }
}

/// States of the lighting decision procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingState {
    /// Good mean and contrast: mild CLAHE only.
    WellLit,
    /// Mean below 80.
    Dark,
    /// Mean above 200.
    Bright,
    /// Neither well lit nor extreme.
    Neutral,
    /// Corrections applied; checking whether the mean is still extreme.
    Settling,
    /// Mean still extreme: percentile stretch and final rescale.
    NeedsStretch,
    Done,
}

impl LightingState {
    /// Initial state for a frame with the given statistics.
    pub fn classify(profile: &BrightnessProfile) -> Self {
        if profile.is_well_lit() {
            Self::WellLit
        } else if profile.mean < DARK_MEAN {
            Self::Dark
        } else if profile.mean > BRIGHT_MEAN {
            Self::Bright
        } else {
            Self::Neutral
        }
    }

    /// Apply this state's treatment to `image` and return the next state.
    fn step(self, image: &mut GrayImage) -> Self {
        match self {
            Self::WellLit => {
                *image = clahe(image, MILD_CLIP, TILES, TILES);
                Self::Done
            }
            Self::Dark => {
                *image = clahe(image, STRONG_CLIP, TILES, TILES);
                apply_gamma(image, 2.2);
                if mean_of(image) < 80.0 {
                    rescale_to_mean(image, 120.0);
                }
                Self::Settling
            }
            Self::Bright => {
                *image = clahe(image, STRONG_CLIP, TILES, TILES);
                apply_gamma(image, 0.4);
                if mean_of(image) > 170.0 {
                    rescale_to_mean(image, 130.0);
                }
                Self::Settling
            }
            Self::Neutral => {
                *image = clahe(image, STRONG_CLIP, TILES, TILES);
                Self::Settling
            }
            Self::Settling => {
                let mean = mean_of(image);
                if mean < DARK_MEAN || mean > BRIGHT_MEAN {
                    Self::NeedsStretch
                } else {
                    Self::Done
                }
            }
            Self::NeedsStretch => {
                percentile_stretch(image, 2.0, 98.0);
                let mean = mean_of(image);
                if mean < 80.0 {
                    rescale_to_mean(image, 100.0);
                } else if mean > 170.0 {
                    rescale_to_mean(image, 150.0);
                }
                Self::Done
            }
            Self::Done => Self::Done,
        }
    }
}

/// Normalize the lighting of an intensity frame.
pub fn normalize_lighting(gray: &GrayImage) -> GrayImage {
    normalize_lighting_traced(gray).0
}

/// [`normalize_lighting`], also returning every state visited in order.
#[instrument(skip_all, fields(width = gray.width(), height = gray.height()))]
pub fn normalize_lighting_traced(gray: &GrayImage) -> (GrayImage, Vec<LightingState>) {
    let profile = BrightnessProfile::of(gray);
    let mut state = LightingState::classify(&profile);
    let mut image = gray.clone();
    let mut path = vec![state];

    while state != LightingState::Done {
        state = state.step(&mut image);
        path.push(state);
    }

    debug!(
        mean_before = profile.mean,
        std_before = profile.std_dev,
        mean_after = mean_of(&image),
        ?path,
        "Lighting normalized"
    );
    (image, path)
}

/// Normalize a colour frame by adjusting only its lightness.
///
/// Pixels go through L*a*b*; L is quantized to 8 bits and normalized as an
/// intensity frame while a* and b* are carried through untouched.
#[instrument(skip_all, fields(width = rgb.width(), height = rgb.height()))]
pub fn normalize_color(rgb: &RgbImage) -> RgbImage {
    let (width, height) = rgb.dimensions();
    let lab: Vec<Lab> = rgb.pixels().map(|p| to_lab(*p)).collect();

    let lightness = GrayImage::from_fn(width, height, |x, y| {
        let l = lab[(y * width + x) as usize].l;
        Luma([(l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8])
    });
    let normalized = normalize_lighting(&lightness);

    RgbImage::from_fn(width, height, |x, y| {
        let original = lab[(y * width + x) as usize];
        let l = normalized.get_pixel(x, y).0[0] as f32 * 100.0 / 255.0;
        from_lab(Lab::new(l, original.a, original.b))
    })
}

fn to_lab(Rgb([r, g, b]): Rgb<u8>) -> Lab {
    Lab::from_color(Srgb::new(r, g, b).into_format::<f32>())
}

// Out-of-gamut results are clipped per channel.
fn from_lab(lab: Lab) -> Rgb<u8> {
    let srgb: Srgb = Srgb::from_color(lab);
    let srgb: Srgb<u8> = srgb.clamp().into_format();
    Rgb([srgb.red, srgb.green, srgb.blue])
}

/// Shift and scale an intensity frame to the requested mean and standard
/// deviation.
pub fn adaptive_normalize(gray: &GrayImage, target_mean: f64, target_std: f64) -> GrayImage {
    let profile = BrightnessProfile::of(gray);
    let std_dev = profile.std_dev.max(1.0);
    map_pixels(gray, |v| (v - profile.mean) / std_dev * target_std + target_mean)
}

// -- Pixel operations ---------------------------------------------------------

fn mean_of(gray: &GrayImage) -> f64 {
    BrightnessProfile::of(gray).mean
}

fn map_pixels(gray: &GrayImage, f: impl Fn(f64) -> f64) -> GrayImage {
    let mut lut = [0u8; 256];
    for (i, entry) in lut.iter_mut().enumerate() {
        *entry = f(i as f64).round().clamp(0.0, 255.0) as u8;
    }
    let mut out = gray.clone();
    for pixel in out.pixels_mut() {
        pixel.0[0] = lut[pixel.0[0] as usize];
    }
    out
}

/// `out = 255 * (in / 255)^(1 / gamma)`: gamma above 1 brightens.
fn apply_gamma(gray: &mut GrayImage, gamma: f64) {
    *gray = map_pixels(gray, |v| (v / 255.0).powf(1.0 / gamma) * 255.0);
}

fn rescale_to_mean(gray: &mut GrayImage, target: f64) {
    let scale = target / mean_of(gray).max(1.0);
    *gray = map_pixels(gray, |v| v * scale);
}

/// Stretch the `low`..`high` percentile range onto 0..255, unless that range
/// is too narrow to be meaningful.
fn percentile_stretch(gray: &mut GrayImage, low: f64, high: f64) {
    let (p_low, p_high) = (percentile(gray, low), percentile(gray, high));
    if p_high - p_low > 10.0 {
        let span = p_high - p_low;
        *gray = map_pixels(gray, |v| (v - p_low) * 255.0 / span);
    }
}

/// Linearly interpolated percentile over the sorted pixel values.
fn percentile(gray: &GrayImage, p: f64) -> f64 {
    let mut bins = [0u64; 256];
    for pixel in gray.pixels() {
        bins[pixel.0[0] as usize] += 1;
    }
    let n: u64 = bins.iter().sum();
    if n == 0 {
        return 0.0;
    }

    let rank = p / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as u64;
    let hi = rank.ceil() as u64;
    let value_at = |k: u64| {
        let mut seen = 0u64;
        for (value, &count) in bins.iter().enumerate() {
            seen += count;
            if seen > k {
                return value as f64;
            }
        }
        255.0
    };
    let (v_lo, v_hi) = (value_at(lo), value_at(hi));
    v_lo + (v_hi - v_lo) * (rank - lo as f64)
}
