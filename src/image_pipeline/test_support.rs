//! Synthetic exposure stacks with a known inverse response `g(x) = x^2.2`.

use crate::image_pipeline::common::{ExposureImage, MAX_CODE, quantize};

pub const GAMMA: f64 = 2.2;
pub const STANDARD_EXPOSURES: [f32; 5] = [0.25, 0.5, 1.0, 2.0, 4.0];

const MIN_RADIANCE: f64 = 0.001;
const MAX_RADIANCE: f64 = 1.0;

/// Ground-truth inverse response at an 8-bit code.
pub fn true_inverse(code: u8) -> f64 {
    (code as f64 / MAX_CODE as f64).powf(GAMMA)
}

/// Log-spaced radiance ramp across the linear pixel index.
pub fn radiance_ramp(width: usize, height: usize) -> Vec<f64> {
    let n = width * height;
    let (lo, hi) = (MIN_RADIANCE.ln(), MAX_RADIANCE.ln());
    (0..n)
        .map(|i| {
            let t = if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
            (lo + t * (hi - lo)).exp()
        })
        .collect()
}

/// Forward camera model: scale by exposure, clip, apply `x^(1/2.2)`, quantize.
pub fn expose(radiance: &[f64], width: usize, height: usize, channels: usize, exposure: f32) -> ExposureImage {
    let mut data = Vec::with_capacity(radiance.len() * channels);
    for &e in radiance {
        let v = (e * exposure as f64).clamp(0.0, 1.0).powf(1.0 / GAMMA);
        let code = quantize(v as f32);
        for _ in 0..channels {
            data.push(code as f32 / MAX_CODE);
        }
    }
    ExposureImage::from_vec(width, height, channels, data, exposure).unwrap()
}

pub fn gradient_stack(width: usize, height: usize, channels: usize, exposures: &[f32]) -> Vec<ExposureImage> {
    let radiance = radiance_ramp(width, height);
    exposures
        .iter()
        .map(|&t| expose(&radiance, width, height, channels, t))
        .collect()
}

/// Codes rising linearly from `lo` to `hi` (both included) over the image.
pub fn ramp_codes(width: usize, height: usize, lo: u8, hi: u8) -> Vec<u8> {
    let n = width * height;
    (0..n)
        .map(|i| {
            let t = i as f64 / (n - 1) as f64;
            (lo as f64 + t * (hi as f64 - lo as f64)).round() as u8
        })
        .collect()
}

/// Largest absolute deviation from `x^2.2` over codes [10, 245] after the
/// fitted curve is rescaled to agree with the truth at code 200.
pub fn max_curve_error<F: Fn(u8) -> f64>(fitted: F) -> f64 {
    let scale = true_inverse(200) / fitted(200);
    (10u8..=245)
        .map(|code| (scale * fitted(code) - true_inverse(code)).abs())
        .fold(0.0, f64::max)
}
