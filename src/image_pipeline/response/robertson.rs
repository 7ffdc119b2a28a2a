//! Robertson, Borman & Stevenson (2003) response recovery.
//!
//! Alternates between per-pixel irradiance estimates and the response curve
//! `fun[code]` over the whole image until the curve settles.

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::image_pipeline::common::{CODE_LEVELS, ExposureImage, HdrError, Result, validate_stack};
use crate::image_pipeline::response::debevec::log_exposures;
use crate::image_pipeline::response::estimator::CrfEstimator;
use crate::image_pipeline::response::types::{InverseCrf, ResponseLut};
use crate::image_pipeline::weights::{WeightScheme, WeightTable};

/// Mean squared per-bin change below which the curve is considered converged.
pub const CONVERGENCE_DELTA: f64 = 1e-7;

/// Total weight below which a pixel falls back to an extremal estimate.
const MIN_TOTAL_WEIGHT: f64 = 1e-9;

const MID_CODE: usize = CODE_LEVELS / 2;
const TOP_CODE: u8 = (CODE_LEVELS - 1) as u8;

/// Outcome of a Robertson fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobertsonReport {
    /// Largest iteration count over all channels.
    pub iterations: usize,
    /// True when every channel met the convergence threshold.
    pub converged: bool,
    /// Largest final per-channel delta.
    pub final_delta: f64,
}

/// Exposures of a stack in ascending order of exposure time.
struct ExposureOrder<'a> {
    images: Vec<&'a ExposureImage>,
}

impl<'a> ExposureOrder<'a> {
    fn new<I: AsRef<ExposureImage>>(stack: &'a [I]) -> Self {
        let mut images: Vec<&ExposureImage> = stack.iter().map(|i| i.as_ref()).collect();
        images.sort_by(|a, b| a.exposure().total_cmp(&b.exposure()));
        Self { images }
    }

    fn shortest(&self) -> &'a ExposureImage {
        self.images[0]
    }

    fn longest(&self) -> &'a ExposureImage {
        self.images[self.images.len() - 1]
    }
}

impl CrfEstimator {
    /// Fits a lookup-table response with Robertson's iterative method.
    ///
    /// Always produces a response for a valid stack; non-convergence within
    /// `max_iterations` is reported, not treated as an error.
    #[instrument(skip(self, stack), fields(exposures = stack.len()))]
    pub fn estimate_robertson<I>(&mut self, stack: &[I], max_iterations: usize) -> Result<RobertsonReport>
    where
        I: AsRef<ExposureImage> + Sync,
    {
        if stack.len() < 2 {
            return Err(HdrError::TooFewExposures(stack.len()));
        }
        validate_stack(stack)?;
        log_exposures(stack)?;

        self.weights = WeightTable::new(WeightScheme::Robertson);
        let order = ExposureOrder::new(stack);
        let channels = order.shortest().channels();

        let mut report = RobertsonReport {
            iterations: 0,
            converged: true,
            final_delta: 0.0,
        };
        let mut curves = Vec::with_capacity(channels);
        for channel in 0..channels {
            let _span = tracing::debug_span!("robertson_channel", channel).entered();
            let (curve, iterations, converged, delta) =
                fit_channel(&order, channel, &self.weights, max_iterations);
            report.iterations = report.iterations.max(iterations);
            report.converged &= converged;
            report.final_delta = report.final_delta.max(delta);
            curves.push(curve);
        }

        // One scale for all channels keeps their relative balance.
        let global_max = curves
            .iter()
            .flat_map(|curve| curve.iter().copied())
            .fold(0.0f64, f64::max);
        let luts = curves
            .iter()
            .map(|curve| {
                ResponseLut::from_fn(|code| {
                    if global_max > 0.0 {
                        (curve[code] / global_max) as f32
                    } else {
                        curve[code] as f32
                    }
                })
            })
            .collect();

        if !report.converged {
            warn!(
                iterations = report.iterations,
                delta = report.final_delta,
                "Robertson response did not converge"
            );
        }
        info!(
            channels,
            iterations = report.iterations,
            converged = report.converged,
            "Robertson response fitted"
        );
        self.commit(InverseCrf::Lut(luts));
        Ok(report)
    }
}

fn fit_channel(
    order: &ExposureOrder<'_>,
    channel: usize,
    weights: &WeightTable,
    max_iterations: usize,
) -> (Vec<f64>, usize, bool, f64) {
    let pixels = order.shortest().pixel_count();
    let mut fun: Vec<f64> = (0..CODE_LEVELS).map(|m| m as f64 / MID_CODE as f64).collect();
    let mut irradiance = vec![0.0f64; pixels];
    let mut delta = f64::INFINITY;
    let mut iterations = 0;

    normalize(&mut fun);
    while iterations < max_iterations {
        iterations += 1;

        irradiance
            .par_iter_mut()
            .enumerate()
            .for_each(|(pixel, x)| *x = estimate_irradiance(order, pixel, channel, &fun, weights));

        let previous = fun.clone();
        let (sums, counts) = accumulate_bins(order, channel, &irradiance);
        for m in 0..CODE_LEVELS {
            fun[m] = if counts[m] > 0 {
                sums[m] / counts[m] as f64
            } else if m > 0 {
                fun[m - 1]
            } else {
                0.0
            };
        }
        normalize(&mut fun);

        let (sq_sum, nonzero) = fun
            .iter()
            .zip(previous.iter())
            .filter(|(value, _)| **value != 0.0)
            .fold((0.0, 0usize), |(sum, n), (a, b)| (sum + (a - b) * (a - b), n + 1));
        delta = if nonzero > 0 { sq_sum / nonzero as f64 } else { 0.0 };
        debug!(iteration = iterations, delta, "Robertson iteration");
        if delta < CONVERGENCE_DELTA {
            return (fun, iterations, true, delta);
        }
    }
    (fun, iterations, false, delta)
}

/// Scales the curve so its first non-zero value at or around mid-gray is 1.
fn normalize(fun: &mut [f64]) {
    let pivot = (MID_CODE..CODE_LEVELS)
        .chain((0..MID_CODE).rev())
        .map(|m| fun[m])
        .find(|v| *v != 0.0);
    if let Some(pivot) = pivot {
        for value in fun.iter_mut() {
            *value /= pivot;
        }
    }
}

/// Maximum-likelihood irradiance `sum(w t f) / sum(w t²)` of one pixel.
///
/// An exposure is skipped when its code is not bracketed by the codes of its
/// shorter and longer neighbours, which catches moving content.
fn estimate_irradiance(
    order: &ExposureOrder<'_>,
    pixel: usize,
    channel: usize,
    fun: &[f64],
    weights: &WeightTable,
) -> f64 {
    let images = &order.images;
    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for (rank, image) in images.iter().enumerate() {
        let m = image.code_at(pixel, channel);
        if rank > 0 && images[rank - 1].code_at(pixel, channel) > m {
            continue;
        }
        if rank + 1 < images.len() && images[rank + 1].code_at(pixel, channel) < m {
            continue;
        }
        let w = weights.weight(m) as f64;
        let t = image.exposure() as f64;
        numerator += w * t * fun[m as usize];
        denominator += w * t * t;
    }

    if denominator > MIN_TOTAL_WEIGHT {
        return numerator / denominator;
    }

    // Saturated or black in every usable exposure.
    let shortest = order.shortest();
    if shortest.code_at(pixel, channel) as usize >= MID_CODE {
        fun[TOP_CODE as usize] / shortest.exposure() as f64
    } else {
        let longest = order.longest();
        fun[0] / longest.exposure() as f64
    }
}

/// Sums `t·x` and counts per code. Runs as a parallel fold with one partial
/// table per worker, merged in the reduce step.
fn accumulate_bins(order: &ExposureOrder<'_>, channel: usize, irradiance: &[f64]) -> (Vec<f64>, Vec<u64>) {
    let images = &order.images;
    let shortest = order.shortest();

    irradiance
        .par_iter()
        .enumerate()
        .fold(
            || (vec![0.0f64; CODE_LEVELS], vec![0u64; CODE_LEVELS]),
            |(mut sums, mut counts), (pixel, &x)| {
                for image in images.iter() {
                    let m = image.code_at(pixel, channel);
                    // Saturation is only trusted from the shortest exposure.
                    if m == TOP_CODE && !std::ptr::eq(*image, shortest) {
                        continue;
                    }
                    sums[m as usize] += image.exposure() as f64 * x;
                    counts[m as usize] += 1;
                }
                (sums, counts)
            },
        )
        .reduce(
            || (vec![0.0f64; CODE_LEVELS], vec![0u64; CODE_LEVELS]),
            |(mut sums, mut counts), (other_sums, other_counts)| {
                for m in 0..CODE_LEVELS {
                    sums[m] += other_sums[m];
                    counts[m] += other_counts[m];
                }
                (sums, counts)
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::response::types::CrfState;
    use crate::image_pipeline::test_support::{STANDARD_EXPOSURES, gradient_stack, max_curve_error};

    #[test]
    fn test_recovers_gamma_response() {
        let stack = gradient_stack(64, 32, 1, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        let report = crf.estimate_robertson(&stack, 300).unwrap();

        assert_eq!(crf.state(), CrfState::LutFitted);
        assert!(report.iterations >= 1);
        let error = max_curve_error(|code| crf.remove(code as f32 / 255.0, 0) as f64);
        assert!(error < 0.05, "max error {}", error);
    }

    #[test]
    fn test_brightest_bin_is_one_across_channels() {
        let stack = gradient_stack(32, 32, 3, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        crf.estimate_robertson(&stack, 50).unwrap();
        let luts = crf.luts().unwrap();
        assert_eq!(luts.len(), 3);
        let top = luts.iter().map(|l| l.max_value()).fold(f32::MIN, f32::max);
        assert!((top - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_curve_is_non_decreasing() {
        let stack = gradient_stack(64, 32, 1, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        crf.estimate_robertson(&stack, 100).unwrap();
        let lut = &crf.luts().unwrap()[0];
        for code in 1..=255u8 {
            assert!(lut.at(code) >= lut.at(code - 1), "curve dips at code {}", code);
        }
        let mut previous = f32::MIN;
        for i in 0..=200 {
            let x = crf.apply(i as f32 / 200.0, 0);
            assert!(x >= previous);
            previous = x;
        }
    }

    #[test]
    fn test_iteration_cap_is_reported() {
        let stack = gradient_stack(32, 16, 1, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        let report = crf.estimate_robertson(&stack, 1).unwrap();
        assert_eq!(report.iterations, 1);
        assert!(!report.converged);
        assert_eq!(crf.state(), CrfState::LutFitted);
    }

    #[test]
    fn test_uses_robertson_weights() {
        let stack = gradient_stack(16, 16, 1, &[0.5, 2.0]);
        let mut crf = CrfEstimator::new();
        crf.estimate_robertson(&stack, 5).unwrap();
        assert_eq!(crf.weights().scheme(), WeightScheme::Robertson);
    }

    #[test]
    fn test_rejects_single_exposure() {
        let stack = gradient_stack(16, 16, 1, &[1.0]);
        let mut crf = CrfEstimator::new();
        assert!(matches!(
            crf.estimate_robertson(&stack, 10),
            Err(HdrError::TooFewExposures(1))
        ));
    }

    #[test]
    fn test_normalize_uses_mid_gray() {
        let mut fun: Vec<f64> = (0..CODE_LEVELS).map(|m| m as f64).collect();
        normalize(&mut fun);
        assert_eq!(fun[MID_CODE], 1.0);

        let mut fun = vec![0.0; CODE_LEVELS];
        fun[200] = 4.0;
        fun[201] = 8.0;
        normalize(&mut fun);
        assert_eq!(fun[200], 1.0);
        assert_eq!(fun[201], 2.0);
    }

    #[test]
    fn test_ghosting_guard_skips_inconsistent_exposures() {
        // The middle exposure reads brighter than the longest one, so both sit
        // outside the bracket set by their neighbour and only the shortest counts.
        let short = ExposureImage::from_codes(1, 1, 1, &[50], 1.0).unwrap();
        let middle = ExposureImage::from_codes(1, 1, 1, &[220], 2.0).unwrap();
        let long = ExposureImage::from_codes(1, 1, 1, &[150], 4.0).unwrap();
        let stack = [short, middle, long];
        let order = ExposureOrder::new(&stack);
        let weights = WeightTable::new(WeightScheme::Uniform);
        let fun: Vec<f64> = (0..CODE_LEVELS).map(|m| m as f64).collect();

        let x = estimate_irradiance(&order, 0, 0, &fun, &weights);
        assert!((x - 50.0).abs() < 1e-9, "got {}", x);
    }

    #[test]
    fn test_consistent_exposures_all_contribute() {
        let short = ExposureImage::from_codes(1, 1, 1, &[50], 1.0).unwrap();
        let middle = ExposureImage::from_codes(1, 1, 1, &[100], 2.0).unwrap();
        let long = ExposureImage::from_codes(1, 1, 1, &[200], 4.0).unwrap();
        let stack = [long, short, middle];
        let order = ExposureOrder::new(&stack);
        let weights = WeightTable::new(WeightScheme::Uniform);
        let fun: Vec<f64> = (0..CODE_LEVELS).map(|m| m as f64).collect();

        let x = estimate_irradiance(&order, 0, 0, &fun, &weights);
        let expected = (1.0 * 50.0 + 2.0 * 100.0 + 4.0 * 200.0) / (1.0 + 4.0 + 16.0);
        assert!((x - expected).abs() < 1e-9, "got {} not {}", x, expected);
    }
}
