//! Debevec & Malik (1997) response recovery.
//!
//! Solves for the log inverse response `g(z)` and the log radiance `ln E_i` of
//! every sample by weighted linear least squares:
//!
//! - one row per observation: `w(z)·g(z) - w(z)·ln E_i = w(z)·ln Δt_j`
//! - one row pinning `g(128) = 0`
//! - 254 rows penalizing `λ·w(k)·(g(k-1) - 2g(k) + g(k+1))`
//!
//! The recovered `exp(g)` becomes a per-channel lookup table.

use tracing::{debug, info, instrument};

use crate::image_pipeline::common::{
    CODE_LEVELS, ExposureImage, HdrError, Result, validate_stack,
};
use crate::image_pipeline::response::estimator::CrfEstimator;
use crate::image_pipeline::response::solver::NormalEquations;
use crate::image_pipeline::response::types::{InverseCrf, ResponseLut};
use crate::image_pipeline::sampling::{INVALID_SAMPLE, SampleExtractor, SampleMatrix};
use crate::image_pipeline::weights::{WeightScheme, WeightTable};

/// Code whose log response is pinned to zero.
const PINNED_CODE: usize = 128;

/// Lower bound on the weight of a smoothness row. Codes the weighting scheme
/// ignores still get a curvature constraint, so `g` stays determined there.
const MIN_SMOOTHNESS_WEIGHT: f64 = 1e-3;

/// Defaults used when the pipeline has to fit a response on its own.
pub const DEFAULT_DEBEVEC_SAMPLES: usize = 256;
pub const DEFAULT_DEBEVEC_SMOOTHNESS: f32 = 20.0;

impl CrfEstimator {
    /// Fits a lookup-table response with the Debevec–Malik method.
    ///
    /// Requires at least two same-shape exposures with positive exposure
    /// times. On error the previously fitted response is kept.
    #[instrument(skip(self, stack), fields(exposures = stack.len()))]
    pub fn estimate_debevec_malik<I>(
        &mut self,
        stack: &[I],
        scheme: WeightScheme,
        samples: usize,
        smoothness: f32,
    ) -> Result<()>
    where
        I: AsRef<ExposureImage> + Sync,
    {
        if stack.len() < 2 {
            return Err(HdrError::TooFewExposures(stack.len()));
        }
        validate_stack(stack)?;
        if samples < 2 {
            return Err(HdrError::TooFewSamples(samples));
        }
        if !smoothness.is_finite() || smoothness < 0.0 {
            return Err(HdrError::InvalidParameter(format!(
                "smoothness must be a non-negative number, got {}",
                smoothness
            )));
        }
        let log_exposures = log_exposures(stack)?;

        let weights = WeightTable::new(scheme);
        let matrix = SampleExtractor::histogram().extract(stack, samples);
        if matrix.is_empty() {
            return Err(HdrError::TooFewSamples(0));
        }

        let luts = (0..matrix.channels())
            .map(|channel| {
                let _span = tracing::debug_span!("debevec_channel", channel).entered();
                solve_channel(&matrix, channel, &log_exposures, &weights, smoothness as f64)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            channels = luts.len(),
            samples = matrix.samples(),
            smoothness,
            "Debevec-Malik response fitted"
        );
        self.weights = weights;
        self.commit(InverseCrf::Lut(luts));
        Ok(())
    }
}

pub(crate) fn log_exposures<I: AsRef<ExposureImage>>(stack: &[I]) -> Result<Vec<f64>> {
    stack
        .iter()
        .map(|image| {
            let t = image.as_ref().exposure();
            if t.is_finite() && t > 0.0 {
                Ok((t as f64).ln())
            } else {
                Err(HdrError::InvalidParameter(format!(
                    "exposure time must be positive, got {}",
                    t
                )))
            }
        })
        .collect()
}

fn solve_channel(
    matrix: &SampleMatrix,
    channel: usize,
    log_exposures: &[f64],
    weights: &WeightTable,
    smoothness: f64,
) -> Result<ResponseLut> {
    // Samples without a single weighted observation would leave ln E free.
    let mut radiance_unknown = vec![None; matrix.samples()];
    let mut used = 0usize;
    for (sample, row) in matrix.rows(channel).enumerate() {
        let observed = row
            .iter()
            .any(|&z| z != INVALID_SAMPLE && weights.weight(z as u8) > 0.0);
        if observed {
            radiance_unknown[sample] = Some(CODE_LEVELS + used);
            used += 1;
        }
    }
    if used == 0 {
        return Err(HdrError::TooFewSamples(0));
    }

    let mut system = NormalEquations::new(CODE_LEVELS + used);
    for (sample, row) in matrix.rows(channel).enumerate() {
        let Some(unknown) = radiance_unknown[sample] else {
            continue;
        };
        for (exposure, &z) in row.iter().enumerate() {
            if z == INVALID_SAMPLE {
                continue;
            }
            let w = weights.weight(z as u8) as f64;
            if w <= 0.0 {
                continue;
            }
            system.add_row(&[(z as usize, w), (unknown, -w)], w * log_exposures[exposure]);
        }
    }

    system.add_row(&[(PINNED_CODE, 1.0)], 0.0);

    for k in 1..CODE_LEVELS - 1 {
        let w = smoothness * (weights.weight(k as u8) as f64).max(MIN_SMOOTHNESS_WEIGHT);
        system.add_row(&[(k - 1, w), (k, -2.0 * w), (k + 1, w)], 0.0);
    }

    debug!(
        unknowns = system.unknowns(),
        rows = system.rows(),
        "Solving Debevec-Malik system"
    );
    let solution = system.solve()?;
    let mut values = [0.0f32; CODE_LEVELS];
    for (code, value) in values.iter_mut().enumerate() {
        *value = solution.values[code].exp() as f32;
    }
    let corrected = enforce_monotone(&mut values);
    if corrected > 0 {
        debug!(channel, corrected, "Clamped non-monotone response entries");
    }
    Ok(ResponseLut::new(values))
}

/// Makes the table non-decreasing by clamping outward from the pinned code:
/// entries above it never fall below their left neighbour, entries below it
/// never rise above their right neighbour. Returns the number of changes.
fn enforce_monotone(values: &mut [f32; CODE_LEVELS]) -> usize {
    let mut corrected = 0;
    for code in PINNED_CODE + 1..CODE_LEVELS {
        if values[code] < values[code - 1] {
            values[code] = values[code - 1];
            corrected += 1;
        }
    }
    for code in (0..PINNED_CODE).rev() {
        if values[code] > values[code + 1] {
            values[code] = values[code + 1];
            corrected += 1;
        }
    }
    corrected
}
