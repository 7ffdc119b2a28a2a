//! Reduction of an exposure stack to a compact set of intensity observations.
//!
//! Response curve fitting only needs a few hundred observations per exposure.
//! Two strategies are provided:
//!
//! - **Histogram**: inverts each exposure's cumulative histogram at uniformly
//!   spaced quantiles. Because the camera response is monotone, the same
//!   quantile in every exposure corresponds to the same scene radiance. Always
//!   yields exactly the requested number of samples.
//! - **Spatial**: picks pixel locations with a jittered stratified grid and
//!   reads every exposure at those same locations. The grid may hold fewer
//!   cells than requested, so callers must read the count back from the
//!   returned [`SampleMatrix`].
//!
//! An optional `alpha` post-filter marks near-black and near-saturated codes as
//! [`INVALID_SAMPLE`].

use rayon::prelude::*;
use tracing::debug;

use crate::image_pipeline::common::{CODE_LEVELS, ExposureImage, MAX_CODE};

/// Marker for an observation excluded from fitting.
pub const INVALID_SAMPLE: i32 = -1;

/// R2 low-discrepancy sequence constant (plastic number).
const PLASTIC: f64 = 1.324_717_957_244_746;

/// Per-channel observation table of shape `[samples x exposures]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleMatrix {
    channels: usize,
    exposures: usize,
    samples: usize,
    data: Vec<i32>,
}

impl SampleMatrix {
    pub fn new(channels: usize, exposures: usize, samples: usize) -> Self {
        Self {
            channels,
            exposures,
            samples,
            data: vec![INVALID_SAMPLE; channels * exposures * samples],
        }
    }

    /// A matrix with no samples, returned when a stack cannot be sampled.
    pub fn empty(channels: usize, exposures: usize) -> Self {
        Self::new(channels, exposures, 0)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn exposures(&self) -> usize {
        self.exposures
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[i32] {
        &self.data
    }

    #[inline]
    fn index(&self, channel: usize, sample: usize, exposure: usize) -> usize {
        (channel * self.samples + sample) * self.exposures + exposure
    }

    #[inline]
    pub fn get(&self, channel: usize, sample: usize, exposure: usize) -> i32 {
        self.data[self.index(channel, sample, exposure)]
    }

    #[inline]
    pub fn set(&mut self, channel: usize, sample: usize, exposure: usize, code: i32) {
        let index = self.index(channel, sample, exposure);
        self.data[index] = code;
    }

    /// Rows of one channel; each row holds one code per exposure.
    pub fn rows(&self, channel: usize) -> impl Iterator<Item = &[i32]> + '_ {
        let start = channel * self.samples * self.exposures;
        let end = start + self.samples * self.exposures;
        self.data[start..end].chunks_exact(self.exposures.max(1))
    }

    /// Number of observations that survived filtering.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&c| c != INVALID_SAMPLE).count()
    }

    /// Marks codes outside `[alpha, 1 - alpha]` (normalized) as invalid.
    pub fn apply_alpha(&mut self, alpha: f32) {
        let alpha = clamp_alpha(alpha);
        let (t_min, t_max) = alpha_thresholds(alpha);
        let mut rejected = 0usize;
        for code in self.data.iter_mut() {
            if *code != INVALID_SAMPLE && (*code < t_min || *code > t_max) {
                *code = INVALID_SAMPLE;
                rejected += 1;
            }
        }
        debug!(alpha, t_min, t_max, rejected, "Applied alpha filter");
    }
}

/// Folds `alpha` into [0, 0.5]; values above 0.5 are mirrored.
pub fn clamp_alpha(alpha: f32) -> f32 {
    if !alpha.is_finite() {
        return 0.0;
    }
    let alpha = if alpha > 0.5 { 1.0 - alpha } else { alpha };
    alpha.clamp(0.0, 0.5)
}

/// Inclusive code range kept by the alpha filter.
pub fn alpha_thresholds(alpha: f32) -> (i32, i32) {
    let t_min = (alpha * MAX_CODE).round() as i32;
    let t_max = ((1.0 - alpha) * MAX_CODE).round() as i32;
    (t_min, t_max)
}

/// Sampling strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMethod {
    Histogram,
    Spatial { seed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleExtractor {
    method: SamplingMethod,
    alpha: f32,
}

impl SampleExtractor {
    pub fn histogram() -> Self {
        Self {
            method: SamplingMethod::Histogram,
            alpha: 0.0,
        }
    }

    pub fn spatial(seed: u64) -> Self {
        Self {
            method: SamplingMethod::Spatial { seed },
            alpha: 0.0,
        }
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = clamp_alpha(alpha);
        self
    }

    pub fn method(&self) -> SamplingMethod {
        self.method
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Samples a same-shape stack. Fewer than two exposures or fewer than two
    /// requested samples yield an empty matrix.
    pub fn extract<I>(&self, stack: &[I], samples: usize) -> SampleMatrix
    where
        I: AsRef<ExposureImage> + Sync,
    {
        let channels = stack.first().map_or(0, |i| i.as_ref().channels());
        if stack.len() < 2 || samples < 2 {
            debug!(
                exposures = stack.len(),
                samples, "Stack cannot be sampled, returning empty matrix"
            );
            return SampleMatrix::empty(channels, stack.len());
        }

        let mut matrix = match self.method {
            SamplingMethod::Histogram => histogram_samples(stack, samples),
            SamplingMethod::Spatial { seed } => spatial_samples(stack, samples, seed),
        };
        if self.alpha > 0.0 {
            matrix.apply_alpha(self.alpha);
        }
        matrix
    }
}

fn histogram_samples<I>(stack: &[I], samples: usize) -> SampleMatrix
where
    I: AsRef<ExposureImage> + Sync,
{
    let channels = stack[0].as_ref().channels();
    let exposures = stack.len();

    // cumulative[exposure][channel][code]
    let cumulative: Vec<Vec<[u64; CODE_LEVELS]>> = stack
        .par_iter()
        .map(|image| {
            let image = image.as_ref();
            let mut hist = vec![[0u64; CODE_LEVELS]; channels];
            for pixel in 0..image.pixel_count() {
                for (channel, bins) in hist.iter_mut().enumerate() {
                    bins[image.code_at(pixel, channel) as usize] += 1;
                }
            }
            for bins in hist.iter_mut() {
                for code in 1..CODE_LEVELS {
                    bins[code] += bins[code - 1];
                }
            }
            hist
        })
        .collect();

    let mut matrix = SampleMatrix::new(channels, exposures, samples);
    for (exposure, per_channel) in cumulative.iter().enumerate() {
        for (channel, cum) in per_channel.iter().enumerate() {
            let total = cum[CODE_LEVELS - 1] as f64;
            for sample in 0..samples {
                let quantile = sample as f64 / (samples - 1) as f64;
                let target = (quantile * total).max(1.0);
                let code = cum.partition_point(|&count| (count as f64) < target);
                matrix.set(channel, sample, exposure, code.min(CODE_LEVELS - 1) as i32);
            }
        }
    }

    debug!(samples, exposures, channels, "Extracted histogram samples");
    matrix
}

fn spatial_samples<I>(stack: &[I], requested: usize, seed: u64) -> SampleMatrix
where
    I: AsRef<ExposureImage> + Sync,
{
    let first = stack[0].as_ref();
    let channels = first.channels();
    let exposures = stack.len();
    let locations = stratified_locations(first.width(), first.height(), requested, seed);
    let samples = locations.len();

    let per_exposure: Vec<Vec<i32>> = stack
        .par_iter()
        .map(|image| {
            let image = image.as_ref();
            let mut codes = Vec::with_capacity(channels * samples);
            for channel in 0..channels {
                for &(x, y) in &locations {
                    codes.push(image.code(x, y, channel) as i32);
                }
            }
            codes
        })
        .collect();

    let mut matrix = SampleMatrix::new(channels, exposures, samples);
    for (exposure, codes) in per_exposure.iter().enumerate() {
        for channel in 0..channels {
            for sample in 0..samples {
                matrix.set(channel, sample, exposure, codes[channel * samples + sample]);
            }
        }
    }

    debug!(requested, samples, exposures, "Extracted spatial samples");
    matrix
}

/// Jittered stratified grid over the image. Returns at most `requested`
/// locations, shared by every exposure so correspondences are preserved.
pub fn stratified_locations(
    width: usize,
    height: usize,
    requested: usize,
    seed: u64,
) -> Vec<(usize, usize)> {
    let k = requested.min(width * height);
    if k == 0 {
        return Vec::new();
    }

    let aspect = width as f64 / height as f64;
    let cols = ((k as f64 * aspect).sqrt().floor() as usize).clamp(1, width.min(k));
    let rows = (k / cols).clamp(1, height);

    let cell_w = width as f64 / cols as f64;
    let cell_h = height as f64 / rows as f64;
    let alpha1 = 1.0 / PLASTIC;
    let alpha2 = 1.0 / (PLASTIC * PLASTIC);
    let start = (seed % 1_000_003) as f64 + 0.5;

    let mut locations = Vec::with_capacity(cols * rows);
    for row in 0..rows {
        for col in 0..cols {
            let n = (row * cols + col) as f64 + start;
            let jx = (n * alpha1).fract();
            let jy = (n * alpha2).fract();
            let x = (((col as f64 + jx) * cell_w) as usize).min(width - 1);
            let y = (((row as f64 + jy) * cell_h) as usize).min(height - 1);
            locations.push((x, y));
        }
    }
    locations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_pipeline::test_support::{gradient_stack, ramp_codes};

    #[test]
    fn test_histogram_returns_exact_count() {
        let stack = gradient_stack(32, 16, 3, &[0.25, 1.0, 4.0]);
        for requested in [2, 17, 100, 1000] {
            let matrix = SampleExtractor::histogram().extract(&stack, requested);
            assert_eq!(matrix.samples(), requested);
            assert_eq!(matrix.len(), 3 * 3 * requested);
        }
    }

    #[test]
    fn test_histogram_quantiles_are_monotone() {
        let stack = gradient_stack(32, 16, 1, &[0.5, 2.0]);
        let matrix = SampleExtractor::histogram().extract(&stack, 50);
        for exposure in 0..2 {
            let codes: Vec<i32> = (0..50).map(|s| matrix.get(0, s, exposure)).collect();
            assert!(codes.windows(2).all(|w| w[0] <= w[1]));
        }
        // Longer exposure never reads darker at the same quantile.
        for sample in 0..50 {
            assert!(matrix.get(0, sample, 0) <= matrix.get(0, sample, 1));
        }
    }

    #[test]
    fn test_histogram_extremes_match_min_and_max_codes() {
        let codes = ramp_codes(16, 16, 20, 200);
        let a = ExposureImage::from_codes(16, 16, 1, &codes, 1.0).unwrap();
        let b = ExposureImage::from_codes(16, 16, 1, &codes, 2.0).unwrap();
        let matrix = SampleExtractor::histogram().extract(&[a, b], 10);
        assert_eq!(matrix.get(0, 0, 0), 20);
        assert_eq!(matrix.get(0, 9, 0), 200);
    }

    #[test]
    fn test_spatial_returns_at_most_requested() {
        let stack = gradient_stack(40, 10, 3, &[0.25, 1.0, 4.0]);
        for requested in [2, 7, 50, 399, 400, 5000] {
            let matrix = SampleExtractor::spatial(3).extract(&stack, requested);
            assert!(matrix.samples() <= requested);
            assert!(matrix.samples() >= 1);
            assert_eq!(matrix.len(), 3 * 3 * matrix.samples());
        }
    }

    #[test]
    fn test_spatial_preserves_pixel_correspondence() {
        let stack = gradient_stack(24, 24, 1, &[1.0, 1.0]);
        let matrix = SampleExtractor::spatial(11).extract(&stack, 64);
        for row in matrix.rows(0) {
            assert_eq!(row[0], row[1]);
        }
    }

    #[test]
    fn test_stratified_locations_stay_in_bounds() {
        let locations = stratified_locations(13, 7, 40, 5);
        assert!(!locations.is_empty());
        assert!(locations.len() <= 40);
        assert!(locations.iter().all(|&(x, y)| x < 13 && y < 7));
    }

    #[test]
    fn test_degenerate_inputs_yield_empty_matrix() {
        let stack = gradient_stack(8, 8, 3, &[1.0]);
        assert!(SampleExtractor::histogram().extract(&stack, 10).is_empty());

        let stack = gradient_stack(8, 8, 3, &[1.0, 2.0]);
        assert!(SampleExtractor::histogram().extract(&stack, 1).is_empty());
        assert!(SampleExtractor::spatial(0).extract(&stack, 0).is_empty());
    }

    #[test]
    fn test_alpha_clamping() {
        assert_eq!(clamp_alpha(-0.1), 0.0);
        assert_eq!(clamp_alpha(0.2), 0.2);
        assert!((clamp_alpha(0.8) - 0.2).abs() < 1e-6);
        assert_eq!(clamp_alpha(f32::NAN), 0.0);
        assert_eq!(alpha_thresholds(0.2), (51, 204));
    }

    #[test]
    fn test_alpha_filter_rejects_dark_and_saturated_codes() {
        let stack = gradient_stack(32, 32, 3, &[0.25, 1.0, 4.0]);
        for extractor in [
            SampleExtractor::histogram().with_alpha(0.2),
            SampleExtractor::spatial(7).with_alpha(0.2),
        ] {
            let matrix = extractor.extract(&stack, 200);
            assert!(matrix.valid_count() > 0);
            for &code in matrix.data() {
                assert!(
                    code == INVALID_SAMPLE || (51..=204).contains(&code),
                    "code {} escaped the alpha filter",
                    code
                );
            }
        }
    }
}
