//! Inverse camera response representations.

use crate::image_pipeline::common::{CODE_LEVELS, HdrError, MAX_CODE, Result};

/// Gamma used by the fixed sRGB-like response.
pub const DEFAULT_GAMMA: f32 = 2.2;

/// Bisection steps used to invert a polynomial response.
const POLYNOMIAL_INVERSION_STEPS: usize = 48;

/// Inverse response sampled at the 256 intensity codes.
///
/// `values[code]` is the relative radiance that produced `code`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseLut {
    values: [f32; CODE_LEVELS],
}

impl ResponseLut {
    pub fn new(values: [f32; CODE_LEVELS]) -> Self {
        Self { values }
    }

    pub fn from_fn<F: Fn(usize) -> f32>(f: F) -> Self {
        let mut values = [0.0f32; CODE_LEVELS];
        for (code, value) in values.iter_mut().enumerate() {
            *value = f(code);
        }
        Self { values }
    }

    pub fn values(&self) -> &[f32; CODE_LEVELS] {
        &self.values
    }

    #[inline]
    pub fn at(&self, code: u8) -> f32 {
        self.values[code as usize]
    }

    /// Linearizes a normalized intensity, interpolating between codes.
    pub fn evaluate(&self, x: f32) -> f32 {
        let position = x.clamp(0.0, 1.0) * MAX_CODE;
        let lo = position.floor() as usize;
        if lo >= CODE_LEVELS - 1 {
            return self.values[CODE_LEVELS - 1];
        }
        let frac = position - lo as f32;
        self.values[lo] + frac * (self.values[lo + 1] - self.values[lo])
    }

    /// Maps relative radiance back to a normalized intensity by binary search
    /// over the (monotone) table.
    pub fn invert(&self, y: f32) -> f32 {
        let upper = self.values.partition_point(|&v| v < y);
        if upper == 0 {
            return 0.0;
        }
        if upper >= CODE_LEVELS {
            return 1.0;
        }
        let (v0, v1) = (self.values[upper - 1], self.values[upper]);
        let frac = if v1 > v0 { (y - v0) / (v1 - v0) } else { 0.0 };
        ((upper - 1) as f32 + frac.clamp(0.0, 1.0)) / MAX_CODE
    }

    pub fn max_value(&self) -> f32 {
        self.values.iter().copied().fold(f32::MIN, f32::max)
    }

    pub fn scale(&mut self, factor: f32) {
        for value in self.values.iter_mut() {
            *value *= factor;
        }
    }
}

/// Inverse camera response: exactly one representation is active at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum InverseCrf {
    /// The camera is assumed linear.
    Linear,
    /// Fixed power-law response, `radiance = x^gamma`.
    Gamma(f32),
    /// Per-channel lookup tables.
    Lut(Vec<ResponseLut>),
    /// Per-channel polynomial `sum_k c_k x^k`, plus the same curve baked into
    /// lookup tables for code-indexed consumers.
    Polynomial {
        coefficients: Vec<Vec<f64>>,
        luts: Vec<ResponseLut>,
    },
}

impl InverseCrf {
    /// Builds a polynomial response and bakes its lookup tables.
    pub fn polynomial(coefficients: Vec<Vec<f64>>) -> Self {
        let luts = coefficients
            .iter()
            .map(|c| {
                ResponseLut::from_fn(|code| {
                    evaluate_polynomial(c, code as f64 / MAX_CODE as f64) as f32
                })
            })
            .collect();
        InverseCrf::Polynomial { coefficients, luts }
    }

    /// Lookup tables of a fitted response, if this variant has them.
    pub fn luts(&self) -> Option<&[ResponseLut]> {
        match self {
            InverseCrf::Lut(luts) => Some(luts),
            InverseCrf::Polynomial { luts, .. } => Some(luts),
            InverseCrf::Linear | InverseCrf::Gamma(_) => None,
        }
    }

    /// Number of channels the response distinguishes; 0 means channel-agnostic.
    pub fn channels(&self) -> usize {
        self.luts().map_or(0, |luts| luts.len())
    }

    /// Rejects responses that carry no per-channel data.
    pub fn validate(&self) -> Result<()> {
        let empty = match self {
            InverseCrf::Linear | InverseCrf::Gamma(_) => false,
            InverseCrf::Lut(luts) => luts.is_empty(),
            InverseCrf::Polynomial { coefficients, luts } => {
                coefficients.is_empty() || coefficients.len() != luts.len()
            }
        };
        if empty {
            return Err(HdrError::ShapeMismatch(
                "response has no per-channel tables".to_string(),
            ));
        }
        Ok(())
    }

    /// Camera response removal: normalized intensity to relative radiance.
    /// A response without tables leaves the value unchanged.
    pub fn remove(&self, x: f32, channel: usize) -> f32 {
        match self {
            InverseCrf::Linear => x,
            InverseCrf::Gamma(gamma) => x.max(0.0).powf(*gamma),
            InverseCrf::Lut(luts) => {
                pick(luts.as_slice(), channel).map_or(x, |lut| lut.evaluate(x))
            }
            InverseCrf::Polynomial { coefficients, .. } => {
                pick(coefficients.as_slice(), channel)
                    .map_or(x, |c| evaluate_polynomial(c, x as f64) as f32)
            }
        }
    }

    /// Camera response application: relative radiance to normalized intensity.
    pub fn apply(&self, y: f32, channel: usize) -> f32 {
        match self {
            InverseCrf::Linear => y,
            InverseCrf::Gamma(gamma) => y.max(0.0).powf(1.0 / *gamma),
            InverseCrf::Lut(luts) => {
                pick(luts.as_slice(), channel).map_or(y, |lut| lut.invert(y))
            }
            InverseCrf::Polynomial { coefficients, .. } => {
                pick(coefficients.as_slice(), channel)
                    .map_or(y, |c| invert_polynomial(c, y as f64) as f32)
            }
        }
    }

    /// The response baked into `channels` lookup tables.
    pub fn baked_luts(&self, channels: usize) -> Vec<ResponseLut> {
        match self.luts() {
            Some(luts) => luts.to_vec(),
            None => (0..channels.max(1))
                .map(|channel| {
                    ResponseLut::from_fn(|code| self.remove(code as f32 / MAX_CODE, channel))
                })
                .collect(),
        }
    }

    /// Flat `channels x 256` array of the baked response.
    pub fn to_flat(&self, channels: usize) -> Vec<f32> {
        self.baked_luts(channels)
            .iter()
            .flat_map(|lut| lut.values().iter().copied())
            .collect()
    }

    /// Rebuilds a lookup-table response from [`InverseCrf::to_flat`] output.
    pub fn from_flat(channels: usize, values: &[f32]) -> Result<Self> {
        if channels == 0 || values.len() != channels * CODE_LEVELS {
            return Err(HdrError::SizeMismatch {
                expected: channels * CODE_LEVELS,
                actual: values.len(),
            });
        }
        let luts = values
            .chunks_exact(CODE_LEVELS)
            .map(|chunk| ResponseLut::from_fn(|code| chunk[code]))
            .collect();
        Ok(InverseCrf::Lut(luts))
    }
}

/// Table for `channel`; the last table is shared by any higher channel.
#[inline]
fn pick<T>(per_channel: &[T], channel: usize) -> Option<&T> {
    per_channel.get(channel.min(per_channel.len().saturating_sub(1)))
}

/// Horner evaluation of `sum_k c_k x^k`.
pub fn evaluate_polynomial(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

fn invert_polynomial(coefficients: &[f64], y: f64) -> f64 {
    if y <= evaluate_polynomial(coefficients, 0.0) {
        return 0.0;
    }
    if y >= evaluate_polynomial(coefficients, 1.0) {
        return 1.0;
    }
    let (mut lo, mut hi) = (0.0f64, 1.0f64);
    for _ in 0..POLYNOMIAL_INVERSION_STEPS {
        let mid = 0.5 * (lo + hi);
        if evaluate_polynomial(coefficients, mid) < y {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Tag of the estimator's active response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrfState {
    Uninitialized,
    Linear,
    Gamma,
    LutFitted,
    PolynomialFitted,
}

impl From<&InverseCrf> for CrfState {
    fn from(curve: &InverseCrf) -> Self {
        match curve {
            InverseCrf::Linear => CrfState::Linear,
            InverseCrf::Gamma(_) => CrfState::Gamma,
            InverseCrf::Lut(_) => CrfState::LutFitted,
            InverseCrf::Polynomial { .. } => CrfState::PolynomialFitted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_round_trip_is_exact() {
        let crf = InverseCrf::Linear;
        for i in 0..=1000 {
            let x = i as f32 / 1000.0;
            assert_eq!(crf.remove(crf.apply(x, 0), 0), x);
        }
    }

    #[test]
    fn test_gamma_round_trip() {
        let crf = InverseCrf::Gamma(DEFAULT_GAMMA);
        assert!((crf.remove(0.5, 1) - 0.5f32.powf(2.2)).abs() < 1e-6);
        for i in 0..=100 {
            let x = i as f32 / 100.0;
            assert!((crf.apply(crf.remove(x, 0), 0) - x).abs() < 1e-5);
        }
    }

    #[test]
    fn test_lut_evaluate_interpolates() {
        let lut = ResponseLut::from_fn(|code| code as f32 * 2.0);
        assert_eq!(lut.evaluate(0.0), 0.0);
        assert_eq!(lut.evaluate(1.0), 510.0);
        let half_code = 10.5 / MAX_CODE;
        assert!((lut.evaluate(half_code) - 21.0).abs() < 1e-3);
    }

    #[test]
    fn test_lut_invert_inverts_evaluate() {
        let lut = ResponseLut::from_fn(|code| (code as f32 / MAX_CODE).powf(2.2));
        for code in 1..255u8 {
            let x = code as f32 / MAX_CODE;
            assert!((lut.invert(lut.evaluate(x)) - x).abs() < 1e-4);
        }
        assert_eq!(lut.invert(-1.0), 0.0);
        assert_eq!(lut.invert(2.0), 1.0);
    }

    #[test]
    fn test_polynomial_variant_bakes_luts() {
        let crf = InverseCrf::polynomial(vec![vec![0.0, 0.25, 0.75]]);
        let luts = crf.luts().unwrap();
        assert_eq!(luts.len(), 1);
        assert!((luts[0].at(255) - 1.0).abs() < 1e-6);
        assert!((crf.remove(0.5, 0) - (0.125 + 0.1875)).abs() < 1e-6);
        let y = crf.remove(0.3, 0);
        assert!((crf.apply(y, 0) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_flat_round_trip() {
        let crf = InverseCrf::Lut(vec![
            ResponseLut::from_fn(|c| c as f32),
            ResponseLut::from_fn(|c| 2.0 * c as f32),
        ]);
        let flat = crf.to_flat(2);
        assert_eq!(flat.len(), 512);
        assert_eq!(InverseCrf::from_flat(2, &flat).unwrap(), crf);
        assert!(InverseCrf::from_flat(3, &flat).is_err());
    }

    #[test]
    fn test_gamma_bakes_one_lut_per_channel() {
        let flat = InverseCrf::Gamma(2.2).to_flat(3);
        assert_eq!(flat.len(), 3 * CODE_LEVELS);
        assert!((flat[255] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_tables_are_rejected_without_panicking() {
        let crf = InverseCrf::Lut(vec![]);
        assert!(matches!(crf.validate(), Err(HdrError::ShapeMismatch(_))));
        assert_eq!(crf.remove(0.5, 0), 0.5);
        assert_eq!(crf.apply(0.5, 2), 0.5);

        let poly = InverseCrf::polynomial(vec![]);
        assert!(poly.validate().is_err());
        assert_eq!(poly.remove(0.25, 1), 0.25);

        assert!(InverseCrf::Linear.validate().is_ok());
        assert!(InverseCrf::polynomial(vec![vec![0.0, 1.0]]).validate().is_ok());
    }

    #[test]
    fn test_higher_channels_share_the_last_table() {
        let crf = InverseCrf::Lut(vec![ResponseLut::from_fn(|c| c as f32)]);
        assert_eq!(crf.remove(1.0, 2), 255.0);
        let poly = InverseCrf::polynomial(vec![vec![0.0, 2.0]]);
        assert!((poly.remove(0.5, 3) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_state_tags() {
        assert_eq!(CrfState::from(&InverseCrf::Linear), CrfState::Linear);
        assert_eq!(CrfState::from(&InverseCrf::Gamma(2.2)), CrfState::Gamma);
        assert_eq!(
            CrfState::from(&InverseCrf::polynomial(vec![vec![0.0, 1.0]])),
            CrfState::PolynomialFitted
        );
    }
}
