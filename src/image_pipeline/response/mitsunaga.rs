//! Mitsunaga & Nayar (1999) polynomial response recovery.
//!
//! The inverse response is modelled as `f(M) = sum_{k=0..D} c_k M^k` with the
//! constraint `f(1) = 1`. Exposure pairs `(q, p)` with `t_q < t_p` yield
//! residuals `f(M_q) - R_qp f(M_p)`, where `R_qp` is the exposure ratio. With
//! ratio refinement enabled the solver alternates between the coefficients and
//! the ratios until the curve stops moving.

use std::cmp::Ordering;

use tracing::{debug, info, instrument, warn};

use crate::image_pipeline::common::{ExposureImage, HdrError, MAX_CODE, Result, validate_stack};
use crate::image_pipeline::response::estimator::CrfEstimator;
use crate::image_pipeline::response::solver::NormalEquations;
use crate::image_pipeline::response::types::{InverseCrf, evaluate_polynomial};
use crate::image_pipeline::sampling::{INVALID_SAMPLE, SampleExtractor, SampleMatrix};
use crate::image_pipeline::weights::WeightTable;

/// Points at which successive curves are compared.
const CURVE_SAMPLE_POINTS: usize = 256;

/// Denominators smaller than this are skipped during ratio refinement.
const RATIO_FLOOR: f64 = 1e-9;

/// Which exposure pairs contribute constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingStrategy {
    /// Consecutive exposures only: O(exposures) pairs.
    Consecutive,
    /// Every ordered pair: O(exposures²) pairs.
    AllPairs,
}

impl PairingStrategy {
    fn pairs(self, exposures: usize) -> Vec<(usize, usize)> {
        match self {
            PairingStrategy::Consecutive => (1..exposures).map(|p| (p - 1, p)).collect(),
            PairingStrategy::AllPairs => (0..exposures)
                .flat_map(|q| (q + 1..exposures).map(move |p| (q, p)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MitsunagaNayarParams {
    /// Polynomial degree; a negative value tries every degree in `1..=-degree`.
    pub degree: i32,
    pub samples: usize,
    /// Use all exposure pairs instead of consecutive ones.
    pub full: bool,
    pub alpha: f32,
    /// Refine exposure ratios alongside the coefficients.
    pub compute_ratios: bool,
    pub eps: f64,
    pub max_iterations: usize,
    pub seed: u64,
}

impl Default for MitsunagaNayarParams {
    fn default() -> Self {
        Self {
            degree: -6,
            samples: 1000,
            full: false,
            alpha: 0.03,
            compute_ratios: true,
            eps: 1e-4,
            max_iterations: 20,
            seed: 0,
        }
    }
}

impl MitsunagaNayarParams {
    pub fn pairing(&self) -> PairingStrategy {
        if self.full {
            PairingStrategy::AllPairs
        } else {
            PairingStrategy::Consecutive
        }
    }

    fn degrees(&self) -> Result<Vec<usize>> {
        match self.degree.cmp(&0) {
            Ordering::Greater => Ok(vec![self.degree as usize]),
            Ordering::Less => Ok((1..=self.degree.unsigned_abs() as usize).collect()),
            Ordering::Equal => Err(HdrError::InvalidParameter(
                "polynomial degree must be non-zero".to_string(),
            )),
        }
    }
}

/// Outcome of a successful fit.
#[derive(Debug, Clone, PartialEq)]
pub struct MitsunagaNayarReport {
    pub degree: usize,
    /// Total squared residual over all channels.
    pub residual: f64,
    pub iterations: usize,
    pub samples: usize,
}

/// Observations of one exposure pair, as normalized intensities.
struct PairObservations {
    initial_ratio: f64,
    observations: Vec<(f64, f64)>,
}

struct ChannelFit {
    coefficients: Vec<f64>,
    residual: f64,
    iterations: usize,
}

impl CrfEstimator {
    /// Fits a polynomial response with the Mitsunaga–Nayar method.
    ///
    /// Sorts `stack` in place by ascending exposure time. On error the
    /// previously fitted response is kept.
    #[instrument(skip(self, stack), fields(exposures = stack.len()))]
    pub fn estimate_mitsunaga_nayar<I>(
        &mut self,
        stack: &mut [I],
        params: &MitsunagaNayarParams,
    ) -> Result<MitsunagaNayarReport>
    where
        I: AsRef<ExposureImage> + Sync,
    {
        validate_stack(stack)?;
        let degrees = params.degrees()?;
        stack.sort_by(|a, b| a.as_ref().exposure().total_cmp(&b.as_ref().exposure()));

        let usable: Vec<usize> = stack
            .iter()
            .enumerate()
            .filter(|(_, image)| {
                let t = image.as_ref().exposure();
                t.is_finite() && t > 0.0
            })
            .map(|(index, _)| index)
            .collect();
        if usable.len() < 2 {
            return Err(HdrError::TooFewExposures(usable.len()));
        }

        let matrix = SampleExtractor::spatial(params.seed)
            .with_alpha(params.alpha)
            .extract(stack, params.samples);
        if matrix.is_empty() {
            return Err(HdrError::TooFewSamples(0));
        }

        let exposures: Vec<f64> = stack.iter().map(|i| i.as_ref().exposure() as f64).collect();
        let per_channel: Vec<Vec<PairObservations>> = (0..matrix.channels())
            .map(|channel| collect_pairs(&matrix, channel, &usable, &exposures, params.pairing()))
            .collect();
        for (channel, pairs) in per_channel.iter().enumerate() {
            let count: usize = pairs.iter().map(|p| p.observations.len()).sum();
            if count == 0 {
                warn!(channel, "No usable sample pairs");
                return Err(HdrError::TooFewSamples(0));
            }
        }

        let mut best: Option<(usize, f64, usize, Vec<Vec<f64>>)> = None;
        for degree in degrees {
            let mut residual = 0.0;
            let mut iterations = 0;
            let mut coefficients = Vec::with_capacity(per_channel.len());
            for pairs in &per_channel {
                match fit_channel(pairs, degree, params) {
                    Ok(fit) => {
                        residual += fit.residual;
                        iterations = iterations.max(fit.iterations);
                        coefficients.push(fit.coefficients);
                    }
                    Err(HdrError::NumericDegenerate(reason)) => {
                        debug!(degree, %reason, "Degree rejected");
                        residual = f64::INFINITY;
                        break;
                    }
                    Err(other) => return Err(other),
                }
            }
            debug!(degree, residual, iterations, "Mitsunaga-Nayar degree evaluated");

            let improves = best.as_ref().is_none_or(|(_, r, _, _)| residual < *r);
            if residual.is_finite() && improves {
                best = Some((degree, residual, iterations, coefficients));
            }
        }

        let Some((degree, residual, iterations, coefficients)) = best else {
            return Err(HdrError::NumericDegenerate("infinite residual".to_string()));
        };

        info!(degree, residual, iterations, "Mitsunaga-Nayar response fitted");
        self.weights = WeightTable::default();
        self.commit(InverseCrf::polynomial(coefficients));
        Ok(MitsunagaNayarReport {
            degree,
            residual,
            iterations,
            samples: matrix.samples(),
        })
    }
}

fn collect_pairs(
    matrix: &SampleMatrix,
    channel: usize,
    usable: &[usize],
    exposures: &[f64],
    strategy: PairingStrategy,
) -> Vec<PairObservations> {
    strategy
        .pairs(usable.len())
        .into_iter()
        .map(|(a, b)| {
            let (q, p) = (usable[a], usable[b]);
            let observations = matrix
                .rows(channel)
                .filter(|row| row[q] != INVALID_SAMPLE && row[p] != INVALID_SAMPLE)
                .map(|row| (row[q] as f64 / MAX_CODE as f64, row[p] as f64 / MAX_CODE as f64))
                .collect();
            PairObservations {
                initial_ratio: exposures[q] / exposures[p],
                observations,
            }
        })
        .collect()
}

fn fit_channel(
    pairs: &[PairObservations],
    degree: usize,
    params: &MitsunagaNayarParams,
) -> Result<ChannelFit> {
    let mut ratios: Vec<f64> = pairs.iter().map(|p| p.initial_ratio).collect();
    let max_iterations = if params.compute_ratios {
        params.max_iterations.max(1)
    } else {
        1
    };

    let mut coefficients = solve_coefficients(pairs, &ratios, degree)?;
    let mut previous = sample_curve(&coefficients);
    let mut iterations = 1;

    while iterations < max_iterations {
        refine_ratios(pairs, &coefficients, &mut ratios);
        coefficients = solve_coefficients(pairs, &ratios, degree)?;
        iterations += 1;

        let current = sample_curve(&coefficients);
        let change = current
            .iter()
            .zip(previous.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        previous = current;
        if change < params.eps {
            break;
        }
    }

    let residual = pairs
        .iter()
        .zip(ratios.iter())
        .flat_map(|(pair, &ratio)| {
            let coefficients = &coefficients;
            pair.observations.iter().map(move |&(mq, mp)| {
                let r = evaluate_polynomial(coefficients, mq) - ratio * evaluate_polynomial(coefficients, mp);
                r * r
            })
        })
        .sum::<f64>();

    if !residual.is_finite() {
        return Err(HdrError::NumericDegenerate("infinite residual".to_string()));
    }
    Ok(ChannelFit {
        coefficients,
        residual,
        iterations,
    })
}

/// Least-squares coefficients with `c_D = 1 - sum_{k<D} c_k` substituted.
fn solve_coefficients(pairs: &[PairObservations], ratios: &[f64], degree: usize) -> Result<Vec<f64>> {
    let mut system = NormalEquations::new(degree);
    let mut row = Vec::with_capacity(degree);
    let mut powers_q = vec![0.0; degree + 1];
    let mut powers_p = vec![0.0; degree + 1];

    for (pair, &ratio) in pairs.iter().zip(ratios) {
        for &(mq, mp) in &pair.observations {
            fill_powers(mq, &mut powers_q);
            fill_powers(mp, &mut powers_p);
            let d_top = powers_q[degree] - ratio * powers_p[degree];
            row.clear();
            for k in 0..degree {
                let d_k = powers_q[k] - ratio * powers_p[k];
                row.push((k, d_k - d_top));
            }
            system.add_row(&row, -d_top);
        }
    }

    let solution = system.solve()?;
    let mut coefficients = solution.values;
    let top = 1.0 - coefficients.iter().sum::<f64>();
    coefficients.push(top);
    if coefficients.iter().all(|c| c.is_finite()) {
        Ok(coefficients)
    } else {
        Err(HdrError::NumericDegenerate("non-finite coefficients".to_string()))
    }
}

fn fill_powers(x: f64, powers: &mut [f64]) {
    let mut value = 1.0;
    for power in powers.iter_mut() {
        *power = value;
        value *= x;
    }
}

/// `R_qp = mean(f(M_q) / f(M_p))` for every pair.
fn refine_ratios(pairs: &[PairObservations], coefficients: &[f64], ratios: &mut [f64]) {
    for (pair, ratio) in pairs.iter().zip(ratios.iter_mut()) {
        let mut sum = 0.0;
        let mut count = 0usize;
        for &(mq, mp) in &pair.observations {
            let denominator = evaluate_polynomial(coefficients, mp);
            if denominator.abs() > RATIO_FLOOR {
                sum += evaluate_polynomial(coefficients, mq) / denominator;
                count += 1;
            }
        }
        if count > 0 {
            *ratio = sum / count as f64;
        }
    }
}

fn sample_curve(coefficients: &[f64]) -> Vec<f64> {
    (0..CURVE_SAMPLE_POINTS)
        .map(|i| evaluate_polynomial(coefficients, i as f64 / (CURVE_SAMPLE_POINTS - 1) as f64))
        .collect()
}

#[cfg(all(test, feature = "solver"))]
mod tests {
    use super::*;
    use crate::image_pipeline::response::types::CrfState;
    use crate::image_pipeline::test_support::{STANDARD_EXPOSURES, gradient_stack, max_curve_error};

    fn params(degree: i32, compute_ratios: bool, full: bool) -> MitsunagaNayarParams {
        MitsunagaNayarParams {
            degree,
            samples: 400,
            full,
            alpha: 0.02,
            compute_ratios,
            eps: 1e-5,
            max_iterations: 10,
            seed: 1,
        }
    }

    #[test]
    fn test_pairing_strategies() {
        assert_eq!(PairingStrategy::Consecutive.pairs(4), vec![(0, 1), (1, 2), (2, 3)]);
        assert_eq!(
            PairingStrategy::AllPairs.pairs(3),
            vec![(0, 1), (0, 2), (1, 2)]
        );
    }

    #[test]
    fn test_recovers_gamma_response_with_fixed_ratios() {
        let mut stack = gradient_stack(64, 32, 1, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        let report = crf
            .estimate_mitsunaga_nayar(&mut stack, &params(4, false, false))
            .unwrap();

        assert_eq!(report.degree, 4);
        assert_eq!(crf.state(), CrfState::PolynomialFitted);
        let error = max_curve_error(|code| crf.remove(code as f32 / 255.0, 0) as f64);
        assert!(error < 0.05, "max error {}", error);
    }

    #[test]
    fn test_coefficients_sum_to_one() {
        let mut stack = gradient_stack(48, 32, 3, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        crf.estimate_mitsunaga_nayar(&mut stack, &params(3, true, true))
            .unwrap();
        match crf.inverse_crf().unwrap() {
            InverseCrf::Polynomial { coefficients, luts } => {
                assert_eq!(coefficients.len(), 3);
                assert_eq!(luts.len(), 3);
                for c in coefficients {
                    assert_eq!(c.len(), 4);
                    assert!((c.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                }
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_degree_search_keeps_lowest_residual() {
        let mut stack = gradient_stack(64, 32, 1, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        let report = crf
            .estimate_mitsunaga_nayar(&mut stack, &params(-4, true, false))
            .unwrap();
        assert!((1..=4).contains(&report.degree));

        for degree in 1..=4 {
            let mut single = CrfEstimator::new();
            let fixed = single
                .estimate_mitsunaga_nayar(&mut stack, &params(degree, true, false))
                .unwrap();
            assert!(report.residual <= fixed.residual + 1e-12);
        }
        let error = max_curve_error(|code| crf.remove(code as f32 / 255.0, 0) as f64);
        assert!(error < 0.05, "max error {}", error);
    }

    #[test]
    fn test_sorts_stack_by_exposure() {
        let mut stack = gradient_stack(32, 16, 1, &[4.0, 0.25, 1.0]);
        let mut crf = CrfEstimator::new();
        crf.estimate_mitsunaga_nayar(&mut stack, &params(3, false, false))
            .unwrap();
        let order: Vec<f32> = stack.iter().map(|i| i.exposure()).collect();
        assert_eq!(order, vec![0.25, 1.0, 4.0]);
    }

    #[test]
    fn test_apply_is_non_decreasing() {
        let mut stack = gradient_stack(64, 32, 1, &STANDARD_EXPOSURES);
        let mut crf = CrfEstimator::new();
        crf.estimate_mitsunaga_nayar(&mut stack, &params(3, false, false))
            .unwrap();
        let mut previous = f32::MIN;
        for i in 0..=200 {
            let x = crf.apply(i as f32 / 200.0, 0);
            assert!(x >= previous);
            previous = x;
        }
    }

    #[test]
    fn test_rejects_zero_degree_and_short_stacks() {
        let mut stack = gradient_stack(16, 16, 1, &[1.0, 2.0]);
        let mut crf = CrfEstimator::new();
        assert!(matches!(
            crf.estimate_mitsunaga_nayar(&mut stack, &params(0, false, false)),
            Err(HdrError::InvalidParameter(_))
        ));

        let mut stack = gradient_stack(16, 16, 1, &[0.0, 2.0]);
        assert!(matches!(
            crf.estimate_mitsunaga_nayar(&mut stack, &params(2, false, false)),
            Err(HdrError::TooFewExposures(1))
        ));
        assert_eq!(crf.state(), CrfState::Uninitialized);
    }

    #[test]
    fn test_fully_filtered_samples_are_rejected() {
        // Every code is 255, so the alpha filter removes all observations.
        let white = ExposureImage::from_vec(8, 8, 1, vec![1.0; 64], 1.0).unwrap();
        let mut stack = vec![white.clone(), ExposureImage::from_vec(8, 8, 1, vec![1.0; 64], 2.0).unwrap()];
        let mut crf = CrfEstimator::new();
        assert!(matches!(
            crf.estimate_mitsunaga_nayar(&mut stack, &params(2, false, false)),
            Err(HdrError::TooFewSamples(0))
        ));
    }
}
