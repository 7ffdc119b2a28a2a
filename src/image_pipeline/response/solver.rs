//! Dense least-squares backend for the response fits.
//!
//! Rows are accumulated straight into the normal equations `AᵀA x = Aᵀb`, so
//! sparse rows only cost `nnz²` each. Solving uses a Cholesky factorization and
//! falls back to an SVD pseudo-inverse when the system is rank deficient.
//! The backend is compiled in with the `solver` feature.

use crate::image_pipeline::common::Result;

pub struct NormalEquations {
    unknowns: usize,
    ata: Vec<f64>,
    atb: Vec<f64>,
    rows: usize,
}

/// Solution of a least-squares system.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    pub values: Vec<f64>,
    /// True when the Cholesky path failed and the SVD pseudo-inverse was used.
    pub rank_deficient: bool,
}

impl NormalEquations {
    pub fn new(unknowns: usize) -> Self {
        Self {
            unknowns,
            ata: vec![0.0; unknowns * unknowns],
            atb: vec![0.0; unknowns],
            rows: 0,
        }
    }

    pub fn unknowns(&self) -> usize {
        self.unknowns
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Adds the row `sum(coef * x[index]) = rhs`.
    pub fn add_row(&mut self, entries: &[(usize, f64)], rhs: f64) {
        let n = self.unknowns;
        for &(i, a) in entries {
            self.atb[i] += a * rhs;
            for &(j, b) in entries {
                self.ata[i * n + j] += a * b;
            }
        }
        self.rows += 1;
    }

    pub fn solve(&self) -> Result<LeastSquares> {
        backend::solve(self.unknowns, &self.ata, &self.atb)
    }
}

#[cfg(feature = "solver")]
mod backend {
    use nalgebra::{DMatrix, DVector};
    use tracing::{debug, warn};

    use super::LeastSquares;
    use crate::image_pipeline::common::{HdrError, Result};

    /// Singular values below this fraction of the largest are treated as zero.
    const SVD_RELATIVE_EPS: f64 = 1e-12;
    /// Smallest accepted ratio between Cholesky pivots; below it the system is
    /// treated as rank deficient.
    const CHOLESKY_MIN_PIVOT_RATIO: f64 = 1e-7;

    pub fn solve(n: usize, ata: &[f64], atb: &[f64]) -> Result<LeastSquares> {
        let a = DMatrix::from_row_slice(n, n, ata);
        let b = DVector::from_column_slice(atb);

        if let Some(cholesky) = a.clone().cholesky() {
            let diagonal = cholesky.l_dirty().diagonal();
            let (lo, hi) = diagonal
                .iter()
                .fold((f64::INFINITY, 0.0f64), |(lo, hi), &d| (lo.min(d), hi.max(d)));
            let x = cholesky.solve(&b);
            if hi > 0.0 && lo / hi > CHOLESKY_MIN_PIVOT_RATIO && x.iter().all(|v| v.is_finite()) {
                return Ok(LeastSquares {
                    values: x.iter().copied().collect(),
                    rank_deficient: false,
                });
            }
        }

        debug!(unknowns = n, "Cholesky failed, falling back to SVD");
        let svd = a.svd(true, true);
        let largest = svd.singular_values.max();
        if !largest.is_finite() || largest <= 0.0 {
            return Err(HdrError::NumericDegenerate(
                "least-squares system has no information".to_string(),
            ));
        }
        let x = svd
            .solve(&b, largest * SVD_RELATIVE_EPS)
            .map_err(|e| HdrError::NumericDegenerate(e.to_string()))?;
        if !x.iter().all(|v| v.is_finite()) {
            return Err(HdrError::NumericDegenerate(
                "least-squares solution is not finite".to_string(),
            ));
        }
        warn!(unknowns = n, "Least-squares system is rank deficient; using pseudo-inverse");
        Ok(LeastSquares {
            values: x.iter().copied().collect(),
            rank_deficient: true,
        })
    }
}

#[cfg(not(feature = "solver"))]
mod backend {
    use super::LeastSquares;
    use crate::image_pipeline::common::{HdrError, Result};

    pub fn solve(_n: usize, _ata: &[f64], _atb: &[f64]) -> Result<LeastSquares> {
        Err(HdrError::MissingCapability("least-squares solver (enable the `solver` feature)"))
    }
}
