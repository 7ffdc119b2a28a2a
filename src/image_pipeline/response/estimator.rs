use tracing::debug;

use crate::image_pipeline::response::types::{CrfState, DEFAULT_GAMMA, InverseCrf, ResponseLut};
use crate::image_pipeline::weights::WeightTable;

/// Owner of a camera response curve and of the weight table used to fit it.
///
/// The `estimate_*` methods live next to their algorithms in the sibling
/// modules. They take `&mut self`, so fits on one instance are serialized.
/// A failed fit leaves the previous curve and weight table in place; a
/// successful one replaces them after [`CrfEstimator::release`].
#[derive(Debug, Clone, Default)]
pub struct CrfEstimator {
    curve: Option<InverseCrf>,
    pub(crate) weights: WeightTable,
}

impl CrfEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_curve(curve: InverseCrf) -> Self {
        Self {
            curve: Some(curve),
            weights: WeightTable::default(),
        }
    }

    pub fn linear() -> Self {
        Self::with_curve(InverseCrf::Linear)
    }

    pub fn gamma(gamma: f32) -> Self {
        Self::with_curve(InverseCrf::Gamma(gamma))
    }

    pub fn srgb_like() -> Self {
        Self::gamma(DEFAULT_GAMMA)
    }

    pub fn state(&self) -> CrfState {
        self.curve.as_ref().map_or(CrfState::Uninitialized, CrfState::from)
    }

    pub fn inverse_crf(&self) -> Option<&InverseCrf> {
        self.curve.as_ref()
    }

    /// Lookup tables of the active response, when it has any.
    pub fn luts(&self) -> Option<&[ResponseLut]> {
        self.curve.as_ref().and_then(InverseCrf::luts)
    }

    /// Weight table regenerated by the most recent fit.
    pub fn weights(&self) -> &WeightTable {
        &self.weights
    }

    /// Relative radiance to normalized intensity. Identity while uninitialized.
    pub fn apply(&self, y: f32, channel: usize) -> f32 {
        match &self.curve {
            Some(curve) => curve.apply(y, channel),
            None => y,
        }
    }

    /// Normalized intensity to relative radiance. Identity while uninitialized.
    pub fn remove(&self, x: f32, channel: usize) -> f32 {
        match &self.curve {
            Some(curve) => curve.remove(x, channel),
            None => x,
        }
    }

    /// Drops the active response and returns to `Uninitialized`.
    pub fn release(&mut self) {
        if let Some(curve) = self.curve.take() {
            debug!(state = ?CrfState::from(&curve), "Released camera response");
        }
    }

    pub(crate) fn commit(&mut self, curve: InverseCrf) {
        self.release();
        debug!(state = ?CrfState::from(&curve), "Committed camera response");
        self.curve = Some(curve);
    }
}
