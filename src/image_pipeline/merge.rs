//! Weighted fusion of an aligned exposure stack into a radiance map.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use tracing::{info, instrument, warn};

use crate::image_pipeline::common::{
    ExposureImage, HdrError, RadianceMap, Result, quantize, validate_stack,
};
use crate::image_pipeline::response::{CrfEstimator, ResponseLut};
use crate::image_pipeline::weights::{WeightScheme, WeightTable};

/// Total weight at or below which a pixel is resolved by the saturation fallback.
pub const MIN_TOTAL_WEIGHT: f32 = 1e-4;

/// Floor applied to linearized values before taking the logarithm.
const LOG_FLOOR: f32 = 1e-6;

/// Minimum-exposure reading below which an unresolved pixel is taken as black.
const DARK_THRESHOLD: f32 = 0.5;
/// Minimum-exposure reading above which an unresolved pixel is taken as saturated.
const BRIGHT_THRESHOLD: f32 = 0.9;

/// Space in which per-exposure estimates are averaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeDomain {
    /// Weighted mean of `x_lin / t`; absolute radiance.
    Linear,
    /// Weighted mean of `ln(x_lin) - ln(t)`, exponentiated; relative radiance.
    #[default]
    Log,
}

impl fmt::Display for MergeDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeDomain::Linear => write!(f, "linear"),
            MergeDomain::Log => write!(f, "log"),
        }
    }
}

impl FromStr for MergeDomain {
    type Err = HdrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" | "lin" => Ok(MergeDomain::Linear),
            "log" => Ok(MergeDomain::Log),
            other => Err(HdrError::InvalidParameter(format!(
                "unknown merge domain '{}'",
                other
            ))),
        }
    }
}

/// Exposure fusion.
pub struct Merger;

struct Frame<'a> {
    data: &'a [f32],
    exposure: f32,
    log_exposure: f32,
}

impl Merger {
    /// Fuses a same-shape stack into one radiance map.
    ///
    /// Each sample is linearized through the response held by `crf` (used as
    /// is when absent or uninitialized) and weighted by `scheme` at its
    /// recorded intensity. Pixels whose total weight is negligible take a
    /// value from the shortest exposure: 0 when it reads dark, `1 / t_min`
    /// when it reads bright, and its own linearized value over `t_min`
    /// otherwise.
    #[instrument(skip(stack, crf), fields(exposures = stack.len()))]
    pub fn assemble<I>(
        stack: &[I],
        crf: Option<&CrfEstimator>,
        scheme: WeightScheme,
        domain: MergeDomain,
    ) -> Result<RadianceMap>
    where
        I: AsRef<ExposureImage> + Sync,
    {
        validate_stack(stack)?;
        let first = stack[0].as_ref();
        let (width, height, channels) = (first.width(), first.height(), first.channels());

        let frames = stack
            .iter()
            .map(|image| {
                let image = image.as_ref();
                let t = image.exposure();
                if !(t.is_finite() && t > 0.0) {
                    return Err(HdrError::InvalidParameter(format!(
                        "exposure time must be positive, got {}",
                        t
                    )));
                }
                Ok(Frame {
                    data: image.data(),
                    exposure: t,
                    log_exposure: t.ln(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let luts = linearization(crf, channels)?;
        let weights = WeightTable::new(scheme);
        let shortest = frames
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.exposure.total_cmp(&b.exposure))
            .map_or(0, |(index, _)| index);
        let t_min = frames[shortest].exposure;
        let max_saturation = 1.0 / t_min;

        let linearize = |x: f32, channel: usize| match &luts {
            Some(luts) => luts[channel.min(luts.len() - 1)].evaluate(x),
            None => x,
        };

        let mut map = RadianceMap::new(width, height, channels);
        let row_len = width * channels;
        let fallbacks: usize = map
            .data
            .par_chunks_mut(row_len.max(1))
            .enumerate()
            .map(|(y, row)| {
                let mut unresolved = 0;
                for (offset, out) in row.iter_mut().enumerate() {
                    let index = y * row_len + offset;
                    let channel = offset % channels;

                    let mut sum = 0.0f32;
                    let mut total_weight = 0.0f32;
                    for frame in &frames {
                        let x = frame.data[index];
                        let w = weights.weight(quantize(x));
                        let x_lin = linearize(x, channel);
                        sum += match domain {
                            MergeDomain::Linear => w * x_lin / frame.exposure,
                            MergeDomain::Log => w * (x_lin.max(LOG_FLOOR).ln() - frame.log_exposure),
                        };
                        total_weight += w;
                    }

                    *out = if total_weight > MIN_TOTAL_WEIGHT {
                        let mean = sum / total_weight;
                        match domain {
                            MergeDomain::Linear => mean,
                            MergeDomain::Log => mean.exp(),
                        }
                    } else {
                        unresolved += 1;
                        let reference = frames[shortest].data[index];
                        if reference < DARK_THRESHOLD {
                            0.0
                        } else if reference > BRIGHT_THRESHOLD {
                            max_saturation
                        } else {
                            linearize(reference, channel) / t_min
                        }
                    };
                }
                unresolved
            })
            .sum();

        if fallbacks > 0 {
            warn!(
                pixels = fallbacks,
                "Negligible total weight; used the shortest exposure fallback"
            );
        }
        info!(width, height, channels, %domain, ?scheme, "Merged exposure stack");
        Ok(map)
    }
}

/// Per-channel tables for the active response, or `None` to use values as is.
fn linearization(crf: Option<&CrfEstimator>, channels: usize) -> Result<Option<Vec<ResponseLut>>> {
    let Some(curve) = crf.and_then(CrfEstimator::inverse_crf) else {
        return Ok(None);
    };
    curve.validate()?;
    let response_channels = curve.channels();
    if response_channels > 1 && response_channels != channels {
        return Err(HdrError::ShapeMismatch(format!(
            "response has {} channels, images have {}",
            response_channels, channels
        )));
    }
    Ok(Some(curve.baked_luts(channels)))
}
