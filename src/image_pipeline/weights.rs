//! Reliability weighting of intensity codes.
//!
//! Every fitting and merging step down-weights observations that sit close to
//! black or to saturation. The curves below map a normalized intensity in
//! [0, 1] to a non-negative weight and are baked into a 256-entry table.

use std::fmt;
use std::str::FromStr;

use crate::image_pipeline::common::{CODE_LEVELS, HdrError, MAX_CODE};

/// Lower bound of the tightened Debevec'97 support.
const TIGHT_LOW: f32 = 0.01;
/// Upper bound of the tightened Debevec'97 support.
const TIGHT_HIGH: f32 = 0.99;

/// Weighting curve family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightScheme {
    /// Constant 1.
    Uniform,
    /// `w(x) = x`
    Identity,
    /// `w(x) = 1 - x`
    Reverse,
    /// Flat top with an eighth-power falloff to 0 at both extremes.
    Hat,
    /// Debevec'97 tent, 0 at both extremes and 1 at mid-gray.
    #[default]
    Debevec97,
    /// Debevec'97 tent restricted to the support [0.01, 0.99].
    Debevec97Tight,
    /// Gaussian-like `exp(-16 (x - 0.5)^2)` rescaled to hit 0 at the extremes.
    Robertson,
}

impl WeightScheme {
    /// Evaluates the curve at a normalized intensity.
    pub fn evaluate(self, x: f32) -> f32 {
        let x = x.clamp(0.0, 1.0);
        match self {
            WeightScheme::Uniform => 1.0,
            WeightScheme::Identity => x,
            WeightScheme::Reverse => 1.0 - x,
            WeightScheme::Hat => 1.0 - (2.0 * x - 1.0).powi(8),
            WeightScheme::Debevec97 => tent(x),
            WeightScheme::Debevec97Tight => {
                if !(TIGHT_LOW..=TIGHT_HIGH).contains(&x) {
                    0.0
                } else {
                    tent((x - TIGHT_LOW) / (TIGHT_HIGH - TIGHT_LOW))
                }
            }
            WeightScheme::Robertson => {
                let floor = (-4.0f32).exp();
                let g = (-16.0 * (x - 0.5) * (x - 0.5)).exp();
                ((g - floor) / (1.0 - floor)).max(0.0)
            }
        }
    }

    pub fn table(self) -> WeightTable {
        WeightTable::new(self)
    }
}

fn tent(x: f32) -> f32 {
    (1.0 - (2.0 * x - 1.0).abs()).max(0.0)
}

impl fmt::Display for WeightScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WeightScheme::Uniform => "uniform",
            WeightScheme::Identity => "identity",
            WeightScheme::Reverse => "reverse",
            WeightScheme::Hat => "hat",
            WeightScheme::Debevec97 => "debevec",
            WeightScheme::Debevec97Tight => "debevec-tight",
            WeightScheme::Robertson => "robertson",
        };
        f.write_str(name)
    }
}

impl FromStr for WeightScheme {
    type Err = HdrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uniform" | "flat" => Ok(WeightScheme::Uniform),
            "identity" | "linear" => Ok(WeightScheme::Identity),
            "reverse" => Ok(WeightScheme::Reverse),
            "hat" => Ok(WeightScheme::Hat),
            "debevec" | "tent" | "triangular" => Ok(WeightScheme::Debevec97),
            "debevec-tight" => Ok(WeightScheme::Debevec97Tight),
            "robertson" | "gaussian" => Ok(WeightScheme::Robertson),
            other => Err(HdrError::InvalidParameter(format!(
                "unknown weighting scheme '{}'",
                other
            ))),
        }
    }
}

/// A weighting curve baked at the 256 intensity codes.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    scheme: WeightScheme,
    weights: [f32; CODE_LEVELS],
}

impl WeightTable {
    pub fn new(scheme: WeightScheme) -> Self {
        let mut weights = [0.0f32; CODE_LEVELS];
        for (code, weight) in weights.iter_mut().enumerate() {
            *weight = scheme.evaluate(code as f32 / MAX_CODE);
        }
        Self { scheme, weights }
    }

    pub fn scheme(&self) -> WeightScheme {
        self.scheme
    }

    #[inline]
    pub fn weight(&self, code: u8) -> f32 {
        self.weights[code as usize]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.weights
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        WeightTable::new(WeightScheme::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [WeightScheme; 7] = [
        WeightScheme::Uniform,
        WeightScheme::Identity,
        WeightScheme::Reverse,
        WeightScheme::Hat,
        WeightScheme::Debevec97,
        WeightScheme::Debevec97Tight,
        WeightScheme::Robertson,
    ];

    #[test]
    fn test_weights_are_non_negative() {
        for scheme in ALL {
            let table = scheme.table();
            assert!(
                table.as_slice().iter().all(|&w| w >= 0.0 && w.is_finite()),
                "{} produced a negative weight",
                scheme
            );
        }
    }

    #[test]
    fn test_simple_curves() {
        assert_eq!(WeightScheme::Uniform.evaluate(0.0), 1.0);
        assert_eq!(WeightScheme::Identity.evaluate(0.25), 0.25);
        assert_eq!(WeightScheme::Reverse.evaluate(0.25), 0.75);
    }

    #[test]
    fn test_hat_vanishes_at_extremes() {
        let hat = WeightScheme::Hat;
        assert!(hat.evaluate(0.0).abs() < 1e-6);
        assert!(hat.evaluate(1.0).abs() < 1e-6);
        assert!((hat.evaluate(0.5) - 1.0).abs() < 1e-6);
        assert!(hat.evaluate(0.02) < 0.3);
    }

    #[test]
    fn test_debevec_tent() {
        let tent = WeightScheme::Debevec97;
        assert_eq!(tent.evaluate(0.0), 0.0);
        assert_eq!(tent.evaluate(1.0), 0.0);
        assert!((tent.evaluate(0.5) - 1.0).abs() < 1e-6);
        assert!((tent.evaluate(0.25) - 0.5).abs() < 1e-6);

        let tight = WeightScheme::Debevec97Tight;
        assert_eq!(tight.evaluate(0.005), 0.0);
        assert_eq!(tight.evaluate(0.995), 0.0);
        assert!((tight.evaluate(0.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_robertson_rescaled_gaussian() {
        let gauss = WeightScheme::Robertson;
        assert!(gauss.evaluate(0.0).abs() < 1e-6);
        assert!(gauss.evaluate(1.0).abs() < 1e-6);
        assert!((gauss.evaluate(0.5) - 1.0).abs() < 1e-6);
        let table = gauss.table();
        assert_eq!(table.weight(0), 0.0);
        assert_eq!(table.weight(255), 0.0);
        assert!(table.weight(100) > table.weight(50));
    }

    #[test]
    fn test_parse_round_trip_names() {
        for scheme in ALL {
            let parsed: WeightScheme = scheme.to_string().parse().unwrap();
            assert_eq!(parsed, scheme);
        }
        assert!("bogus".parse::<WeightScheme>().is_err());
    }
}
