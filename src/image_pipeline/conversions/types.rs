//! Exposure fusion configuration types

use crate::image_pipeline::merge::MergeDomain;
use crate::image_pipeline::response::{
    DEFAULT_DEBEVEC_SAMPLES, DEFAULT_DEBEVEC_SMOOTHNESS, InverseCrf, MitsunagaNayarParams,
};
use crate::image_pipeline::tiff::TiffCompression;
use crate::image_pipeline::weights::WeightScheme;

/// How the pipeline obtains its camera response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseStrategy {
    /// Fit a lookup table with Debevec–Malik.
    DebevecMalik { samples: usize, smoothness: f32 },
    /// Fit a polynomial with Mitsunaga–Nayar.
    MitsunagaNayar(MitsunagaNayarParams),
    /// Fit a lookup table with Robertson's iterative method.
    Robertson { max_iterations: usize },
    /// Use a response supplied by the caller; nothing is fitted.
    Fixed(InverseCrf),
}

impl Default for ResponseStrategy {
    fn default() -> Self {
        ResponseStrategy::DebevecMalik {
            samples: DEFAULT_DEBEVEC_SAMPLES,
            smoothness: DEFAULT_DEBEVEC_SMOOTHNESS,
        }
    }
}

/// Configuration for exposure stack to radiance map fusion
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Weighting used while fitting and merging
    pub weight_scheme: WeightScheme,
    /// Domain in which per-exposure estimates are averaged
    pub domain: MergeDomain,
    /// Whether to register exposures onto the longest one before merging
    pub align: bool,
    /// Source of the camera response
    pub response: ResponseStrategy,
    /// Whether to check that every loaded frame has the same shape
    pub validate_dimensions: bool,
    /// Compression of the written radiance TIFF
    pub compression: TiffCompression,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            weight_scheme: WeightScheme::Debevec97,
            domain: MergeDomain::Log,
            align: false,
            response: ResponseStrategy::default(),
            validate_dimensions: true,
            compression: TiffCompression::None,
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for PipelineConfig
#[derive(Default)]
pub struct PipelineConfigBuilder {
    weight_scheme: Option<WeightScheme>,
    domain: Option<MergeDomain>,
    align: Option<bool>,
    response: Option<ResponseStrategy>,
    validate_dimensions: Option<bool>,
    compression: Option<TiffCompression>,
}

impl PipelineConfigBuilder {
    pub fn weight_scheme(mut self, scheme: WeightScheme) -> Self {
        self.weight_scheme = Some(scheme);
        self
    }

    pub fn domain(mut self, domain: MergeDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn align(mut self, enable: bool) -> Self {
        self.align = Some(enable);
        self
    }

    pub fn response(mut self, response: ResponseStrategy) -> Self {
        self.response = Some(response);
        self
    }

    pub fn validate_dimensions(mut self, validate: bool) -> Self {
        self.validate_dimensions = Some(validate);
        self
    }

    pub fn compression(mut self, compression: TiffCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn build(self) -> PipelineConfig {
        let default = PipelineConfig::default();
        PipelineConfig {
            weight_scheme: self.weight_scheme.unwrap_or(default.weight_scheme),
            domain: self.domain.unwrap_or(default.domain),
            align: self.align.unwrap_or(default.align),
            response: self.response.unwrap_or(default.response),
            validate_dimensions: self.validate_dimensions.unwrap_or(default.validate_dimensions),
            compression: self.compression.unwrap_or(default.compression),
        }
    }
}
