//! HDR reconstruction pipeline module
//!
//! This module turns a bracketed exposure stack into a radiance map, with
//! separate modules for exposure reading, alignment, camera response recovery,
//! fusion and TIFF writing.

pub mod align;
pub mod common;
pub mod conversions;
pub mod exposure;
pub mod merge;
pub mod response;
pub mod sampling;
pub mod tiff;
pub mod weights;

#[cfg(test)]
pub(crate) mod test_support;

pub use common::{
    ExposureImage,
    FrameData,
    HdrError,
    RadianceMap,
    Result,
};

pub use exposure::{
    AutoReader,
    ExposureReader,
    RawLoaderReader,
    StandardImageReader,
};

pub use align::{
    Aligner,
    MtbAligner,
    shift_image,
};

pub use weights::{
    WeightScheme,
    WeightTable,
};

pub use sampling::{
    SampleExtractor,
    SampleMatrix,
    SamplingMethod,
};

pub use response::{
    CrfEstimator,
    CrfState,
    InverseCrf,
    MitsunagaNayarParams,
    MitsunagaNayarReport,
    PairingStrategy,
    ResponseLut,
    RobertsonReport,
};

pub use merge::{
    MergeDomain,
    Merger,
};

pub use self::tiff::{
    RadianceWriter,
    StandardTiffWriter,
    TiffCompression,
};

pub use conversions::{
    HdrPipeline,
    PipelineConfig,
    PipelineConfigBuilder,
    ResponseStrategy,
};
