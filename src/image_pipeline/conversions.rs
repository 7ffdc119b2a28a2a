//! Pipeline conversions module
//!
//! This module contains the orchestration that turns a set of exposure files
//! into a radiance map.

mod exposures_to_radiance;
pub mod types;

pub use exposures_to_radiance::HdrPipeline;
pub use types::{PipelineConfig, PipelineConfigBuilder, ResponseStrategy};
