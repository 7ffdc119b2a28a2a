//! Common utilities module
//!
//! This module contains the error type and the image buffers shared across the pipeline.

pub mod error;
pub mod types;

pub use error::{HdrError, Result};
pub use types::{
    quantize, validate_stack, ExposureImage, FrameData, RadianceMap, CODE_LEVELS, MAX_CODE,
};
