//! Exposure reading module
//!
//! This module decodes exposure files into untagged float frames, covering
//! both standard image containers and camera RAW.

mod auto_reader;
mod image_reader;
mod rawloader_reader;
mod reader;

pub use auto_reader::AutoReader;
pub use image_reader::StandardImageReader;
pub use rawloader_reader::RawLoaderReader;
pub use reader::ExposureReader;
