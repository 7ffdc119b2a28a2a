use std::io::Write;

use crate::image_pipeline::common::{RadianceMap, Result};
use crate::image_pipeline::tiff::types::TiffCompression;

pub trait RadianceWriter {
    fn write_radiance(&self, image: &RadianceMap, output: &mut dyn Write, compression: TiffCompression) -> Result<()>;
}
