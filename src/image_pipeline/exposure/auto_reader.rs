use image::ImageFormat;
use tracing::debug;

use crate::image_pipeline::common::{FrameData, Result};
use crate::image_pipeline::exposure::image_reader::StandardImageReader;
use crate::image_pipeline::exposure::rawloader_reader::RawLoaderReader;
use crate::image_pipeline::exposure::reader::ExposureReader;

/// Dispatches between RAW and standard decoding.
///
/// Most RAW formats are TIFF containers, so TIFF and unrecognised data is
/// tried as RAW first and decoded as a plain image when that fails.
#[derive(Default)]
pub struct AutoReader {
    standard: StandardImageReader,
    raw: RawLoaderReader,
}

impl ExposureReader for AutoReader {
    fn read_frame(&self, data: &[u8]) -> Result<FrameData> {
        match image::guess_format(data) {
            Ok(format) if format != ImageFormat::Tiff => {
                debug!(?format, "Decoding as standard image");
                self.standard.read_frame(data)
            }
            _ => match self.raw.read_frame(data) {
                Ok(frame) => Ok(frame),
                Err(raw_error) => {
                    debug!(error = %raw_error, "Not a RAW file, trying standard decoders");
                    self.standard.read_frame(data)
                }
            },
        }
    }
}
