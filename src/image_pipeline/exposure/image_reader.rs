//! Reader for standard image containers (PNG, JPEG, TIFF, ...) backed by the
//! `image` crate.

use tracing::debug;

use crate::image_pipeline::common::{FrameData, HdrError, Result};
use crate::image_pipeline::exposure::reader::ExposureReader;

/// Decodes any format the `image` crate understands.
///
/// Grayscale inputs stay single-channel; everything else becomes RGB. Alpha is
/// dropped. Integer samples are normalized to [0, 1].
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardImageReader;

impl ExposureReader for StandardImageReader {
    fn read_frame(&self, data: &[u8]) -> Result<FrameData> {
        debug!("Decoding image, {} bytes", data.len());

        let decoded = image::load_from_memory(data).map_err(|e| match e {
            image::ImageError::Unsupported(e) => HdrError::UnsupportedFormat(e.to_string()),
            other => HdrError::DecodeError(other.to_string()),
        })?;
        let (width, height) = (decoded.width() as usize, decoded.height() as usize);

        let (channels, pixels) = if decoded.color().has_color() {
            (3, decoded.to_rgb32f().into_raw())
        } else {
            (1, decoded.to_luma32f().into_raw())
        };

        debug!(width, height, channels, color = ?decoded.color(), "Decoded image");
        Ok(FrameData {
            width,
            height,
            channels,
            data: pixels,
        })
    }
}
