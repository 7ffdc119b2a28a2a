use std::io::{Cursor, Write};

use ::tiff::encoder::colortype::{ColorType, Gray32Float, RGB32Float, RGBA32Float};
use ::tiff::encoder::compression::DeflateLevel;
use ::tiff::encoder::{Compression, TiffEncoder};
use tracing::debug;

use crate::image_pipeline::common::{HdrError, RadianceMap, Result};
use crate::image_pipeline::tiff::types::TiffCompression;
use crate::image_pipeline::tiff::writer::RadianceWriter;

/// Writes radiance maps as 32-bit IEEE float TIFF, one sample per channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardTiffWriter;

impl RadianceWriter for StandardTiffWriter {
    fn write_radiance(&self, image: &RadianceMap, output: &mut dyn Write, compression: TiffCompression) -> Result<()> {
        debug!(
            width = image.width,
            height = image.height,
            channels = image.channels,
            %compression,
            "Encoding radiance TIFF"
        );
        let expected = image.width * image.height * image.channels;
        if image.data.len() != expected {
            return Err(HdrError::SizeMismatch {
                expected,
                actual: image.data.len(),
            });
        }

        let buffer = match image.channels {
            1 => encode::<Gray32Float>(image, compression)?,
            3 => encode::<RGB32Float>(image, compression)?,
            4 => encode::<RGBA32Float>(image, compression)?,
            n => {
                return Err(HdrError::UnsupportedFormat(format!(
                    "cannot write a {}-channel radiance map as TIFF",
                    n
                )));
            }
        };

        output
            .write_all(&buffer)
            .map_err(|e| HdrError::OutputWriteError(e.to_string()))?;
        debug!(bytes = buffer.len(), "TIFF encoding complete");
        Ok(())
    }
}

fn encode<C>(image: &RadianceMap, compression: TiffCompression) -> Result<Vec<u8>>
where
    C: ColorType<Inner = f32>,
{
    let compression = match compression {
        TiffCompression::None => Compression::Uncompressed,
        TiffCompression::Lzw => Compression::Lzw,
        TiffCompression::DeflateFast => Compression::Deflate(DeflateLevel::Fast),
        TiffCompression::DeflateBalanced => Compression::Deflate(DeflateLevel::Balanced),
        TiffCompression::DeflateBest => Compression::Deflate(DeflateLevel::Best),
    };

    let mut buffer = Vec::new();
    TiffEncoder::new(Cursor::new(&mut buffer))
        .map_err(|e| HdrError::EncodeError(e.to_string()))?
        .with_compression(compression)
        .write_image::<C>(image.width as u32, image.height as u32, &image.data)
        .map_err(|e| HdrError::EncodeError(e.to_string()))?;
    Ok(buffer)
}
