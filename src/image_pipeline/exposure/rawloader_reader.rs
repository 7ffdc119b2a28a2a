//! Camera RAW reader implementation using the rawloader library.
//!
//! RAW sensor data is already linear, so the frame handed to the pipeline is
//! only demosaiced, white balanced and normalized by the sensor's black and
//! white levels. Any format rawloader can decode is supported (ARW, CR2, NEF,
//! DNG, ...), as long as its mosaic is a 2x2 Bayer pattern.

use std::io::Cursor;

use bayer::{BayerDepth, CFA, Demosaic, RasterDepth, RasterMut};
use rawloader::RawImageData as RawloaderImageData;
use tracing::debug;

use crate::image_pipeline::common::{FrameData, HdrError, Result};
use crate::image_pipeline::exposure::reader::ExposureReader;

/// rawloader color indices inside a CFA.
const RED: usize = 0;
const GREEN: usize = 1;
const BLUE: usize = 2;

#[derive(Debug, Default, Clone, Copy)]
pub struct RawLoaderReader;

impl ExposureReader for RawLoaderReader {
    fn read_frame(&self, data: &[u8]) -> Result<FrameData> {
        debug!("Decoding RAW image, {} bytes", data.len());

        let decoded = rawloader::decode(&mut Cursor::new(data))
            .map_err(|e| HdrError::DecodeError(e.to_string()))?;
        let (width, height) = (decoded.width, decoded.height);
        if width == 0 || height == 0 {
            return Err(HdrError::InvalidDimensions(width, height));
        }

        // Float RAW data is normalized to [0, 1]; bring it to the integer range.
        let samples: Vec<u16> = match decoded.data {
            RawloaderImageData::Integer(values) => values,
            RawloaderImageData::Float(values) => values
                .iter()
                .map(|&v| (v.clamp(0.0, 1.0) * u16::MAX as f32) as u16)
                .collect(),
        };

        let black = decoded.blacklevels[0] as f32;
        let white = decoded.whitelevels[0] as f32;
        let range = (white - black).max(1.0);
        let balance = white_balance(&decoded.wb_coeffs);
        debug!(
            width,
            height,
            cpp = decoded.cpp,
            black,
            white,
            ?balance,
            "Decoded RAW image"
        );

        let rgb = match decoded.cpp {
            1 => {
                let pattern = bayer_pattern(&decoded.cfa)?;
                demosaic(&samples, width, height, pattern)?
            }
            3 => samples,
            cpp => {
                return Err(HdrError::UnsupportedFormat(format!(
                    "{} components per pixel",
                    cpp
                )));
            }
        };

        let data = rgb
            .chunks_exact(3)
            .flat_map(|pixel| {
                let mut out = [0.0f32; 3];
                for (channel, &raw) in pixel.iter().enumerate() {
                    let linear = (raw as f32 - black).max(0.0) / range;
                    out[channel] = (linear * balance[channel]).clamp(0.0, 1.0);
                }
                out
            })
            .collect();

        Ok(FrameData {
            width,
            height,
            channels: 3,
            data,
        })
    }
}

/// White balance multipliers relative to green. Missing or invalid
/// coefficients leave the channel untouched.
fn white_balance(coefficients: &[f32; 4]) -> [f32; 3] {
    let green = coefficients[GREEN];
    let mut balance = [1.0f32; 3];
    if green.is_finite() && green > 0.0 {
        for channel in [RED, BLUE] {
            let c = coefficients[channel];
            if c.is_finite() && c > 0.0 {
                balance[channel] = c / green;
            }
        }
    }
    balance
}

fn bayer_pattern(cfa: &rawloader::CFA) -> Result<CFA> {
    let quad = [
        cfa.color_at(0, 0),
        cfa.color_at(0, 1),
        cfa.color_at(1, 0),
        cfa.color_at(1, 1),
    ];
    match quad {
        [RED, GREEN, GREEN, BLUE] => Ok(CFA::RGGB),
        [BLUE, GREEN, GREEN, RED] => Ok(CFA::BGGR),
        [GREEN, RED, BLUE, GREEN] => Ok(CFA::GRBG),
        [GREEN, BLUE, RED, GREEN] => Ok(CFA::GBRG),
        other => Err(HdrError::UnsupportedFormat(format!(
            "non-Bayer color filter array {:?}",
            other
        ))),
    }
}

/// Linear demosaic of single-plane 16-bit CFA data into interleaved RGB.
fn demosaic(samples: &[u16], width: usize, height: usize, pattern: CFA) -> Result<Vec<u16>> {
    let expected = width * height;
    if samples.len() < expected {
        return Err(HdrError::SizeMismatch {
            expected,
            actual: samples.len(),
        });
    }

    let bytes: Vec<u8> = samples[..expected].iter().flat_map(|v| v.to_le_bytes()).collect();
    let mut output = vec![0u8; expected * 3 * 2];
    {
        let mut raster = RasterMut::new(width, height, RasterDepth::Depth16, &mut output);
        bayer::run_demosaic(
            &mut Cursor::new(&bytes[..]),
            BayerDepth::Depth16LE,
            pattern,
            Demosaic::Linear,
            &mut raster,
        )
        .map_err(|e| HdrError::DecodeError(format!("demosaic failed: {:?}", e)))?;
    }

    Ok(output
        .chunks_exact(2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .collect())
}
