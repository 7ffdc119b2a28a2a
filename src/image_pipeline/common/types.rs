//! Core image buffers shared by every stage of the HDR pipeline.

use crate::image_pipeline::common::error::{HdrError, Result};

/// Number of distinct 8-bit intensity codes.
pub const CODE_LEVELS: usize = 256;

/// Largest 8-bit intensity code as a float.
pub const MAX_CODE: f32 = 255.0;

/// Quantizes a normalized value to its 8-bit intensity code.
#[inline]
pub fn quantize(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * MAX_CODE).round() as u8
}

/// Decoded frame that has not yet been tagged with an exposure time.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameData {
    /// Width of the image in pixels
    pub width: usize,
    /// Height of the image in pixels
    pub height: usize,
    /// Interleaved channel count (1 = gray, 3 = RGB, 4 = RGBA)
    pub channels: usize,
    /// Interleaved samples, nominally in [0, 1]
    pub data: Vec<f32>,
}

/// A single low-dynamic-range exposure of the scene.
///
/// Pixel values are interleaved floats, nominally in [0, 1]. The stage
/// functions only ever read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureImage {
    width: usize,
    height: usize,
    channels: usize,
    data: Vec<f32>,
    exposure: f32,
}

impl ExposureImage {
    pub fn from_vec(
        width: usize,
        height: usize,
        channels: usize,
        data: Vec<f32>,
        exposure: f32,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(HdrError::InvalidDimensions(width, height));
        }
        if channels == 0 {
            return Err(HdrError::UnsupportedFormat("zero channels".to_string()));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or(HdrError::InvalidDimensions(width, height))?;
        if data.len() != expected {
            return Err(HdrError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            channels,
            data,
            exposure,
        })
    }

    pub fn from_frame(frame: FrameData, exposure: f32) -> Result<Self> {
        Self::from_vec(frame.width, frame.height, frame.channels, frame.data, exposure)
    }

    /// Builds an image from 8-bit codes, mostly useful for synthetic stacks.
    pub fn from_codes(
        width: usize,
        height: usize,
        channels: usize,
        codes: &[u8],
        exposure: f32,
    ) -> Result<Self> {
        let data = codes.iter().map(|&c| c as f32 / MAX_CODE).collect();
        Self::from_vec(width, height, channels, data, exposure)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Exposure time in seconds.
    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, channel: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + channel]
    }

    /// Value of `channel` at linear pixel index `pixel`.
    #[inline]
    pub fn at(&self, pixel: usize, channel: usize) -> f32 {
        self.data[pixel * self.channels + channel]
    }

    #[inline]
    pub fn code(&self, x: usize, y: usize, channel: usize) -> u8 {
        quantize(self.get(x, y, channel))
    }

    #[inline]
    pub fn code_at(&self, pixel: usize, channel: usize) -> u8 {
        quantize(self.at(pixel, channel))
    }

    pub fn same_shape(&self, other: &ExposureImage) -> bool {
        self.width == other.width && self.height == other.height && self.channels == other.channels
    }
}

impl AsRef<ExposureImage> for ExposureImage {
    fn as_ref(&self) -> &ExposureImage {
        self
    }
}

/// Checks that a stack is non-empty and every frame has the shape of the first.
pub fn validate_stack<I: AsRef<ExposureImage>>(stack: &[I]) -> Result<()> {
    let Some(first) = stack.first() else {
        return Err(HdrError::TooFewExposures(0));
    };
    let first = first.as_ref();
    for (index, image) in stack.iter().enumerate().skip(1) {
        let image = image.as_ref();
        if !first.same_shape(image) {
            return Err(HdrError::ShapeMismatch(format!(
                "exposure {} is {}x{}x{}, expected {}x{}x{}",
                index,
                image.width(),
                image.height(),
                image.channels(),
                first.width(),
                first.height(),
                first.channels()
            )));
        }
    }
    Ok(())
}

/// Fused high-dynamic-range output. Values are unbounded.
#[derive(Debug, Clone, PartialEq)]
pub struct RadianceMap {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl RadianceMap {
    pub fn new(width: usize, height: usize, channels: usize) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![0.0; width * height * channels],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, channel: usize) -> f32 {
        self.data[(y * self.width + x) * self.channels + channel]
    }

    /// Largest finite value in the map, or 0 for an empty map.
    pub fn max_value(&self) -> f32 {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_rounds_and_clamps() {
        assert_eq!(quantize(-0.3), 0);
        assert_eq!(quantize(0.0), 0);
        assert_eq!(quantize(0.5), 128);
        assert_eq!(quantize(1.0), 255);
        assert_eq!(quantize(7.0), 255);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let result = ExposureImage::from_vec(4, 4, 3, vec![0.0; 10], 1.0);
        assert!(matches!(
            result.unwrap_err(),
            HdrError::SizeMismatch { expected: 48, actual: 10 }
        ));
    }

    #[test]
    fn test_from_vec_rejects_empty_dimensions() {
        let result = ExposureImage::from_vec(0, 4, 1, vec![], 1.0);
        assert!(matches!(result.unwrap_err(), HdrError::InvalidDimensions(0, 4)));
    }

    #[test]
    fn test_pixel_addressing() {
        let data: Vec<f32> = (0..12).map(|v| v as f32 / 255.0).collect();
        let image = ExposureImage::from_vec(2, 2, 3, data, 0.5).unwrap();
        assert_eq!(image.code(1, 1, 2), 11);
        assert_eq!(image.code_at(2, 0), 6);
        assert_eq!(image.exposure(), 0.5);
    }

    #[test]
    fn test_validate_stack_detects_shape_mismatch() {
        let a = ExposureImage::from_vec(2, 2, 1, vec![0.0; 4], 1.0).unwrap();
        let b = ExposureImage::from_vec(2, 1, 1, vec![0.0; 2], 2.0).unwrap();
        assert!(validate_stack(&[&a, &a]).is_ok());
        assert!(matches!(
            validate_stack(&[&a, &b]).unwrap_err(),
            HdrError::ShapeMismatch(_)
        ));
        let empty: [&ExposureImage; 0] = [];
        assert!(matches!(
            validate_stack(&empty).unwrap_err(),
            HdrError::TooFewExposures(0)
        ));
    }
}
