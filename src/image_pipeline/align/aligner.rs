use tracing::debug;

use crate::image_pipeline::common::{ExposureImage, Result};

/// Estimates the translation that registers one exposure onto another.
pub trait Aligner {
    /// Returns `(dx, dy)` such that `shift_image(moving, dx, dy)` lines up
    /// with `reference`.
    fn align(&self, reference: &ExposureImage, moving: &ExposureImage) -> Result<(i32, i32)>;
}

/// Translates an image by whole pixels. Uncovered pixels are zero.
pub fn shift_image(image: &ExposureImage, dx: i32, dy: i32) -> Result<ExposureImage> {
    let (width, height, channels) = (image.width(), image.height(), image.channels());
    let mut data = vec![0.0f32; image.data().len()];

    for y in 0..height {
        let src_y = y as i64 - dy as i64;
        if src_y < 0 || src_y >= height as i64 {
            continue;
        }
        for x in 0..width {
            let src_x = x as i64 - dx as i64;
            if src_x < 0 || src_x >= width as i64 {
                continue;
            }
            let dst = (y * width + x) * channels;
            let src = (src_y as usize * width + src_x as usize) * channels;
            data[dst..dst + channels].copy_from_slice(&image.data()[src..src + channels]);
        }
    }

    debug!(dx, dy, exposure = image.exposure(), "Shifted exposure");
    ExposureImage::from_vec(width, height, channels, data, image.exposure())
}

/// Chains shifts between consecutive exposures into offsets relative to the
/// last exposure.
///
/// `pairwise[i]` registers frame `i` onto frame `i + 1`; the result has one
/// entry per frame and ends with `(0, 0)`.
pub fn accumulate_offsets(pairwise: &[(i32, i32)]) -> Vec<(i32, i32)> {
    let mut offsets = vec![(0, 0); pairwise.len() + 1];
    for i in (0..pairwise.len()).rev() {
        let (nx, ny) = offsets[i + 1];
        let (px, py) = pairwise[i];
        offsets[i] = (px + nx, py + ny);
    }
    offsets
}
