//! Median threshold bitmap alignment (Ward, 2003).
//!
//! Each exposure is reduced to a bitmap of "brighter than its own median",
//! which is stable across exposure times. Pixels close to the median are
//! masked out. The shift is searched coarse to fine over an image pyramid,
//! one pixel in each direction per level.

use tracing::{debug, instrument};

use crate::image_pipeline::align::aligner::Aligner;
use crate::image_pipeline::common::{CODE_LEVELS, ExposureImage, HdrError, Result, quantize};

/// Pyramid depth; the search reaches `2^(level + 1) - 1` pixels.
pub const DEFAULT_MAX_LEVEL: usize = 5;
/// Codes within this distance of the median are excluded from the comparison.
pub const DEFAULT_EXCLUDE_RANGE: u8 = 4;

/// Smallest side kept at the coarsest pyramid level.
const MIN_LEVEL_SIDE: usize = 16;

/// Rec. 709 luma weights.
const LUMA: [f32; 3] = [0.2126, 0.7152, 0.0722];

#[derive(Debug, Clone, Copy)]
pub struct MtbAligner {
    max_level: usize,
    exclude_range: u8,
}

impl Default for MtbAligner {
    fn default() -> Self {
        Self {
            max_level: DEFAULT_MAX_LEVEL,
            exclude_range: DEFAULT_EXCLUDE_RANGE,
        }
    }
}

impl MtbAligner {
    pub fn new(max_level: usize) -> Self {
        Self {
            max_level,
            ..Self::default()
        }
    }

    pub fn with_exclude_range(mut self, exclude_range: u8) -> Self {
        self.exclude_range = exclude_range;
        self
    }

    /// Number of halvings applied before the coarsest search.
    fn levels_for(&self, width: usize, height: usize) -> usize {
        let mut levels = 0;
        let mut side = width.min(height);
        while levels < self.max_level && side / 2 >= MIN_LEVEL_SIDE {
            side /= 2;
            levels += 1;
        }
        levels
    }
}

impl Aligner for MtbAligner {
    #[instrument(skip_all, fields(reference = reference.exposure(), moving = moving.exposure()))]
    fn align(&self, reference: &ExposureImage, moving: &ExposureImage) -> Result<(i32, i32)> {
        if !reference.same_shape(moving) {
            return Err(HdrError::ShapeMismatch(format!(
                "cannot align {}x{} onto {}x{}",
                moving.width(),
                moving.height(),
                reference.width(),
                reference.height()
            )));
        }

        let levels = self.levels_for(reference.width(), reference.height());
        let mut reference_pyramid = vec![GrayImage::from_exposure(reference)];
        let mut moving_pyramid = vec![GrayImage::from_exposure(moving)];
        for level in 0..levels {
            reference_pyramid.push(reference_pyramid[level].downsample());
            moving_pyramid.push(moving_pyramid[level].downsample());
        }

        let (mut dx, mut dy) = (0i32, 0i32);
        for level in (0..=levels).rev() {
            dx *= 2;
            dy *= 2;
            let fixed = Bitmaps::new(&reference_pyramid[level], self.exclude_range);
            let shifting = Bitmaps::new(&moving_pyramid[level], self.exclude_range);

            let mut best = (dx, dy, fixed.mismatch(&shifting, dx, dy));
            for (sx, sy) in NEIGHBOURS {
                let (cx, cy) = (dx + sx, dy + sy);
                let error = fixed.mismatch(&shifting, cx, cy);
                if error < best.2 {
                    best = (cx, cy, error);
                }
            }
            dx = best.0;
            dy = best.1;
            debug!(level, dx, dy, error = best.2, "MTB level aligned");
        }
        Ok((dx, dy))
    }
}

const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

struct GrayImage {
    width: usize,
    height: usize,
    codes: Vec<u8>,
}

impl GrayImage {
    fn from_exposure(image: &ExposureImage) -> Self {
        let channels = image.channels();
        let codes = image
            .data()
            .chunks_exact(channels)
            .map(|pixel| {
                let luma = if channels >= 3 {
                    pixel.iter().zip(LUMA).map(|(v, w)| v * w).sum::<f32>()
                } else {
                    pixel.iter().sum::<f32>() / channels as f32
                };
                quantize(luma)
            })
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            codes,
        }
    }

    /// 2x2 box average.
    fn downsample(&self) -> Self {
        let (width, height) = (self.width / 2, self.height / 2);
        let mut codes = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let at = |xx: usize, yy: usize| self.codes[yy * self.width + xx] as u32;
                let sum = at(2 * x, 2 * y) + at(2 * x + 1, 2 * y) + at(2 * x, 2 * y + 1) + at(2 * x + 1, 2 * y + 1);
                codes.push(((sum + 2) / 4) as u8);
            }
        }
        Self { width, height, codes }
    }

    fn median(&self) -> u8 {
        let mut histogram = [0usize; CODE_LEVELS];
        for &code in &self.codes {
            histogram[code as usize] += 1;
        }
        let half = self.codes.len().div_ceil(2);
        let mut cumulative = 0;
        for (code, &count) in histogram.iter().enumerate() {
            cumulative += count;
            if cumulative >= half {
                return code as u8;
            }
        }
        (CODE_LEVELS - 1) as u8
    }
}

/// Threshold and exclusion bitmaps of one pyramid level.
struct Bitmaps {
    width: usize,
    height: usize,
    threshold: Vec<bool>,
    include: Vec<bool>,
}

impl Bitmaps {
    fn new(image: &GrayImage, exclude_range: u8) -> Self {
        let median = image.median();
        let threshold = image.codes.iter().map(|&c| c > median).collect();
        let include = image
            .codes
            .iter()
            .map(|&c| c.abs_diff(median) > exclude_range)
            .collect();
        Self {
            width: image.width,
            height: image.height,
            threshold,
            include,
        }
    }

    /// Fraction of overlapping, non-excluded pixels whose bits disagree when
    /// `other` is shifted by `(dx, dy)`.
    fn mismatch(&self, other: &Bitmaps, dx: i32, dy: i32) -> f64 {
        let (w, h) = (self.width as i64, self.height as i64);
        let (dx, dy) = (dx as i64, dy as i64);
        let (x0, x1) = (dx.max(0), (w + dx).min(w));
        let (y0, y1) = (dy.max(0), (h + dy).min(h));
        if x0 >= x1 || y0 >= y1 {
            return f64::INFINITY;
        }

        let mut errors = 0usize;
        for y in y0..y1 {
            let row = (y * w) as usize;
            let src_row = ((y - dy) * w) as usize;
            for x in x0..x1 {
                let i = row + x as usize;
                let j = src_row + (x - dx) as usize;
                if self.include[i] && other.include[j] && self.threshold[i] != other.threshold[j] {
                    errors += 1;
                }
            }
        }
        let overlap = ((x1 - x0) * (y1 - y0)) as f64;
        errors as f64 / overlap
    }
}
