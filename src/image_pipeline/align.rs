//! Exposure alignment module
//!
//! Integer translation between hand-held exposures, estimated on
//! exposure-invariant threshold bitmaps.

mod aligner;
mod mtb_aligner;

pub use aligner::{Aligner, accumulate_offsets, shift_image};
pub use mtb_aligner::{DEFAULT_EXCLUDE_RANGE, DEFAULT_MAX_LEVEL, MtbAligner};
