use crate::image_pipeline::common::{FrameData, Result};

pub trait ExposureReader {
    fn read_frame(&self, data: &[u8]) -> Result<FrameData>;
}
