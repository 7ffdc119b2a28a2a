use thiserror::Error;

#[derive(Error, Debug)]
pub enum HdrError {
    #[error("Failed to read input file: {0}")]
    InputReadError(String),

    #[error("Failed to write output file: {0}")]
    OutputWriteError(String),

    #[error("Failed to decode exposure: {0}")]
    DecodeError(String),

    #[error("Failed to encode radiance map: {0}")]
    EncodeError(String),

    #[error("Invalid image dimensions: width={0}, height={1}")]
    InvalidDimensions(usize, usize),

    #[error("Buffer size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Exposures differ in shape: {0}")]
    ShapeMismatch(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("At least 2 usable exposures are required, got {0}")]
    TooFewExposures(usize),

    #[error("Not enough usable samples: {0}")]
    TooFewSamples(usize),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Numerically degenerate fit: {0}")]
    NumericDegenerate(String),

    #[error("Capability not compiled in: {0}")]
    MissingCapability(&'static str),

    #[error("Invalid response file: {0}")]
    InvalidResponseFile(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HdrError>;
