//! Common types for the imaging module

use std::path::PathBuf;
use thiserror::Error;

/// Imaging error types
#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("Image not found: {0}")]
    ImageNotFound(PathBuf),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("FFT length {0} is not a power of two")]
    FftLength(usize),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImagingError>;
