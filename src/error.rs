//! Error types for the estimation engine.
//!
//! Almost every failure here is recoverable: the pipeline turns them into
//! "omit this optional field" or "skip this cycle" and keeps the last good
//! snapshot available to readers.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VisionError>;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("image buffer has no content")]
    EmptyImage,

    #[error("bounding box clips to an empty region")]
    DegenerateRegion,

    #[error("frame is {actual_width}x{actual_height}, previous frame was {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("detector failed: {0}")]
    Detector(String),

    #[error("detector call timed out after {0:?}")]
    DetectorTimeout(Duration),

    #[error("frame source failed: {0}")]
    FrameSource(String),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl VisionError {
    pub fn detector(msg: impl Into<String>) -> Self {
        Self::Detector(msg.into())
    }

    pub fn frame_source(msg: impl Into<String>) -> Self {
        Self::FrameSource(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors that abandon a whole inference cycle rather than a single field.
    pub fn is_cycle_fatal(&self) -> bool {
        matches!(
            self,
            VisionError::Detector(_) | VisionError::DetectorTimeout(_) | VisionError::FrameSource(_)
        )
    }
}
