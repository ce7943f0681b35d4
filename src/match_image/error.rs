use std::path::PathBuf;
use thiserror::Error;

use super::result::MatchResult;

/// A specialized `Result` type for matching operations.
pub type EngineResult<T> = Result<T, MatchError>;

/// The error type for everything the matching engine rejects.
///
/// Invalid inputs are programming errors, so none of these are retried.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Unsupported channel count {channels} for {what}: expected 1, 3 or 4")]
    UnsupportedChannels { what: &'static str, channels: usize },

    #[error("Pixel buffer of {len} bytes doesn't hold a {width}x{height}x{channels} image")]
    BufferSizeMismatch {
        width: u32,
        height: u32,
        channels: usize,
        len: usize,
    },

    #[error("Reference image {width}x{height} must contain some data")]
    EmptyTemplate { width: u32, height: u32 },

    #[error("Frame {frame:?} must be larger than reference image {template:?}")]
    FrameSmallerThanTemplate {
        frame: (u32, u32, usize),
        template: (u32, u32, usize),
    },

    #[error(
        "Frame {frame:?} and reference image {template:?} must have the same number of channels"
    )]
    ChannelMismatch {
        frame: (u32, u32, usize),
        template: (u32, u32, usize),
    },

    #[error(
        "Reference image has alpha channel, but transparency support requires match_method sqdiff or ccorr-normed (you specified {method})"
    )]
    MaskedMethodUnsupported { method: String },

    #[error("Frame with dimensions {width}x{height} doesn't contain {region}")]
    RegionOutsideFrame {
        width: u32,
        height: u32,
        region: String,
    },

    #[error("Search region {region} is smaller than reference image {width}x{height}")]
    RegionSmallerThanTemplate {
        region: String,
        width: u32,
        height: u32,
    },

    #[error("Configuration error: {description}")]
    Config { description: String },

    #[error("Invalid match parameter '{name}': {description}")]
    InvalidParameter { name: String, description: String },

    #[error("Failed to load image {path:?}: {source}")]
    ImageLoad {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Didn't find match within {timeout_secs} seconds")]
    Timeout {
        timeout_secs: f64,
        last: Option<Box<MatchResult>>,
    },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("Invalid JSON configuration: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

impl MatchError {
    /// Check whether this error comes from caller-supplied shapes rather than
    /// configuration or I/O
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            MatchError::UnsupportedChannels { .. }
                | MatchError::BufferSizeMismatch { .. }
                | MatchError::EmptyTemplate { .. }
                | MatchError::FrameSmallerThanTemplate { .. }
                | MatchError::ChannelMismatch { .. }
                | MatchError::RegionSmallerThanTemplate { .. }
        )
    }

    pub(crate) fn config(description: impl Into<String>) -> Self {
        MatchError::Config {
            description: description.into(),
        }
    }

    pub(crate) fn parameter(name: impl Into<String>, description: impl Into<String>) -> Self {
        MatchError::InvalidParameter {
            name: name.into(),
            description: description.into(),
        }
    }
}
