//! Frames going in, match results coming out

use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use super::config::MatchParameters;
use super::raster::Image;
use super::region::{Position, Region};
use super::template::Template;

/// A captured image plus its capture time in seconds since the epoch, if known.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: Arc<Image>,
    pub time: Option<f64>,
}

impl Frame {
    pub fn new(image: impl Into<Arc<Image>>) -> Self {
        Self {
            image: image.into(),
            time: None,
        }
    }

    pub fn with_time(image: impl Into<Arc<Image>>, time: f64) -> Self {
        Self {
            image: image.into(),
            time: Some(time),
        }
    }
}

impl From<Image> for Frame {
    fn from(image: Image) -> Self {
        Frame::new(image)
    }
}

impl From<Arc<Image>> for Frame {
    fn from(image: Arc<Image>) -> Self {
        Frame::new(image)
    }
}

/// The outcome of one search.
///
/// A failed search still carries the best position found and its certainty.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    /// Capture time of the frame that was searched
    pub time: Option<f64>,
    /// First pass and confirm pass both succeeded
    pub matched: bool,
    /// Where the template was (or best would have been), in frame coordinates
    pub region: Region,
    /// First-pass certainty in `[0, 1]`
    pub certainty: f64,
    pub first_pass_matched: bool,
    pub frame: Arc<Image>,
    pub template: Arc<Template>,
}

impl MatchResult {
    pub fn position(&self) -> Position {
        self.region.position()
    }

    /// Image-free view of this result, for JSON output and caching.
    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            matched: self.matched,
            region: self.region,
            certainty: self.certainty,
            first_pass_matched: self.first_pass_matched,
            time: self.time,
        }
    }
}

impl fmt::Display for MatchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fw, fh, fc) = self.frame.shape();
        let (tw, th, tc) = self.template.shape();
        write!(
            f,
            "MatchResult(time={}, match={}, region={}, first_pass_result={:.4}, frame=<{fw}x{fh}x{fc}>, image=<{tw}x{th}x{tc}>)",
            self.time.map_or_else(|| "None".to_string(), |t| format!("{t:.3}")),
            self.matched,
            self.region,
            self.certainty,
        )
    }
}

/// Serializable fields of a [`MatchResult`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchSummary {
    pub matched: bool,
    pub region: Region,
    pub certainty: f64,
    pub first_pass_matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

/// A whole search outcome as printed by the command-line tool.
#[derive(Debug, Clone, Serialize)]
pub struct MatchReport {
    pub parameters: MatchParameters,
    pub results: Vec<MatchSummary>,
}
