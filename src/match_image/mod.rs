//! Image matching engine
//!
//! Locates a reference image ("template") inside a captured frame. The first
//! pass searches an image pyramid coarsest-first, narrowing the search to
//! candidate areas at each level; a second pass confirms the single best
//! candidate pixel by pixel. `match_all` repeats the first pass over the
//! full-resolution heatmap to find every non-overlapping match.

pub mod components;
pub mod config;
mod confirm;
pub mod diagnostics;
pub mod error;
pub mod heatmap;
pub mod matcher;
pub mod pyramid;
pub mod raster;
pub mod region;
pub mod result;
pub mod sqdiff;
pub mod template;


// Re-export main types and functions
pub use config::{
    ConfirmMethod, MatchConfig, MatchMethod, MatchParameters, create_default_config,
    create_single_level_config, create_strict_config,
};
pub use diagnostics::{DiagnosticsSink, LogSink, NoDiagnostics, RecordingSink};
pub use error::{EngineResult, MatchError};
pub use matcher::{MatchAll, Matcher, match_all, match_image};
pub use raster::{Channels, Image};
pub use region::{Position, Region, merge_regions};
pub use result::{Frame, MatchReport, MatchResult, MatchSummary};
pub use sqdiff::KernelKind;
pub use template::{BinaryMask, Template};
