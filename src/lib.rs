pub mod args;
pub mod match_image;

pub use match_image::{
    EngineResult, Frame, Image, MatchAll, MatchConfig, MatchError, MatchParameters, MatchResult,
    Matcher, Region, Template, match_all, match_image,
};
