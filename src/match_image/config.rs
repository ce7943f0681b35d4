//! Configuration for image matching operations

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use super::error::{EngineResult, MatchError};
use super::sqdiff::KernelKind;

/// Environment variable overriding [`MatchConfig::pyramid_levels`]
pub const ENV_PYRAMID_LEVELS: &str = "FRAME_MATCH_PYRAMID_LEVELS";
/// Environment variable overriding [`MatchConfig::sqdiff_kernel`]
pub const ENV_SQDIFF_KERNEL: &str = "FRAME_MATCH_SQDIFF_KERNEL";

/// First-pass comparison used to locate the most likely position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchMethod {
    #[serde(rename = "sqdiff")]
    SqDiff,
    #[serde(rename = "sqdiff-normed")]
    SqDiffNormed,
    #[serde(rename = "ccorr-normed")]
    CcorrNormed,
    #[serde(rename = "ccoeff-normed")]
    CcoeffNormed,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchMethod::SqDiff => "sqdiff",
            MatchMethod::SqDiffNormed => "sqdiff-normed",
            MatchMethod::CcorrNormed => "ccorr-normed",
            MatchMethod::CcoeffNormed => "ccoeff-normed",
        }
    }

    /// Only these methods can honour a transparency mask.
    pub fn supports_mask(self) -> bool {
        matches!(self, MatchMethod::SqDiff | MatchMethod::CcorrNormed)
    }

    /// Amount subtracted from `match_threshold` on downscaled pyramid levels.
    ///
    /// Empirically tuned on SD/HD UI screenshots.
    pub fn coarse_level_relaxation(self) -> f64 {
        match self {
            MatchMethod::SqDiff => 0.02,
            _ => 0.20,
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMethod {
    type Err = MatchError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "sqdiff" => Ok(MatchMethod::SqDiff),
            "sqdiff-normed" => Ok(MatchMethod::SqDiffNormed),
            "ccorr-normed" => Ok(MatchMethod::CcorrNormed),
            "ccoeff-normed" => Ok(MatchMethod::CcoeffNormed),
            other => Err(MatchError::parameter(
                "match_method",
                format!("unknown method '{other}'"),
            )),
        }
    }
}

/// Second-pass check applied to the single best candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConfirmMethod {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "absdiff")]
    AbsDiff,
    #[serde(rename = "normed-absdiff")]
    NormedAbsDiff,
}

impl ConfirmMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfirmMethod::None => "none",
            ConfirmMethod::AbsDiff => "absdiff",
            ConfirmMethod::NormedAbsDiff => "normed-absdiff",
        }
    }
}

impl fmt::Display for ConfirmMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfirmMethod {
    type Err = MatchError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "none" => Ok(ConfirmMethod::None),
            "absdiff" => Ok(ConfirmMethod::AbsDiff),
            "normed-absdiff" => Ok(ConfirmMethod::NormedAbsDiff),
            other => Err(MatchError::parameter(
                "confirm_method",
                format!("unknown method '{other}'"),
            )),
        }
    }
}

/// Parameters of the two-pass matching algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchParameters {
    /// First-pass comparison method
    pub match_method: MatchMethod,
    /// Average similarity required across the whole template (0.0 to 1.0)
    pub match_threshold: f64,
    /// Second-pass method
    pub confirm_method: ConfirmMethod,
    /// Per-pixel similarity required by the second pass (0.0 to 1.0)
    pub confirm_threshold: f64,
    /// Erosions applied to the second-pass difference image
    pub erode_passes: u32,
}

impl Default for MatchParameters {
    fn default() -> Self {
        Self {
            match_method: MatchMethod::SqDiff,
            match_threshold: 0.98,
            confirm_method: ConfirmMethod::NormedAbsDiff,
            confirm_threshold: 0.70,
            erode_passes: 1,
        }
    }
}

impl MatchParameters {
    pub fn new(match_method: MatchMethod, match_threshold: f64) -> Self {
        Self {
            match_method,
            match_threshold,
            ..Self::default()
        }
    }

    pub fn with_confirm(mut self, confirm_method: ConfirmMethod, confirm_threshold: f64) -> Self {
        self.confirm_method = confirm_method;
        self.confirm_threshold = confirm_threshold;
        self
    }

    pub fn with_erode_passes(mut self, erode_passes: u32) -> Self {
        self.erode_passes = erode_passes;
        self
    }

    /// Check both thresholds lie in `[0, 1]`.
    pub fn validate(&self) -> EngineResult<()> {
        for (name, value) in [
            ("match_threshold", self.match_threshold),
            ("confirm_threshold", self.confirm_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MatchError::parameter(
                    name,
                    format!("{value} is outside [0, 1]"),
                ));
            }
        }
        Ok(())
    }

    /// Set one parameter from its textual form, e.g. `("confirm_threshold", "0.84")`.
    pub fn set(&mut self, name: &str, value: &str) -> EngineResult<()> {
        let bad = |e: &dyn fmt::Display| MatchError::parameter(name, format!("'{value}': {e}"));
        match name {
            "match_method" => self.match_method = value.parse()?,
            "match_threshold" => self.match_threshold = value.parse().map_err(|e| bad(&e))?,
            "confirm_method" => self.confirm_method = value.parse()?,
            "confirm_threshold" => self.confirm_threshold = value.parse().map_err(|e| bad(&e))?,
            "erode_passes" => self.erode_passes = value.parse().map_err(|e| bad(&e))?,
            _ => return Err(MatchError::parameter(name, "unknown parameter")),
        }
        Ok(())
    }

    /// Parse a `name=value` assignment as accepted on the command line.
    pub fn apply_assignment(&mut self, assignment: &str) -> EngineResult<()> {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| MatchError::parameter(assignment, "expected name=value"))?;
        self.set(name.trim(), value.trim())
    }
}

/// Engine-wide settings that are not per-call parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Maximum number of pyramid levels, including full resolution. Must be > 0.
    pub pyramid_levels: i32,
    /// Which sum-of-squared-differences kernel to use
    pub sqdiff_kernel: KernelKind,
    /// Parameters used when the caller doesn't supply any
    pub parameters: MatchParameters,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            pyramid_levels: 3,
            sqdiff_kernel: KernelKind::Unrolled,
            parameters: MatchParameters::default(),
        }
    }
}

impl MatchConfig {
    /// Parse a JSON document; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Apply `FRAME_MATCH_*` environment overrides.
    pub fn apply_env(&mut self) -> EngineResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup; `apply_env` uses the process environment.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> EngineResult<()> {
        if let Some(raw) = lookup(ENV_PYRAMID_LEVELS) {
            self.pyramid_levels = raw.trim().parse().map_err(|_| {
                MatchError::config(format!("{ENV_PYRAMID_LEVELS}='{raw}' is not an integer"))
            })?;
        }
        if let Some(raw) = lookup(ENV_SQDIFF_KERNEL) {
            self.sqdiff_kernel = raw.trim().parse()?;
        }
        Ok(())
    }

    /// Reject settings that would make every search fail.
    pub fn validate(&self) -> EngineResult<usize> {
        if self.pyramid_levels <= 0 {
            return Err(MatchError::config(format!(
                "'match.pyramid_levels' must be > 0 (got {})",
                self.pyramid_levels
            )));
        }
        Ok(self.pyramid_levels as usize)
    }
}

/// Create the default configuration
pub fn create_default_config() -> MatchConfig {
    MatchConfig::default()
}

/// Configuration that searches at full resolution only
pub fn create_single_level_config() -> MatchConfig {
    MatchConfig {
        pyramid_levels: 1,
        ..MatchConfig::default()
    }
}

/// Configuration preset for pixel-exact UI elements rendered without scaling
pub fn create_strict_config() -> MatchConfig {
    MatchConfig {
        parameters: MatchParameters {
            match_threshold: 0.99,
            confirm_method: ConfirmMethod::AbsDiff,
            confirm_threshold: 0.84,
            ..MatchParameters::default()
        },
        ..MatchConfig::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parameter_defaults() {
        let mp = MatchParameters::default();
        assert_eq!(mp.match_method, MatchMethod::SqDiff);
        assert_eq!(mp.match_threshold, 0.98);
        assert_eq!(mp.confirm_method, ConfirmMethod::NormedAbsDiff);
        assert_eq!(mp.confirm_threshold, 0.70);
        assert_eq!(mp.erode_passes, 1);
    }

    #[test]
    fn test_method_names() {
        for m in [
            MatchMethod::SqDiff,
            MatchMethod::SqDiffNormed,
            MatchMethod::CcorrNormed,
            MatchMethod::CcoeffNormed,
        ] {
            assert_eq!(m.as_str().parse::<MatchMethod>().unwrap(), m);
        }
        assert!("SQDIFF".parse::<MatchMethod>().is_err());
        assert_eq!(
            "normed-absdiff".parse::<ConfirmMethod>().unwrap(),
            ConfirmMethod::NormedAbsDiff
        );
    }

    #[test]
    fn test_relaxation_constants() {
        assert_eq!(MatchMethod::SqDiff.coarse_level_relaxation(), 0.02);
        assert_eq!(MatchMethod::CcoeffNormed.coarse_level_relaxation(), 0.20);
        assert!(MatchMethod::CcorrNormed.supports_mask());
        assert!(!MatchMethod::SqDiffNormed.supports_mask());
    }

    #[test]
    fn test_apply_assignment() {
        let mut mp = MatchParameters::default();
        mp.apply_assignment("confirm_threshold=0.84").unwrap();
        mp.apply_assignment("match_method=ccoeff-normed").unwrap();
        mp.apply_assignment("erode_passes = 0").unwrap();
        assert_eq!(mp.confirm_threshold, 0.84);
        assert_eq!(mp.match_method, MatchMethod::CcoeffNormed);
        assert_eq!(mp.erode_passes, 0);

        assert!(mp.apply_assignment("erode_passes=-1").is_err());
        assert!(mp.apply_assignment("colour=blue").is_err());
        assert!(mp.apply_assignment("match_threshold").is_err());
    }

    #[test]
    fn test_threshold_validation() {
        assert!(MatchParameters::new(MatchMethod::SqDiff, 1.0).validate().is_ok());
        assert!(MatchParameters::new(MatchMethod::SqDiff, 1.5).validate().is_err());
        let mp = MatchParameters::default().with_confirm(ConfirmMethod::AbsDiff, -0.1);
        assert!(matches!(
            mp.validate(),
            Err(MatchError::InvalidParameter { ref name, .. }) if name == "confirm_threshold"
        ));
    }

    #[test]
    fn test_config_validate_rejects_zero_levels() {
        let config = MatchConfig {
            pyramid_levels: 0,
            ..MatchConfig::default()
        };
        assert!(matches!(config.validate(), Err(MatchError::Config { .. })));
        assert_eq!(create_default_config().validate().unwrap(), 3);
        assert_eq!(create_single_level_config().validate().unwrap(), 1);
    }

    #[test]
    fn test_config_from_json() {
        let config = MatchConfig::from_json_str(
            r#"{"pyramid_levels": 2, "parameters": {"match_method": "ccorr-normed", "match_threshold": 0.8}}"#,
        )
        .unwrap();
        assert_eq!(config.pyramid_levels, 2);
        assert_eq!(config.sqdiff_kernel, KernelKind::Unrolled);
        assert_eq!(config.parameters.match_method, MatchMethod::CcorrNormed);
        assert_eq!(config.parameters.match_threshold, 0.8);
        assert_eq!(config.parameters.confirm_threshold, 0.70, "Missing keys keep defaults");

        assert!(MatchConfig::from_json_str("{\"pyramid_levels\": \"three\"}").is_err());
    }

    #[test]
    fn test_config_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sqdiff_kernel": "portable"}}"#).unwrap();
        let config = MatchConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.sqdiff_kernel, KernelKind::Portable);
        assert_eq!(config.pyramid_levels, 3);
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_PYRAMID_LEVELS, "1"),
            (ENV_SQDIFF_KERNEL, "portable"),
        ]
        .into_iter()
        .collect();
        let mut config = create_default_config();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.pyramid_levels, 1);
        assert_eq!(config.sqdiff_kernel, KernelKind::Portable);

        let mut config = create_default_config();
        let err = config
            .apply_overrides(|k| (k == ENV_PYRAMID_LEVELS).then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, MatchError::Config { .. }));
    }

    #[test]
    fn test_strict_preset() {
        let config = create_strict_config();
        assert_eq!(config.parameters.confirm_method, ConfirmMethod::AbsDiff);
        assert_eq!(config.parameters.confirm_threshold, 0.84);
    }
}
