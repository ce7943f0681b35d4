//! Match orchestration: validation, pyramid search, confirmation and match_all

use image::{GrayImage, Luma};
use log::{debug, info};
use std::sync::Arc;

use super::components::{component_boxes, upsample_roi_mask};
use super::config::{MatchConfig, MatchMethod, MatchParameters};
use super::confirm::confirm_match;
use super::diagnostics::{DiagnosticsSink, NoDiagnostics, Stage};
use super::error::{EngineResult, MatchError};
use super::heatmap::{Best, Heatmap};
use super::pyramid::{Pyramids, upsample_position};
use super::raster::Image;
use super::region::{Position, Region};
use super::result::{Frame, MatchResult};
use super::sqdiff::{SqDiffBackend, sqdiff};
use super::template::Template;

/// The matching engine.
///
/// Holds only immutable configuration, so one `Matcher` can serve any number
/// of threads.
#[derive(Clone)]
pub struct Matcher {
    config: MatchConfig,
    levels: usize,
    kernel: SqDiffBackend,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            config: MatchConfig::default(),
            levels: 3,
            kernel: SqDiffBackend::default(),
            diagnostics: Arc::new(NoDiagnostics),
        }
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher")
            .field("config", &self.config)
            .field("diagnostics", &self.diagnostics.enabled())
            .finish()
    }
}

impl Matcher {
    /// Build a matcher, rejecting a misconfigured pyramid before any search runs.
    pub fn new(config: MatchConfig) -> EngineResult<Self> {
        let levels = config.validate()?;
        config.parameters.validate()?;
        info!(
            "Matcher ready: {} pyramid levels, {} sqdiff kernel",
            levels, config.sqdiff_kernel
        );
        Ok(Self {
            levels,
            kernel: SqDiffBackend::new(config.sqdiff_kernel),
            config,
            diagnostics: Arc::new(NoDiagnostics),
        })
    }

    /// Default configuration with `FRAME_MATCH_*` environment overrides applied.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = MatchConfig::default();
        config.apply_env()?;
        Self::new(config)
    }

    /// Send intermediate images to `sink`. An enabled sink disables the
    /// equal-size fast path.
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Search for `template` in `region` of `frame`.
    ///
    /// `params` of `None` uses the configured defaults; pass [`Region::ALL`]
    /// to search the whole frame.
    pub fn match_image(
        &self,
        template: impl Into<Arc<Template>>,
        frame: impl Into<Frame>,
        params: Option<&MatchParameters>,
        region: Region,
    ) -> EngineResult<MatchResult> {
        let mut all = self.match_all(template, frame, params, region)?;
        Ok(all.take_pending())
    }

    /// Find every non-overlapping match, best first.
    ///
    /// The iterator yields the matches, then exactly one result with
    /// `matched == false`, then ends. Confirmation runs as results are pulled.
    pub fn match_all(
        &self,
        template: impl Into<Arc<Template>>,
        frame: impl Into<Frame>,
        params: Option<&MatchParameters>,
        region: Region,
    ) -> EngineResult<MatchAll> {
        let template = template.into();
        let frame = frame.into();
        let params = *params.unwrap_or(&self.config.parameters);
        let search = Search::prepare(self, template, frame, params, region)?;
        search.run()
    }

    /// Poll `frames` until the template matches in `consecutive_matches`
    /// frames in a row at the same position.
    ///
    /// Gives up with [`MatchError::Timeout`] once a frame arrives more than
    /// `timeout_secs` after the first one, or when `frames` runs out.
    pub fn wait_for_match(
        &self,
        template: impl Into<Arc<Template>>,
        frames: impl IntoIterator<Item = Frame>,
        params: Option<&MatchParameters>,
        region: Region,
        timeout_secs: f64,
        consecutive_matches: u32,
    ) -> EngineResult<MatchResult> {
        if consecutive_matches == 0 {
            return Err(MatchError::parameter(
                "consecutive_matches",
                "must be at least 1",
            ));
        }
        let template = template.into();
        let mut start: Option<f64> = None;
        let mut count = 0;
        let mut last_position = Position::default();
        let mut last: Option<MatchResult> = None;

        for frame in frames {
            if let Some(t) = frame.time {
                let start = *start.get_or_insert(t);
                if t - start > timeout_secs {
                    break;
                }
            }
            let result = self.match_image(template.clone(), frame, params, region)?;
            if result.matched && (count == 0 || result.position() == last_position) {
                count += 1;
            } else {
                count = 0;
            }
            last_position = result.position();
            if count == consecutive_matches {
                debug!("Matched {} consecutive frames: {}", count, result);
                return Ok(result);
            }
            last = Some(result);
        }

        Err(MatchError::Timeout {
            timeout_secs,
            last: last.map(Box::new),
        })
    }
}

/// Search for `template` in `frame` with the default matcher.
pub fn match_image(
    template: impl Into<Arc<Template>>,
    frame: impl Into<Frame>,
    params: Option<&MatchParameters>,
    region: Region,
) -> EngineResult<MatchResult> {
    Matcher::default().match_image(template, frame, params, region)
}

/// Find every non-overlapping match with the default matcher.
pub fn match_all(
    template: impl Into<Arc<Template>>,
    frame: impl Into<Frame>,
    params: Option<&MatchParameters>,
    region: Region,
) -> EngineResult<MatchAll> {
    Matcher::default().match_all(template, frame, params, region)
}

/// A first-pass result waiting for confirmation, in search-area coordinates.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    matched: bool,
    region: Region,
    certainty: f64,
}

/// Validated inputs for one search.
struct Search {
    template: Arc<Template>,
    frame: Frame,
    /// The part of the frame being searched, and its offset within the frame
    area: Image,
    offset: Region,
    params: MatchParameters,
    levels: usize,
    kernel: SqDiffBackend,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl Search {
    fn prepare(
        matcher: &Matcher,
        template: Arc<Template>,
        frame: Frame,
        params: MatchParameters,
        region: Region,
    ) -> EngineResult<Self> {
        params.validate()?;
        let image = &frame.image;
        let pair = (image.channel_count(), template.source_channels());
        if !matches!(pair, (1, 1) | (3, 3) | (3, 4)) {
            return Err(MatchError::ChannelMismatch {
                frame: image.shape(),
                template: template.shape(),
            });
        }
        if template.is_masked() && !params.match_method.supports_mask() {
            return Err(MatchError::MaskedMethodUnsupported {
                method: params.match_method.to_string(),
            });
        }
        if image.width() < template.width() || image.height() < template.height() {
            return Err(MatchError::FrameSmallerThanTemplate {
                frame: image.shape(),
                template: template.shape(),
            });
        }

        let offset = image
            .region()
            .and_then(|full| full.intersect(&region))
            .ok_or_else(|| MatchError::RegionOutsideFrame {
                width: image.width(),
                height: image.height(),
                region: region.to_string(),
            })?;
        if offset.width() < template.width() || offset.height() < template.height() {
            return Err(MatchError::RegionSmallerThanTemplate {
                region: offset.to_string(),
                width: template.width(),
                height: template.height(),
            });
        }
        let area = if Some(offset) == image.region() {
            (**image).clone()
        } else {
            image.crop(&offset)?
        };

        Ok(Self {
            template,
            frame,
            area,
            offset,
            params,
            levels: matcher.levels,
            kernel: matcher.kernel,
            diagnostics: matcher.diagnostics.clone(),
        })
    }

    fn template_region(&self, position: Position) -> Region {
        Region::new(
            position.x,
            position.y,
            self.template.width(),
            self.template.height(),
        )
    }

    fn run(self) -> EngineResult<MatchAll> {
        let diagnostics_on = self.diagnostics.enabled();
        let same_size = (self.template.width(), self.template.height())
            == (self.area.width(), self.area.height());

        if self.params.match_method == MatchMethod::SqDiff && same_size && !diagnostics_on {
            debug!("Frame and template sizes match: using fast path");
            let certainty = sqdiff(&self.kernel, &self.template, &self.area)?.certainty();
            let candidate = Candidate {
                matched: certainty >= self.params.match_threshold,
                region: self.template_region(Position::default()),
                certainty,
            };
            return Ok(MatchAll::new(self, None, candidate));
        }
        Ok(self.pyramid_search())
    }

    fn pyramid_search(self) -> MatchAll {
        let method = self.params.match_method;
        let pyramids = Pyramids::build(&self.template, &self.area, self.levels);
        let mut roi_mask: Option<GrayImage> = None;
        let mut finest: Option<Heatmap> = None;
        let mut best = Best {
            position: Position::default(),
            certainty: 0.0,
            measured: false,
        };

        for level in (0..pyramids.len()).rev() {
            let template = &pyramids.templates[level];
            let frame = &pyramids.frames[level];
            let prefix = format!("level{level}-");
            let stage = Stage::new(&*self.diagnostics, &prefix);

            let heatmap_w = frame.width() - template.width() + 1;
            let heatmap_h = frame.height() - template.height() + 1;
            let rois = roi_mask
                .take()
                .and_then(|mask| upsample_roi_mask(&mask, heatmap_w, heatmap_h))
                .map(|mask| component_boxes(&mask));
            debug!(
                "Level {}: frame {:?}, template {:?}, {} ROIs",
                level,
                frame,
                template.image(),
                rois.as_ref().map_or("all".to_string(), |r| r.len().to_string())
            );

            let heatmap = Heatmap::compute(template, frame, method, rois.as_deref(), &self.kernel);
            stage.image("source", frame);
            stage.image("template", template.image());
            if let Some(mask) = template.mask() {
                stage.image("mask", mask.as_image());
            }
            stage.gray("source_matchtemplate", || heatmap.to_gray());

            let threshold = if level == 0 {
                self.params.match_threshold
            } else {
                (self.params.match_threshold - method.coarse_level_relaxation()).max(0.0)
            };
            best = heatmap.best();
            let matched = best.passes(threshold);
            debug!(
                "Level {}: {} at {:?} with certainty {:.4}",
                level,
                if matched { "Matched" } else { "Didn't match" },
                best.position,
                best.certainty
            );

            if !matched {
                let position = self.clamp_position(upsample_position(best.position, level));
                let candidate = Candidate {
                    matched: false,
                    region: self.template_region(position),
                    certainty: best.certainty,
                };
                return MatchAll::new(self, None, candidate);
            }

            if level > 0 || stage.enabled() {
                let mut mask = heatmap.roi_mask(threshold);
                // The best cell passed, so it is always a candidate
                mask.put_pixel(best.position.x as u32, best.position.y as u32, Luma([255]));
                stage.gray("source_matchtemplate_threshold", || mask.clone());
                if level > 0 {
                    roi_mask = Some(mask);
                }
            }
            if level == 0 {
                finest = Some(heatmap);
            }
        }

        let candidate = Candidate {
            matched: true,
            region: self.template_region(best.position),
            certainty: best.certainty,
        };
        MatchAll::new(self, finest, candidate)
    }

    /// Keep an upsampled coarse position inside the valid search area.
    fn clamp_position(&self, p: Position) -> Position {
        let max_x = (self.area.width() - self.template.width()) as i32;
        let max_y = (self.area.height() - self.template.height()) as i32;
        Position::new(p.x.clamp(0, max_x), p.y.clamp(0, max_y))
    }
}

/// Lazy sequence of matches produced by [`Matcher::match_all`].
pub struct MatchAll {
    search: Search,
    /// Level-0 heatmap, absent after the fast path or a coarse-level failure
    heatmap: Option<Heatmap>,
    pending: Candidate,
    index: usize,
    finished: bool,
}

impl MatchAll {
    fn new(search: Search, heatmap: Option<Heatmap>, pending: Candidate) -> Self {
        Self {
            search,
            heatmap,
            pending,
            index: 0,
            finished: false,
        }
    }

    /// Only the matching results, without the terminating non-match.
    pub fn matches(self) -> impl Iterator<Item = MatchResult> {
        self.take_while(|r| r.matched)
    }

    /// Confirm and report the pending candidate, then line up the next one.
    fn take_pending(&mut self) -> MatchResult {
        let candidate = self.pending;
        let search = &self.search;
        let prefix = format!("match{}-", self.index);
        let stage = Stage::new(&*search.diagnostics, &prefix);

        let confirmed = candidate.matched
            && confirm_match(&search.area, &candidate.region, &search.template, &search.params, stage);
        if let Some(heatmap) = &self.heatmap {
            stage.gray("heatmap", || heatmap.to_gray());
        }

        let result = MatchResult {
            time: search.frame.time,
            matched: confirmed,
            region: candidate.region.translate(search.offset.x, search.offset.y),
            certainty: candidate.certainty.clamp(0.0, 1.0),
            first_pass_matched: candidate.matched,
            frame: search.frame.image.clone(),
            template: search.template.clone(),
        };
        debug!("{}", result);

        if !confirmed {
            self.finished = true;
            return result;
        }

        self.index += 1;
        self.pending = match &mut self.heatmap {
            Some(heatmap) => {
                heatmap.exclude(&candidate.region);
                let best = heatmap.best();
                Candidate {
                    matched: best.passes(search.params.match_threshold),
                    region: search.template_region(best.position),
                    certainty: best.certainty,
                }
            }
            // Only one placement exists on the fast path
            None => Candidate {
                matched: false,
                region: candidate.region,
                certainty: 0.0,
            },
        };
        result
    }
}

impl Iterator for MatchAll {
    type Item = MatchResult;

    fn next(&mut self) -> Option<MatchResult> {
        if self.finished {
            return None;
        }
        Some(self.take_pending())
    }
}

impl std::iter::FusedIterator for MatchAll {}
