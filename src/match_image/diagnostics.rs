//! Optional observers for intermediate matching images
//!
//! A sink sees every stage of a search: the source and template at each
//! pyramid level, heatmaps, ROI masks and the confirm-pass images. Sinks never
//! influence the numbers, except that an enabled sink disables the fast path
//! so that every stage is produced.

use image::GrayImage;
use log::debug;
use std::sync::{Mutex, MutexGuard};

use super::raster::Image;

pub trait DiagnosticsSink: Send + Sync {
    /// When false, stage images are never built.
    fn enabled(&self) -> bool {
        true
    }

    fn record(&self, stage: &str, image: &Image);
}

/// Discards everything. The default for [`Matcher`](super::Matcher).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiagnostics;

impl DiagnosticsSink for NoDiagnostics {
    fn enabled(&self) -> bool {
        false
    }

    fn record(&self, _stage: &str, _image: &Image) {}
}

/// Logs each stage's name and shape at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DiagnosticsSink for LogSink {
    fn record(&self, stage: &str, image: &Image) {
        debug!("[match] {stage}: {image:?}");
    }
}

/// Keeps a copy of every stage image in memory, in the order recorded.
#[derive(Debug, Default)]
pub struct RecordingSink {
    stages: Mutex<Vec<(String, Image)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, Image)>> {
        self.stages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stage_names(&self) -> Vec<String> {
        self.lock().iter().map(|(name, _)| name.clone()).collect()
    }

    /// The most recent image recorded under `stage`.
    pub fn get(&self, stage: &str) -> Option<Image> {
        self.lock()
            .iter()
            .rev()
            .find(|(name, _)| name == stage)
            .map(|(_, img)| img.clone())
    }

    pub fn take(&self) -> Vec<(String, Image)> {
        std::mem::take(&mut *self.lock())
    }
}

impl DiagnosticsSink for RecordingSink {
    fn record(&self, stage: &str, image: &Image) {
        self.lock().push((stage.to_string(), image.clone()));
    }
}

/// A sink scoped to a stage-name prefix such as `level1-` or `match0-`.
#[derive(Clone, Copy)]
pub(crate) struct Stage<'a> {
    sink: &'a dyn DiagnosticsSink,
    prefix: &'a str,
}

impl<'a> Stage<'a> {
    pub(crate) fn new(sink: &'a dyn DiagnosticsSink, prefix: &'a str) -> Self {
        Self { sink, prefix }
    }

    pub(crate) fn enabled(&self) -> bool {
        self.sink.enabled()
    }

    pub(crate) fn image(&self, name: &str, image: &Image) {
        if self.sink.enabled() {
            self.sink.record(&format!("{}{}", self.prefix, name), image);
        }
    }

    /// Like `image`, but the picture is only built when someone is listening.
    pub(crate) fn gray(&self, name: &str, build: impl FnOnce() -> GrayImage) {
        if self.sink.enabled() {
            self.image(name, &Image::from(build()));
        }
    }
}
