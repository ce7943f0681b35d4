//! Per-position matching scores for one pyramid level
//!
//! Every method is stored so that lower is better: squared differences as-is,
//! correlations as `1 − r`. `certainty = 1 − value / scale` then means the same
//! thing for all of them.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::template_matching::{Extremes, find_extremes};
use log::trace;

use super::config::MatchMethod;
use super::raster::Image;
use super::region::{Position, Region};
use super::sqdiff::{SqDiffBackend, SqDiffKernel};
use super::template::{BinaryMask, Template};

const MAX_SQUARED: f64 = 255.0 * 255.0;

/// Value of cells that were never scored or have been excluded.
const UNMEASURED: f32 = f32::INFINITY;

/// The best (lowest) cell of a heatmap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Best {
    pub position: Position,
    /// Unclamped; below 0 for a masked SQDIFF "no placement" result.
    pub certainty: f64,
    /// False when no scored placement is left, i.e. every cell was excluded
    /// or outside the searched areas.
    pub measured: bool,
}

impl Best {
    /// A scored placement at or above `threshold`.
    pub fn passes(&self, threshold: f64) -> bool {
        self.measured && self.certainty >= threshold
    }
}

#[derive(Debug, Clone)]
pub struct Heatmap {
    values: ImageBuffer<Luma<f32>, Vec<f32>>,
    scale: f64,
    /// Certainty reported when nothing was measured
    no_match: f64,
}

impl Heatmap {
    /// Score every template placement inside `rois` (heatmap coordinates).
    /// `None` searches the whole valid area. The frame must be at least as
    /// large as the template.
    pub fn compute(
        template: &Template,
        frame: &Image,
        method: MatchMethod,
        rois: Option<&[Region]>,
        kernel: &SqDiffBackend,
    ) -> Heatmap {
        let t = template.image();
        let width = frame.width() - t.width() + 1;
        let height = frame.height() - t.height() + 1;
        let template_values = t.as_raw().len() as f64;

        let (scale, sentinel) = match method {
            MatchMethod::SqDiff => {
                let compared = match template.mask() {
                    Some(mask) => (mask.count_nonzero() * t.channel_count()).max(1) as f64,
                    None => template_values,
                };
                (compared * MAX_SQUARED, template_values * MAX_SQUARED)
            }
            _ => (1.0, 1.0),
        };

        let mut values = ImageBuffer::from_pixel(width, height, Luma([UNMEASURED]));
        let full = Region::of_size(width, height);
        let rois: Vec<Region> = match rois {
            None => vec![full],
            Some(rois) => rois.iter().filter_map(|r| r.intersect(&full)).collect(),
        };

        let scorer = Scorer::new(template, frame, method, kernel);
        for roi in &rois {
            trace!("Searching {} placements in {}", roi.area(), roi);
            for y in roi.y as u32..roi.bottom as u32 {
                for x in roi.x as u32..roi.right as u32 {
                    values.put_pixel(x, y, Luma([scorer.score(x, y) as f32]));
                }
            }
        }

        Heatmap {
            values,
            scale,
            no_match: 1.0 - sentinel / scale,
        }
    }

    pub fn width(&self) -> u32 {
        self.values.width()
    }

    pub fn height(&self) -> u32 {
        self.values.height()
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn values(&self) -> &ImageBuffer<Luma<f32>, Vec<f32>> {
        &self.values
    }

    /// First lowest cell in row-major order.
    pub fn best(&self) -> Best {
        let Extremes {
            min_value_location: (x, y),
            ..
        } = find_extremes(&self.values);
        let value = self.values.get_pixel(x, y)[0];
        let measured = value.is_finite();
        Best {
            position: Position::new(x as i32, y as i32),
            certainty: if measured {
                1.0 - value as f64 / self.scale
            } else {
                self.no_match
            },
            measured,
        }
    }

    /// Mark every placement whose template would overlap a match at `found`
    /// as "no match".
    pub fn exclude(&mut self, found: &Region) {
        let inflated = found.extend(
            -(found.width() as i32 - 1),
            -(found.height() as i32 - 1),
            0,
            0,
        );
        let bounds = Region::of_size(self.width(), self.height());
        let Some(cells) = inflated.and_then(|r| r.intersect(&bounds)) else {
            return;
        };
        for y in cells.y as u32..cells.bottom as u32 {
            for x in cells.x as u32..cells.right as u32 {
                self.values.put_pixel(x, y, Luma([UNMEASURED]));
            }
        }
    }

    /// Cells scoring at least `threshold` certainty become 255.
    pub fn roi_mask(&self, threshold: f64) -> GrayImage {
        let limit = (1.0 - threshold) * self.scale;
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let v = self.values.get_pixel(x, y)[0] as f64;
            Luma([if v <= limit { 255 } else { 0 }])
        })
    }

    /// Certainty rendered as brightness.
    pub fn to_gray(&self) -> GrayImage {
        GrayImage::from_fn(self.width(), self.height(), |x, y| {
            let certainty = 1.0 - self.values.get_pixel(x, y)[0] as f64 / self.scale;
            Luma([(certainty.clamp(0.0, 1.0) * 255.0).round() as u8])
        })
    }
}

/// Sums over one template-sized window of the frame.
#[derive(Default)]
struct WindowSums {
    cross: u64,
    template_sq: u64,
    frame_sq: u64,
    template_by_channel: [u64; 4],
    frame_by_channel: [u64; 4],
    pixels: u64,
}

struct Scorer<'a> {
    template: &'a Image,
    mask: Option<&'a BinaryMask>,
    frame: &'a Image,
    method: MatchMethod,
    kernel: &'a SqDiffBackend,
}

impl<'a> Scorer<'a> {
    fn new(
        template: &'a Template,
        frame: &'a Image,
        method: MatchMethod,
        kernel: &'a SqDiffBackend,
    ) -> Self {
        Self {
            template: template.image(),
            mask: template.mask(),
            frame,
            method,
            kernel,
        }
    }

    fn frame_row(&self, x: u32, y: u32) -> &'a [u8] {
        let n = self.template.channel_count();
        let start = x as usize * n;
        &self.frame.row(y)[start..start + self.template.row_len()]
    }

    fn score(&self, x: u32, y: u32) -> f64 {
        match self.method {
            MatchMethod::SqDiff => self.sqdiff(x, y) as f64,
            MatchMethod::SqDiffNormed => {
                let s = self.window_sums(x, y);
                let num = (s.template_sq + s.frame_sq) as f64 - 2.0 * s.cross as f64;
                let t = (s.template_sq as f64 * s.frame_sq as f64).sqrt();
                normalize(num, t, self.method)
            }
            MatchMethod::CcorrNormed => {
                let s = self.window_sums(x, y);
                let t = (s.template_sq as f64 * s.frame_sq as f64).sqrt();
                1.0 - normalize(s.cross as f64, t, self.method)
            }
            MatchMethod::CcoeffNormed => {
                let s = self.window_sums(x, y);
                let n = s.pixels as i128;
                let channels = self.template.channel_count();
                let (mut tf, mut tt, mut ff) = (0i128, 0i128, 0i128);
                for c in 0..channels {
                    let (st, sf) = (
                        s.template_by_channel[c] as i128,
                        s.frame_by_channel[c] as i128,
                    );
                    tf += st * sf;
                    tt += st * st;
                    ff += sf * sf;
                }
                let template_var = n * s.template_sq as i128 - tt;
                if template_var == 0 {
                    // A flat template correlates perfectly with anything
                    return 0.0;
                }
                let frame_var = n * s.frame_sq as i128 - ff;
                let num = (n * s.cross as i128 - tf) as f64;
                let t = (template_var as f64 * frame_var as f64).sqrt();
                1.0 - normalize(num, t, self.method)
            }
        }
    }

    fn sqdiff(&self, x: u32, y: u32) -> u64 {
        let n = self.template.channel_count();
        (0..self.template.height())
            .map(|ty| {
                let a = self.template.row(ty);
                let b = self.frame_row(x, y + ty);
                match self.mask {
                    None => self.kernel.row_sqdiff(a, b),
                    Some(mask) => self.kernel.row_sqdiff_masked(a, b, mask.row(ty), n),
                }
            })
            .sum()
    }

    fn window_sums(&self, x: u32, y: u32) -> WindowSums {
        let n = self.template.channel_count();
        let mut s = WindowSums::default();
        for ty in 0..self.template.height() {
            let trow = self.template.row(ty);
            let frow = self.frame_row(x, y + ty);
            let mrow = self.mask.map(|m| m.row(ty));
            for (px, (tp, fp)) in trow.chunks_exact(n).zip(frow.chunks_exact(n)).enumerate() {
                if mrow.is_some_and(|m| m[px] == 0) {
                    continue;
                }
                s.pixels += 1;
                for c in 0..n {
                    let (tv, fv) = (tp[c] as u64, fp[c] as u64);
                    s.cross += tv * fv;
                    s.template_sq += tv * tv;
                    s.frame_sq += fv * fv;
                    s.template_by_channel[c] += tv;
                    s.frame_by_channel[c] += fv;
                }
            }
        }
        s
    }
}

/// Normalised score `num / t`, with the classic handling of near-zero and
/// out-of-range denominators.
fn normalize(num: f64, t: f64, method: MatchMethod) -> f64 {
    if num.abs() < t {
        num / t
    } else if num.abs() < t * 1.125 {
        num.signum()
    } else if method == MatchMethod::SqDiffNormed {
        1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_image::raster::Channels;

    fn gray(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> Image {
        Image::from_fn(width, height, Channels::Luma, |x, y| [f(x, y), 0, 0, 0])
    }

    fn checker(x: u32, y: u32) -> u8 {
        if (x / 2 + y / 3) % 2 == 0 { 40 } else { 210 }
    }

    #[test]
    fn test_sqdiff_finds_exact_position() {
        let frame = gray(30, 20, |x, y| checker(x, y).wrapping_add((x * 7 + y * 13) as u8));
        let template = Template::new(frame.crop(&Region::new(11, 6, 8, 5)).unwrap()).unwrap();
        for method in [
            MatchMethod::SqDiff,
            MatchMethod::SqDiffNormed,
            MatchMethod::CcorrNormed,
            MatchMethod::CcoeffNormed,
        ] {
            let heatmap = Heatmap::compute(&template, &frame, method, None, &SqDiffBackend::default());
            assert_eq!((heatmap.width(), heatmap.height()), (23, 16));
            let best = heatmap.best();
            assert_eq!(best.position, Position::new(11, 6), "{method}");
            assert!((best.certainty - 1.0).abs() < 1e-6, "{method}: {}", best.certainty);
        }
    }

    #[test]
    fn test_sqdiff_scale() {
        // One differing pixel in a 2x2 template: exactly a quarter of the maximum
        let frame = gray(2, 2, |x, y| if (x, y) == (1, 1) { 255 } else { 0 });
        let template = Template::new(gray(2, 2, |_, _| 0)).unwrap();
        let heatmap =
            Heatmap::compute(&template, &frame, MatchMethod::SqDiff, None, &SqDiffBackend::default());
        assert_eq!(heatmap.scale(), 4.0 * 65025.0);
        assert_eq!(heatmap.best().certainty, 0.75);
    }

    #[test]
    fn test_unsearched_cells_are_unmeasured() {
        let frame = gray(20, 20, |_, _| 0);
        let template = Template::new(gray(4, 4, |_, _| 0)).unwrap();
        let rois = [Region::new(10, 10, 2, 2)];
        let heatmap = Heatmap::compute(
            &template,
            &frame,
            MatchMethod::SqDiff,
            Some(&rois),
            &SqDiffBackend::default(),
        );
        assert_eq!(heatmap.best().position, Position::new(10, 10));
        assert!(heatmap.best().measured);
        assert_eq!(heatmap.values().get_pixel(0, 0)[0], f32::INFINITY);
        let mask = heatmap.roi_mask(0.5);
        assert_eq!(mask.pixels().filter(|p| p[0] == 255).count(), 4);
    }

    #[test]
    fn test_black_images() {
        let frame = gray(10, 10, |_, _| 0);
        let template = Template::new(gray(3, 3, |_, _| 0)).unwrap();
        let certainty = |method| {
            Heatmap::compute(&template, &frame, method, None, &SqDiffBackend::default())
                .best()
                .certainty
        };
        assert_eq!(certainty(MatchMethod::SqDiff), 1.0);
        assert_eq!(certainty(MatchMethod::SqDiffNormed), 0.0);
        assert_eq!(certainty(MatchMethod::CcorrNormed), 0.0);
    }

    #[test]
    fn test_flat_template_under_ccoeff() {
        let frame = gray(12, 12, checker);
        let template = Template::new(gray(4, 4, |_, _| 99)).unwrap();
        let heatmap = Heatmap::compute(
            &template,
            &frame,
            MatchMethod::CcoeffNormed,
            None,
            &SqDiffBackend::default(),
        );
        assert!(heatmap.values().pixels().all(|p| p[0] == 0.0));
    }

    #[test]
    fn test_masked_sqdiff_ignores_transparent_pixels() {
        let frame = gray(10, 10, |x, y| if x >= 5 && y >= 5 { 200 } else { 0 });
        let frame = Image::from_fn(10, 10, Channels::Rgb, |x, y| {
            let v = frame.pixel(x, y)[0];
            [v, v, v, 0]
        });
        // Opaque only in the top-left corner; the rest is garbage
        let template = Template::new(Image::from_fn(4, 4, Channels::Rgba, |x, y| {
            if (x, y) == (0, 0) { [200, 200, 200, 255] } else { [17, 99, 3, 0] }
        }))
        .unwrap();
        let heatmap =
            Heatmap::compute(&template, &frame, MatchMethod::SqDiff, None, &SqDiffBackend::default());
        assert_eq!(heatmap.scale(), 3.0 * 65025.0);
        let best = heatmap.best();
        assert_eq!(best.position, Position::new(5, 5));
        assert_eq!(best.certainty, 1.0);
    }

    #[test]
    fn test_exclude_overlapping_placements() {
        let frame = gray(20, 10, |_, _| 0);
        let template = Template::new(gray(4, 3, |_, _| 0)).unwrap();
        let mut heatmap =
            Heatmap::compute(&template, &frame, MatchMethod::SqDiff, None, &SqDiffBackend::default());
        heatmap.exclude(&Region::new(0, 0, 4, 3));
        assert_eq!(heatmap.best().position, Position::new(4, 0));
        heatmap.exclude(&Region::new(4, 0, 4, 3));
        assert_eq!(heatmap.best().position, Position::new(8, 0));
        // The first three rows fill up; row 3 overlaps nothing found so far
        heatmap.exclude(&Region::new(8, 0, 4, 3));
        heatmap.exclude(&Region::new(12, 0, 4, 3));
        assert_eq!(heatmap.best().position, Position::new(16, 0));
        heatmap.exclude(&Region::new(16, 0, 4, 3));
        assert_eq!(heatmap.best().position, Position::new(0, 3));
    }

    #[test]
    fn test_fully_excluded_heatmap_has_no_match() {
        let frame = gray(6, 4, |_, _| 0);
        let template = Template::new(gray(4, 3, |_, _| 0)).unwrap();
        let mut heatmap =
            Heatmap::compute(&template, &frame, MatchMethod::SqDiff, None, &SqDiffBackend::default());
        assert!(heatmap.best().passes(0.0));
        heatmap.exclude(&Region::new(0, 0, 4, 3));
        heatmap.exclude(&Region::new(2, 1, 4, 3));
        let best = heatmap.best();
        assert!(!best.measured);
        assert_eq!(best.certainty, 0.0);
        // Even a zero threshold can't accept a placement that isn't there
        assert!(!best.passes(0.0));
        assert_eq!(heatmap.to_gray().pixels().filter(|p| p[0] != 0).count(), 0);
    }

    #[test]
    fn test_masked_no_match_certainty_is_negative() {
        let frame = gray(8, 8, |_, _| 0);
        let frame = Image::from_fn(8, 8, Channels::Rgb, |x, y| {
            let v = frame.pixel(x, y)[0];
            [v, v, v, 0]
        });
        let template = Template::new(Image::from_fn(4, 4, Channels::Rgba, |x, _| {
            if x == 0 { [0, 0, 0, 255] } else { [0, 0, 0, 0] }
        }))
        .unwrap();
        let rois = [Region::new(0, 0, 1, 1)];
        let mut heatmap = Heatmap::compute(
            &template,
            &frame,
            MatchMethod::SqDiff,
            Some(&rois),
            &SqDiffBackend::default(),
        );
        heatmap.exclude(&Region::new(0, 0, 4, 4));
        let best = heatmap.best();
        assert!(!best.measured);
        // 48 template values against 12 compared ones
        assert_eq!(best.certainty, -3.0);
    }
}
