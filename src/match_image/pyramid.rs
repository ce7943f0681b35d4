//! Image pyramids: level 0 is the original, each further level half the size
//!
//! Templates and masks lose a 1-pixel border after every downsample so that
//! their blurred edges don't get compared against frame pixels, which carry
//! real neighbours. A template position `p` on level k+1 therefore maps to
//! `2·(p − 1)` on level k.

use log::trace;

use super::raster::Image;
use super::region::{Position, Region};
use super::template::{BinaryMask, Template};

/// Pyramids stop before any axis of a level drops below this.
pub const MIN_PYRAMID_DIMENSION: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PyramidRole {
    Template,
    Mask,
    Frame,
}

impl PyramidRole {
    fn strips_border(self) -> bool {
        matches!(self, PyramidRole::Template | PyramidRole::Mask)
    }
}

/// Build up to `max_levels` levels of `image`.
///
/// The result always holds at least the original. Masks are re-binarized
/// after each downsample and stop growing once a level would be empty.
pub fn build_pyramid(image: &Image, max_levels: usize, role: PyramidRole) -> Vec<Image> {
    let mut levels = vec![image.clone()];
    while levels.len() < max_levels {
        let Some(last) = levels.last() else { break };
        let Some(next) = next_level(last, role) else {
            break;
        };
        levels.push(next);
    }
    trace!("Built {:?} pyramid with {} levels", role, levels.len());
    levels
}

fn next_level(image: &Image, role: PyramidRole) -> Option<Image> {
    let border = if role.strips_border() { 2 } else { 0 };
    let width = image.width().div_ceil(2).checked_sub(border)?;
    let height = image.height().div_ceil(2).checked_sub(border)?;
    if width < MIN_PYRAMID_DIMENSION || height < MIN_PYRAMID_DIMENSION {
        return None;
    }

    let mut next = downsample(image);
    if role.strips_border() {
        next = next.crop(&Region::new(1, 1, width, height)).ok()?;
    }
    if role == PyramidRole::Mask {
        let mask = BinaryMask::threshold(&next, 254);
        if mask.is_empty() {
            return None;
        }
        next = mask.as_image().clone();
    }
    Some(next)
}

/// 2× box filter with rounding; odd edges replicate the last row or column.
pub fn downsample(image: &Image) -> Image {
    let (w, h) = (image.width(), image.height());
    let (ow, oh) = (w.div_ceil(2), h.div_ceil(2));
    let n = image.channel_count();
    let mut data = Vec::with_capacity(ow as usize * oh as usize * n);
    for oy in 0..oh {
        let top = image.row(2 * oy);
        let bottom = image.row((2 * oy + 1).min(h - 1));
        for ox in 0..ow {
            let x0 = 2 * ox as usize * n;
            let x1 = (2 * ox + 1).min(w - 1) as usize * n;
            for c in 0..n {
                let sum = top[x0 + c] as u32
                    + top[x1 + c] as u32
                    + bottom[x0 + c] as u32
                    + bottom[x1 + c] as u32;
                data.push(((sum + 2) / 4) as u8);
            }
        }
    }
    Image::from_parts(ow, oh, image.channels(), data)
}

/// Template, mask and frame pyramids of equal length.
#[derive(Debug, Clone)]
pub struct Pyramids {
    /// Per level: the template planes with that level's mask, if any.
    pub templates: Vec<Template>,
    pub frames: Vec<Image>,
}

impl Pyramids {
    pub fn build(template: &Template, frame: &Image, max_levels: usize) -> Self {
        let images = build_pyramid(template.image(), max_levels, PyramidRole::Template);
        let masks = template
            .mask()
            .map(|m| build_pyramid(m.as_image(), images.len(), PyramidRole::Mask));
        let len = masks.as_ref().map_or(images.len(), |m| m.len().min(images.len()));
        let frames = build_pyramid(frame, len, PyramidRole::Frame);
        let len = len.min(frames.len());

        let templates = match masks {
            None => images.into_iter().take(len).map(Template::Opaque).collect(),
            Some(masks) => images
                .into_iter()
                .zip(masks)
                .take(len)
                .map(|(img, mask)| Template::Masked(img, BinaryMask::threshold(&mask, 254)))
                .collect(),
        };
        Self {
            templates,
            frames: frames.into_iter().take(len).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Map a position found on a coarser level to level `level - levels`.
pub fn upsample_position(position: Position, levels: usize) -> Position {
    (0..levels).fold(position, |p, _| {
        Position::new((2 * (p.x - 1)).max(0), (2 * (p.y - 1)).max(0))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_image::raster::Channels;

    #[test]
    fn test_downsample_rounds_and_replicates_edges() {
        let img = Image::from_raw(3, 3, 1, vec![0, 1, 10, 2, 3, 20, 100, 101, 255]).unwrap();
        let small = downsample(&img);
        assert_eq!(small.shape(), (2, 2, 1));
        // (0+1+2+3+2)/4, (10+10+20+20+2)/4, (100+101+100+101+2)/4, 255
        assert_eq!(small.as_raw(), &[2, 15, 101, 255]);
    }

    #[test]
    fn test_downsample_keeps_channels_separate() {
        let img = Image::from_fn(4, 2, Channels::Rgb, |x, _| [x as u8 * 10, 200, 0, 0]);
        let small = downsample(&img);
        assert_eq!(small.shape(), (2, 1, 3));
        assert_eq!(small.pixel(0, 0), &[5, 200, 0]);
        assert_eq!(small.pixel(1, 0), &[25, 200, 0]);
    }

    #[test]
    fn test_template_pyramid_strips_border() {
        let t = Image::filled(135, 44, Channels::Rgb, 0);
        let levels = build_pyramid(&t, 3, PyramidRole::Template);
        let shapes: Vec<_> = levels.iter().map(|l| (l.width(), l.height())).collect();
        assert_eq!(shapes, vec![(135, 44), (66, 20)]);
    }

    #[test]
    fn test_small_template_has_one_level() {
        let t = Image::filled(16, 16, Channels::Luma, 0);
        assert_eq!(build_pyramid(&t, 3, PyramidRole::Template).len(), 1);
    }

    #[test]
    fn test_frame_pyramid_halves() {
        let f = Image::filled(1280, 720, Channels::Rgb, 255);
        let levels = build_pyramid(&f, 3, PyramidRole::Frame);
        let shapes: Vec<_> = levels.iter().map(|l| (l.width(), l.height())).collect();
        assert_eq!(shapes, vec![(1280, 720), (640, 360), (320, 180)]);
    }

    #[test]
    fn test_mask_pyramid_stops_when_empty() {
        // A thin opaque line blurs away and re-binarizes to nothing
        let alpha = Image::from_fn(100, 100, Channels::Luma, |_, y| {
            [if y == 50 { 255 } else { 0 }, 0, 0, 0]
        });
        assert_eq!(build_pyramid(&alpha, 3, PyramidRole::Mask).len(), 1);

        let solid = Image::filled(100, 100, Channels::Luma, 255);
        let levels = build_pyramid(&solid, 3, PyramidRole::Mask);
        assert_eq!(levels.len(), 3);
        assert!(levels[2].as_raw().iter().all(|&v| v == 255));
    }

    #[test]
    fn test_pyramids_have_equal_length() {
        let mut rgba = Image::filled(100, 100, Channels::Rgba, 255).into_raw();
        // Opaque only in a thin row, so the mask pyramid is the short one
        for (i, px) in rgba.chunks_exact_mut(4).enumerate() {
            px[3] = if i / 100 == 50 { 255 } else { 0 };
        }
        let template = Template::new(Image::from_raw(100, 100, 4, rgba).unwrap()).unwrap();
        let frame = Image::filled(400, 400, Channels::Rgb, 0);
        let p = Pyramids::build(&template, &frame, 3);
        assert_eq!(p.len(), 1);
        assert_eq!(p.frames.len(), 1);

        let opaque = Template::new(Image::filled(100, 100, Channels::Rgb, 0)).unwrap();
        let p = Pyramids::build(&opaque, &frame, 3);
        assert_eq!(p.len(), 3);
        assert_eq!(p.frames[2].shape(), (100, 100, 3));
        assert_eq!(p.templates[2].shape(), (22, 22, 3));
    }

    #[test]
    fn test_upsample_position() {
        assert_eq!(upsample_position(Position::new(15, 1), 0), Position::new(15, 1));
        assert_eq!(upsample_position(Position::new(15, 1), 1), Position::new(28, 0));
        assert_eq!(upsample_position(Position::new(8, 3), 2), Position::new(26, 6));
    }
}
