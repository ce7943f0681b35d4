//! Reference images and their transparency masks

use std::path::Path;

use super::error::{EngineResult, MatchError};
use super::raster::{Channels, Image};

/// Single-channel mask where 255 marks pixels that take part in matching and 0
/// marks transparent pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask(Image);

impl BinaryMask {
    /// Normalise an alpha plane: only fully opaque (255) pixels survive.
    pub fn from_alpha(alpha: &Image) -> Self {
        Self::threshold(alpha, 254)
    }

    /// Pixels strictly above `level` become 255, everything else 0.
    pub(crate) fn threshold(plane: &Image, level: u8) -> Self {
        let data = plane
            .as_raw()
            .iter()
            .map(|&v| if v > level { 255 } else { 0 })
            .collect();
        Self(Image::from_parts(plane.width(), plane.height(), Channels::Luma, data))
    }

    pub fn as_image(&self) -> &Image {
        &self.0
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn count_nonzero(&self) -> usize {
        self.0.as_raw().iter().filter(|&&v| v != 0).count()
    }

    /// True when every pixel is transparent.
    pub fn is_empty(&self) -> bool {
        self.0.as_raw().iter().all(|&v| v == 0)
    }

    pub(crate) fn row(&self, y: u32) -> &[u8] {
        self.0.row(y)
    }
}

/// The image being searched for.
///
/// A template with an alpha channel becomes `Masked`: its colour planes plus a
/// [`BinaryMask`]. Transparent pixels are ignored by both matching passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    Opaque(Image),
    Masked(Image, BinaryMask),
}

impl Template {
    pub fn new(image: Image) -> EngineResult<Self> {
        if image.is_empty() {
            return Err(MatchError::EmptyTemplate {
                width: image.width(),
                height: image.height(),
            });
        }
        match image.split_alpha() {
            Some((color, alpha)) => {
                let mask = BinaryMask::from_alpha(&alpha);
                Ok(Template::Masked(color, mask))
            }
            None => Ok(Template::Opaque(image)),
        }
    }

    /// Load a reference image from disk. PNGs with an alpha channel become masked templates.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        Self::new(Image::open(path)?)
    }

    /// The colour (or grayscale) planes, without any alpha.
    pub fn image(&self) -> &Image {
        match self {
            Template::Opaque(img) | Template::Masked(img, _) => img,
        }
    }

    pub fn mask(&self) -> Option<&BinaryMask> {
        match self {
            Template::Opaque(_) => None,
            Template::Masked(_, mask) => Some(mask),
        }
    }

    pub fn is_masked(&self) -> bool {
        matches!(self, Template::Masked(..))
    }

    pub fn width(&self) -> u32 {
        self.image().width()
    }

    pub fn height(&self) -> u32 {
        self.image().height()
    }

    /// Channel count as supplied by the caller (4 for a masked template).
    pub fn source_channels(&self) -> usize {
        match self {
            Template::Opaque(img) => img.channel_count(),
            Template::Masked(img, _) => img.channel_count() + 1,
        }
    }

    /// `(width, height, channels)` as supplied by the caller.
    pub fn shape(&self) -> (u32, u32, usize) {
        (self.width(), self.height(), self.source_channels())
    }
}

impl TryFrom<Image> for Template {
    type Error = MatchError;

    fn try_from(image: Image) -> EngineResult<Self> {
        Template::new(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_template() {
        let t = Template::new(Image::filled(5, 4, Channels::Rgb, 10)).unwrap();
        assert!(!t.is_masked());
        assert_eq!(t.shape(), (5, 4, 3));
        assert!(t.mask().is_none());
    }

    #[test]
    fn test_alpha_becomes_binary_mask() {
        let img = Image::from_fn(4, 1, Channels::Rgba, |x, _| {
            [0, 0, 0, [0, 128, 254, 255][x as usize]]
        });
        let t = Template::new(img).unwrap();
        assert!(t.is_masked());
        assert_eq!(t.shape(), (4, 1, 4));
        assert_eq!(t.image().channels(), Channels::Rgb);
        let mask = t.mask().unwrap();
        assert_eq!(mask.as_image().as_raw(), &[0, 0, 0, 255], "Only 255 is opaque");
        assert_eq!(mask.count_nonzero(), 1);
    }

    #[test]
    fn test_empty_template_rejected() {
        let err = Template::new(Image::filled(0, 5, Channels::Rgb, 0)).unwrap_err();
        assert!(matches!(err, MatchError::EmptyTemplate { width: 0, height: 5 }));
    }

    #[test]
    fn test_fully_transparent_mask_is_empty() {
        let t = Template::new(Image::filled(3, 3, Channels::Rgba, 0)).unwrap();
        assert!(t.mask().unwrap().is_empty());
    }
}
