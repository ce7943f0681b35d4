//! Typed 8-bit images with 1, 3 or 4 interleaved channels

use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use super::error::{EngineResult, MatchError};
use super::region::Region;

/// Channel layout of an [`Image`]. Channel order follows the `image` crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channels {
    Luma,
    Rgb,
    Rgba,
}

impl Channels {
    pub fn count(self) -> usize {
        match self {
            Channels::Luma => 1,
            Channels::Rgb => 3,
            Channels::Rgba => 4,
        }
    }

    pub fn from_count(what: &'static str, channels: usize) -> EngineResult<Self> {
        match channels {
            1 => Ok(Channels::Luma),
            3 => Ok(Channels::Rgb),
            4 => Ok(Channels::Rgba),
            _ => Err(MatchError::UnsupportedChannels { what, channels }),
        }
    }
}

/// A caller-owned 2-D grid of 8-bit pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    width: u32,
    height: u32,
    channels: Channels,
    data: Vec<u8>,
}

impl Image {
    /// Wrap an interleaved pixel buffer, checking the channel count and length.
    pub fn from_raw(width: u32, height: u32, channels: usize, data: Vec<u8>) -> EngineResult<Self> {
        let layout = Channels::from_count("image", channels)?;
        if data.len() != width as usize * height as usize * channels {
            return Err(MatchError::BufferSizeMismatch {
                width,
                height,
                channels,
                len: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            channels: layout,
            data,
        })
    }

    /// Wrap a buffer whose length the caller has already computed from the shape.
    pub(crate) fn from_parts(width: u32, height: u32, channels: Channels, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * channels.count());
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// An image where every channel of every pixel is `value`.
    pub fn filled(width: u32, height: u32, channels: Channels, value: u8) -> Self {
        Self {
            width,
            height,
            channels,
            data: vec![value; width as usize * height as usize * channels.count()],
        }
    }

    /// Build an image from a per-pixel function returning one value per channel.
    pub fn from_fn(
        width: u32,
        height: u32,
        channels: Channels,
        mut f: impl FnMut(u32, u32) -> [u8; 4],
    ) -> Self {
        let n = channels.count();
        let mut data = Vec::with_capacity(width as usize * height as usize * n);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y)[..n]);
            }
        }
        Self {
            width,
            height,
            channels,
            data,
        }
    }

    /// Convert a decoded image, reducing anything wider than 8 bits per channel.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(img) => img.into(),
            DynamicImage::ImageRgb8(img) => img.into(),
            DynamicImage::ImageRgba8(img) => img.into(),
            DynamicImage::ImageLumaA8(_) | DynamicImage::ImageLumaA16(_) => image.to_rgba8().into(),
            DynamicImage::ImageLuma16(_) => image.to_luma8().into(),
            img if img.color().has_alpha() => img.to_rgba8().into(),
            img => img.to_rgb8().into(),
        }
    }

    /// Load an image from disk.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let decoded = image::open(path).map_err(|source| MatchError::ImageLoad {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_dynamic(decoded))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> Channels {
        self.channels
    }

    pub fn channel_count(&self) -> usize {
        self.channels.count()
    }

    /// `(width, height, channels)`, used in error messages.
    pub fn shape(&self) -> (u32, u32, usize) {
        (self.width, self.height, self.channel_count())
    }

    pub fn as_raw(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// The region covering the whole image.
    pub fn region(&self) -> Option<Region> {
        (!self.is_empty()).then(|| Region::of_size(self.width, self.height))
    }

    pub(crate) fn row_len(&self) -> usize {
        self.width as usize * self.channel_count()
    }

    pub(crate) fn row(&self, y: u32) -> &[u8] {
        let len = self.row_len();
        let start = y as usize * len;
        &self.data[start..start + len]
    }

    pub(crate) fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let n = self.channel_count();
        let start = (y as usize * self.width as usize + x as usize) * n;
        &self.data[start..start + n]
    }

    /// Copy out a sub-image. The region must lie within the image.
    pub fn crop(&self, region: &Region) -> EngineResult<Image> {
        let inside = self.region().is_some_and(|full| full.contains(region));
        if !inside {
            return Err(MatchError::RegionOutsideFrame {
                width: self.width,
                height: self.height,
                region: region.to_string(),
            });
        }
        Ok(self.crop_clipped(region))
    }

    /// Copy out the part of `region` that lies within the image; empty when
    /// they don't overlap.
    pub(crate) fn crop_clipped(&self, region: &Region) -> Image {
        let Some(region) = self.region().and_then(|full| full.intersect(region)) else {
            return Image::from_parts(0, 0, self.channels, Vec::new());
        };
        let n = self.channel_count();
        let (x0, w) = (region.x as usize, region.width() as usize);
        let mut data = Vec::with_capacity(w * region.height() as usize * n);
        for y in region.y..region.bottom {
            let row = self.row(y as u32);
            data.extend_from_slice(&row[x0 * n..(x0 + w) * n]);
        }
        Image::from_parts(region.width(), region.height(), self.channels, data)
    }

    /// Split an RGBA image into its colour planes and its alpha plane.
    pub(crate) fn split_alpha(&self) -> Option<(Image, Image)> {
        if self.channels != Channels::Rgba {
            return None;
        }
        let pixels = self.width as usize * self.height as usize;
        let mut color = Vec::with_capacity(pixels * 3);
        let mut alpha = Vec::with_capacity(pixels);
        for px in self.data.chunks_exact(4) {
            color.extend_from_slice(&px[..3]);
            alpha.push(px[3]);
        }
        Some((
            Image {
                width: self.width,
                height: self.height,
                channels: Channels::Rgb,
                data: color,
            },
            Image {
                width: self.width,
                height: self.height,
                channels: Channels::Luma,
                data: alpha,
            },
        ))
    }

    /// Single-channel luminance copy; a Luma image is returned as-is.
    pub fn to_luma(&self) -> GrayImage {
        match self.to_dynamic() {
            DynamicImage::ImageLuma8(img) => img,
            other => other.to_luma8(),
        }
    }

    pub fn to_dynamic(&self) -> DynamicImage {
        let (w, h, data) = (self.width, self.height, self.data.clone());
        // Lengths are checked on construction so these cannot fail
        match self.channels {
            Channels::Luma => GrayImage::from_raw(w, h, data).map(DynamicImage::ImageLuma8),
            Channels::Rgb => RgbImage::from_raw(w, h, data).map(DynamicImage::ImageRgb8),
            Channels::Rgba => RgbaImage::from_raw(w, h, data).map(DynamicImage::ImageRgba8),
        }
        .unwrap_or_else(|| DynamicImage::new_luma8(0, 0))
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Image({}x{}x{})",
            self.width,
            self.height,
            self.channel_count()
        )
    }
}

impl From<GrayImage> for Image {
    fn from(img: GrayImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            channels: Channels::Luma,
            data: img.into_raw(),
        }
    }
}

impl From<RgbImage> for Image {
    fn from(img: RgbImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            channels: Channels::Rgb,
            data: img.into_raw(),
        }
    }
}

impl From<RgbaImage> for Image {
    fn from(img: RgbaImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            channels: Channels::Rgba,
            data: img.into_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_from_raw_validates_channels() {
        let err = Image::from_raw(2, 2, 2, vec![0; 8]).unwrap_err();
        assert!(matches!(err, MatchError::UnsupportedChannels { channels: 2, .. }));
        assert!(err.is_shape_error());
    }

    #[test]
    fn test_from_raw_validates_length() {
        let err = Image::from_raw(4, 4, 3, vec![0; 47]).unwrap_err();
        assert!(matches!(err, MatchError::BufferSizeMismatch { len: 47, .. }));
    }

    #[test]
    fn test_crop_copies_region() {
        let img: Image = RgbImage::from_fn(10, 8, |x, y| Rgb([x as u8, y as u8, 7])).into();
        let crop = img.crop(&Region::new(3, 2, 4, 5)).unwrap();
        assert_eq!(crop.shape(), (4, 5, 3));
        assert_eq!(crop.pixel(0, 0), &[3, 2, 7]);
        assert_eq!(crop.pixel(3, 4), &[6, 6, 7]);
    }

    #[test]
    fn test_crop_outside_is_rejected() {
        let img = Image::filled(10, 10, Channels::Luma, 0);
        assert!(img.crop(&Region::new(5, 5, 6, 1)).is_err());
        assert!(img.crop(&Region::new(-1, 0, 2, 2)).is_err());
    }

    #[test]
    fn test_crop_clipped_keeps_overlap() {
        let img = Image::from_fn(10, 10, Channels::Luma, |x, y| [(x + 10 * y) as u8, 0, 0, 0]);
        let crop = img.crop_clipped(&Region::new(8, -2, 5, 4));
        assert_eq!(crop.shape(), (2, 2, 1));
        assert_eq!(crop.as_raw(), &[8, 9, 18, 19]);
        assert!(img.crop_clipped(&Region::new(20, 20, 3, 3)).is_empty());
    }

    #[test]
    fn test_split_alpha() {
        let img = Image::from_fn(3, 1, Channels::Rgba, |x, _| [1, 2, 3, x as u8 * 100]);
        let (color, alpha) = img.split_alpha().unwrap();
        assert_eq!(color.as_raw(), &[1, 2, 3, 1, 2, 3, 1, 2, 3]);
        assert_eq!(alpha.as_raw(), &[0, 100, 200]);
        assert!(color.split_alpha().is_none());
    }

    #[test]
    fn test_dynamic_round_trip_keeps_layout() {
        let img = Image::from_fn(4, 3, Channels::Rgb, |x, y| [x as u8, y as u8, 9, 0]);
        let back = Image::from_dynamic(img.to_dynamic());
        assert_eq!(back, img);

        let gray = Image::filled(5, 5, Channels::Luma, 42);
        assert_eq!(gray.to_luma().as_raw(), gray.as_raw());
    }
}
