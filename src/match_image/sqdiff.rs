//! Sum-of-squared-differences kernels
//!
//! Two implementations compute identical integer sums:
//! - [`PortableKernel`]: plain iterator loop, the reference behaviour
//! - [`UnrolledKernel`]: 16-lane accumulation that the compiler vectorises
//!
//! The kernel is chosen once from [`MatchConfig::sqdiff_kernel`](super::MatchConfig)
//! and used by both the equal-size fast path and the SQDIFF heatmap.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::{EngineResult, MatchError};
use super::raster::Image;
use super::template::Template;

const LANES: usize = 16;
/// Chunks accumulated into u32 lanes before flushing (65025 * 4096 < u32::MAX)
const FLUSH_EVERY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelKind {
    Portable,
    Unrolled,
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KernelKind::Portable => "portable",
            KernelKind::Unrolled => "unrolled",
        })
    }
}

impl FromStr for KernelKind {
    type Err = MatchError;

    fn from_str(s: &str) -> EngineResult<Self> {
        match s {
            "portable" => Ok(KernelKind::Portable),
            "unrolled" => Ok(KernelKind::Unrolled),
            other => Err(MatchError::config(format!(
                "unknown sqdiff kernel '{other}', expected 'portable' or 'unrolled'"
            ))),
        }
    }
}

/// Row-level squared-difference primitives.
pub trait SqDiffKernel {
    /// `Σ (a[i] − b[i])²` over two rows of equal length.
    fn row_sqdiff(&self, a: &[u8], b: &[u8]) -> u64;

    /// Like `row_sqdiff` but only over pixels whose `mask` entry is non-zero.
    /// `a` and `b` hold `channels` values per mask entry.
    fn row_sqdiff_masked(&self, a: &[u8], b: &[u8], mask: &[u8], channels: usize) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PortableKernel;

impl SqDiffKernel for PortableKernel {
    fn row_sqdiff(&self, a: &[u8], b: &[u8]) -> u64 {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| {
                let d = x as i32 - y as i32;
                (d * d) as u64
            })
            .sum()
    }

    fn row_sqdiff_masked(&self, a: &[u8], b: &[u8], mask: &[u8], channels: usize) -> u64 {
        a.chunks_exact(channels)
            .zip(b.chunks_exact(channels))
            .zip(mask)
            .filter(|(_, m)| **m != 0)
            .map(|((pa, pb), _)| self.row_sqdiff(pa, pb))
            .sum()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnrolledKernel;

impl SqDiffKernel for UnrolledKernel {
    fn row_sqdiff(&self, a: &[u8], b: &[u8]) -> u64 {
        let len = a.len().min(b.len());
        let (a, b) = (&a[..len], &b[..len]);
        let mut lanes = [0u32; LANES];
        let mut total = 0u64;
        let mut pending = 0;
        for (ca, cb) in a.chunks_exact(LANES).zip(b.chunks_exact(LANES)) {
            for k in 0..LANES {
                let d = ca[k] as i32 - cb[k] as i32;
                lanes[k] += (d * d) as u32;
            }
            pending += 1;
            if pending == FLUSH_EVERY {
                total += lanes.iter().map(|&v| v as u64).sum::<u64>();
                lanes = [0; LANES];
                pending = 0;
            }
        }
        total += lanes.iter().map(|&v| v as u64).sum::<u64>();
        let tail = len - len % LANES;
        total + PortableKernel.row_sqdiff(&a[tail..], &b[tail..])
    }

    fn row_sqdiff_masked(&self, a: &[u8], b: &[u8], mask: &[u8], channels: usize) -> u64 {
        // Branch-free: multiply each pixel's sum by 0 or 1
        let mut total = 0u64;
        for ((pa, pb), &m) in a
            .chunks_exact(channels)
            .zip(b.chunks_exact(channels))
            .zip(mask)
        {
            let mut px = 0u32;
            for (&x, &y) in pa.iter().zip(pb) {
                let d = x as i32 - y as i32;
                px += (d * d) as u32;
            }
            total += (px * (m != 0) as u32) as u64;
        }
        total
    }
}

/// The kernel selected at startup.
#[derive(Debug, Clone, Copy)]
pub enum SqDiffBackend {
    Portable(PortableKernel),
    Unrolled(UnrolledKernel),
}

impl SqDiffBackend {
    pub fn new(kind: KernelKind) -> Self {
        match kind {
            KernelKind::Portable => SqDiffBackend::Portable(PortableKernel),
            KernelKind::Unrolled => SqDiffBackend::Unrolled(UnrolledKernel),
        }
    }

    pub fn kind(&self) -> KernelKind {
        match self {
            SqDiffBackend::Portable(_) => KernelKind::Portable,
            SqDiffBackend::Unrolled(_) => KernelKind::Unrolled,
        }
    }
}

impl Default for SqDiffBackend {
    fn default() -> Self {
        Self::new(KernelKind::Unrolled)
    }
}

impl SqDiffKernel for SqDiffBackend {
    fn row_sqdiff(&self, a: &[u8], b: &[u8]) -> u64 {
        match self {
            SqDiffBackend::Portable(k) => k.row_sqdiff(a, b),
            SqDiffBackend::Unrolled(k) => k.row_sqdiff(a, b),
        }
    }

    fn row_sqdiff_masked(&self, a: &[u8], b: &[u8], mask: &[u8], channels: usize) -> u64 {
        match self {
            SqDiffBackend::Portable(k) => k.row_sqdiff_masked(a, b, mask, channels),
            SqDiffBackend::Unrolled(k) => k.row_sqdiff_masked(a, b, mask, channels),
        }
    }
}

/// Total squared difference and the number of channel values compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqDiffSum {
    pub total: u64,
    pub count: u64,
}

impl SqDiffSum {
    /// `1 − S/(N·255²)`; a template with nothing to compare is a perfect match.
    pub fn certainty(&self) -> f64 {
        if self.count == 0 {
            1.0
        } else {
            1.0 - self.total as f64 / (self.count as f64 * 255.0 * 255.0)
        }
    }
}

/// Compare a template against an image of exactly the same size.
///
/// Transparent template pixels are excluded from both the sum and the count.
pub fn sqdiff(
    kernel: &impl SqDiffKernel,
    template: &Template,
    frame: &Image,
) -> EngineResult<SqDiffSum> {
    let t = template.image();
    if (t.width(), t.height()) != (frame.width(), frame.height())
        || t.channel_count() != frame.channel_count()
    {
        return Err(MatchError::ChannelMismatch {
            frame: frame.shape(),
            template: template.shape(),
        });
    }
    let channels = t.channel_count() as u64;
    let mut total = 0u64;
    let count = match template.mask() {
        None => {
            for y in 0..t.height() {
                total += kernel.row_sqdiff(t.row(y), frame.row(y));
            }
            t.width() as u64 * t.height() as u64 * channels
        }
        Some(mask) => {
            for y in 0..t.height() {
                total += kernel.row_sqdiff_masked(
                    t.row(y),
                    frame.row(y),
                    mask.row(y),
                    channels as usize,
                );
            }
            mask.count_nonzero() as u64 * channels
        }
    };
    Ok(SqDiffSum { total, count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_image::raster::Channels;

    /// Deterministic pseudo-random bytes (xorshift)
    fn noise(seed: u32, len: usize) -> Vec<u8> {
        let mut s = seed.max(1);
        (0..len)
            .map(|_| {
                s ^= s << 13;
                s ^= s >> 17;
                s ^= s << 5;
                (s >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_identical_images_have_zero_difference() {
        let data = noise(7, 40 * 30 * 3);
        let t = Template::new(Image::from_raw(40, 30, 3, data.clone()).unwrap()).unwrap();
        let f = Image::from_raw(40, 30, 3, data).unwrap();
        let sum = sqdiff(&PortableKernel, &t, &f).unwrap();
        assert_eq!(sum, SqDiffSum { total: 0, count: 40 * 30 * 3 });
        assert_eq!(sum.certainty(), 1.0);
    }

    #[test]
    fn test_black_against_white_is_maximal() {
        let t = Template::new(Image::filled(64, 36, Channels::Rgb, 0)).unwrap();
        let f = Image::filled(64, 36, Channels::Rgb, 255);
        for backend in [SqDiffBackend::new(KernelKind::Portable), SqDiffBackend::new(KernelKind::Unrolled)] {
            let sum = sqdiff(&backend, &t, &f).unwrap();
            assert_eq!(sum.total, 64 * 36 * 3 * 255 * 255);
            assert_eq!(sum.certainty(), 0.0);
        }
    }

    #[test]
    fn test_fully_transparent_template() {
        let t = Template::new(Image::filled(8, 8, Channels::Rgba, 0)).unwrap();
        let f = Image::filled(8, 8, Channels::Rgb, 255);
        let sum = sqdiff(&UnrolledKernel, &t, &f).unwrap();
        assert_eq!(sum, SqDiffSum { total: 0, count: 0 });
        assert_eq!(sum.certainty(), 1.0);
    }

    #[test]
    fn test_kernels_agree() {
        // Odd widths exercise the unrolled tail; the large image exercises lane flushing
        for (seed, w, h) in [(1u32, 1u32, 1u32), (2, 17, 5), (3, 133, 41), (4, 1280, 72)] {
            let len = (w * h) as usize;
            let frame = Image::from_raw(w, h, 3, noise(seed, len * 3)).unwrap();
            let plain = Template::new(Image::from_raw(w, h, 3, noise(seed + 100, len * 3)).unwrap()).unwrap();
            let mut rgba = noise(seed + 200, len * 4);
            for (i, px) in rgba.chunks_exact_mut(4).enumerate() {
                px[3] = if i % 3 == 0 { 255 } else { px[3] & 0x7f };
            }
            let masked = Template::new(Image::from_raw(w, h, 4, rgba).unwrap()).unwrap();

            for t in [&plain, &masked] {
                assert_eq!(
                    sqdiff(&PortableKernel, t, &frame).unwrap(),
                    sqdiff(&UnrolledKernel, t, &frame).unwrap(),
                    "Kernels disagree for {w}x{h} masked={}",
                    t.is_masked()
                );
            }
        }
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let t = Template::new(Image::filled(4, 4, Channels::Rgb, 0)).unwrap();
        let f = Image::filled(5, 4, Channels::Rgb, 0);
        assert!(sqdiff(&PortableKernel, &t, &f).is_err());
    }

    #[test]
    fn test_kernel_kind_parse() {
        assert_eq!("portable".parse::<KernelKind>().unwrap(), KernelKind::Portable);
        assert!("simd".parse::<KernelKind>().is_err());
        assert_eq!(SqDiffBackend::default().kind(), KernelKind::Unrolled);
    }
}
