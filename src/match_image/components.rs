//! Candidate areas carried from one pyramid level to the next

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use super::region::{Region, merge_regions};

/// Coarse masks smaller than this on either axis are dropped and the finer
/// level searches everywhere.
pub const MIN_ROI_MASK_DIMENSION: u32 = 3;

/// Bounding boxes of the 8-connected non-zero components of `mask`, with any
/// box contained in another removed.
pub fn component_boxes(mask: &GrayImage) -> Vec<Region> {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut extents: Vec<Option<(u32, u32, u32, u32)>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if extents.len() < label {
            extents.resize(label, None);
        }
        let e = &mut extents[label - 1];
        *e = Some(match *e {
            None => (x, y, x, y),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
        });
    }
    let boxes = extents
        .into_iter()
        .flatten()
        .filter_map(|(x0, y0, x1, y1)| {
            Region::from_extents(x0 as i32, y0 as i32, x1 as i32 + 1, y1 as i32 + 1)
        })
        .collect();
    merge_regions(boxes)
}

/// Carry a coarse ROI mask down one pyramid level.
///
/// Each set cell `p` marks fine cells `[2p − 4, 2p]` on both axes, clipped to
/// the `width`×`height` finer heatmap. Returns `None` when the coarse mask is
/// too small to be meaningful.
pub fn upsample_roi_mask(coarse: &GrayImage, width: u32, height: u32) -> Option<GrayImage> {
    if coarse.width() < MIN_ROI_MASK_DIMENSION || coarse.height() < MIN_ROI_MASK_DIMENSION {
        return None;
    }
    let span = |p: u32, limit: u32| -> Option<(u32, u32)> {
        let lo = (2 * p).saturating_sub(4);
        let hi = (2 * p).min(limit.checked_sub(1)?);
        (lo <= hi).then_some((lo, hi))
    };

    let mut fine = GrayImage::new(width, height);
    for (px, py, value) in coarse.enumerate_pixels() {
        if value[0] == 0 {
            continue;
        }
        let (Some((x0, x1)), Some((y0, y1))) = (span(px, width), span(py, height)) else {
            continue;
        };
        for y in y0..=y1 {
            for x in x0..=x1 {
                fine.put_pixel(x, y, Luma([255]));
            }
        }
    }
    Some(fine)
}
