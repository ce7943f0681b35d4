//! Second pass: a pixel-accurate check of a single candidate

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::erode;
use log::debug;

use super::config::{ConfirmMethod, MatchParameters};
use super::diagnostics::Stage;
use super::raster::Image;
use super::region::Region;
use super::template::Template;

/// Check `template` against `frame` at exactly `region`.
///
/// Returns true when no differing pixels survive erosion, or when the
/// confirm method is `None`.
pub(crate) fn confirm_match(
    frame: &Image,
    region: &Region,
    template: &Template,
    params: &MatchParameters,
    stage: Stage<'_>,
) -> bool {
    if params.confirm_method == ConfirmMethod::None {
        return true;
    }

    // Candidate regions always lie inside the searched area
    let crop = frame.crop_clipped(region);
    stage.image("confirm-source_roi", &crop);
    let mut source = crop.to_luma();
    let mut reference = template.image().to_luma();
    let mask = template.mask().map(|m| m.as_image().to_luma());
    stage.gray("confirm-source_roi_gray", || source.clone());
    stage.gray("confirm-template_gray", || reference.clone());

    if params.confirm_method == ConfirmMethod::NormedAbsDiff {
        stretch_contrast(&mut source, mask.as_ref());
        stretch_contrast(&mut reference, mask.as_ref());
        stage.gray("confirm-source_roi_gray_normalized", || source.clone());
        stage.gray("confirm-template_gray_normalized", || reference.clone());
    }

    if let Some(mask) = &mask {
        apply_mask(&mut source, mask);
        apply_mask(&mut reference, mask);
        stage.gray("confirm-source_roi_masked", || source.clone());
        stage.gray("confirm-template_masked", || reference.clone());
    }

    let level = ((1.0 - params.confirm_threshold) * 255.0) as i32;
    let absdiff = GrayImage::from_fn(source.width(), source.height(), |x, y| {
        Luma([source.get_pixel(x, y)[0].abs_diff(reference.get_pixel(x, y)[0])])
    });
    let differing = GrayImage::from_fn(absdiff.width(), absdiff.height(), |x, y| {
        Luma([if absdiff.get_pixel(x, y)[0] as i32 > level { 255 } else { 0 }])
    });
    let eroded = erode(&differing, Norm::L1, params.erode_passes.min(255) as u8);
    stage.gray("confirm-absdiff", || absdiff.clone());
    stage.gray("confirm-absdiff_threshold", || differing.clone());
    stage.gray("confirm-absdiff_threshold_erode", || eroded.clone());

    let remaining = eroded.pixels().filter(|p| p[0] != 0).count();
    debug!(
        "Confirm {} at {}: {} differing pixels after {} erode passes",
        params.confirm_method, region, remaining, params.erode_passes
    );
    remaining == 0
}

/// Rescale to fill `[0, 255]` using the range of the masked-in pixels.
/// A flat image becomes all zeros.
fn stretch_contrast(image: &mut GrayImage, mask: Option<&GrayImage>) {
    let selected = |x: u32, y: u32| mask.is_none_or(|m| m.get_pixel(x, y)[0] != 0);
    let range = image
        .enumerate_pixels()
        .filter(|(x, y, _)| selected(*x, *y))
        .fold(None, |acc: Option<(u8, u8)>, (_, _, p)| {
            let v = p[0];
            Some(acc.map_or((v, v), |(lo, hi)| (lo.min(v), hi.max(v))))
        });
    let Some((lo, hi)) = range else { return };
    let scale = if hi > lo { 255.0 / (hi - lo) as f64 } else { 0.0 };
    for (x, y, p) in image.enumerate_pixels_mut() {
        if selected(x, y) {
            p[0] = ((p[0] - lo) as f64 * scale).round() as u8;
        }
    }
}

fn apply_mask(image: &mut GrayImage, mask: &GrayImage) {
    for (p, m) in image.pixels_mut().zip(mask.pixels()) {
        p[0] &= m[0];
    }
}
