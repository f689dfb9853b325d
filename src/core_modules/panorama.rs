// THEORY:
// The `panorama` module builds the visual artifact stored alongside a flagged frame:
// the three front camera views joined into one strip and shrunk to a thumbnail.
//
// Key architectural principles:
// 1.  **Graceful Degradation**: Imagery is supporting evidence, not a precondition.
//     A missing or undecodable view is skipped in place, which simply makes the strip
//     narrower. Only when no view at all is usable does the stitcher return `None`,
//     and even then the frame's motion edge cases stand on their own.
// 2.  **Fixed Output Geometry**: Every thumbnail is exactly `THUMBNAIL_WIDTH` pixels
//     wide regardless of camera resolution. Height follows from the aspect ratio.
// 3.  **Stable Encoding**: A fixed resize filter and a fixed JPEG quality make output
//     bytes identical across runs for identical input.

use crate::core_modules::frame_sample::CameraPosition;
use crate::core_modules::utils::image_helper::{decode_rgb, encode_jpeg};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::collections::BTreeMap;
use tracing::warn;

pub const THUMBNAIL_WIDTH: u32 = 512;
pub const JPEG_QUALITY: u8 = 75;
const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// A compressed, fixed-width panorama of a frame's front cameras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanoramaThumbnail {
    pub width: u32,
    pub height: u32,
    /// JPEG-encoded image data.
    pub jpeg: Vec<u8>,
}

/// Stitches the available views left to right into a thumbnail. Returns `None` when
/// no view could be decoded.
pub fn stitch(images: &BTreeMap<CameraPosition, Vec<u8>>) -> Option<PanoramaThumbnail> {
    let views: Vec<RgbImage> = CameraPosition::ALL
        .iter()
        .filter_map(|position| {
            let bytes = images.get(position)?;
            match decode_rgb(bytes) {
                Ok(view) if view.width() > 0 && view.height() > 0 => Some(view),
                Ok(_) => {
                    warn!(?position, "skipping empty camera view");
                    None
                }
                Err(e) => {
                    warn!(?position, error = %e, "skipping undecodable camera view");
                    None
                }
            }
        })
        .collect();

    let strip = join_horizontally(&views)?;
    let thumbnail = shrink_to_width(&strip, THUMBNAIL_WIDTH);

    match encode_jpeg(&thumbnail, JPEG_QUALITY) {
        Ok(jpeg) => Some(PanoramaThumbnail {
            width: thumbnail.width(),
            height: thumbnail.height(),
            jpeg,
        }),
        Err(e) => {
            warn!(error = %e, "failed to encode panorama thumbnail");
            None
        }
    }
}

/// Scales every view to the height of the first one and places them side by side.
fn join_horizontally(views: &[RgbImage]) -> Option<RgbImage> {
    let reference_height = views.first()?.height();

    let scaled: Vec<RgbImage> = views
        .iter()
        .map(|view| {
            if view.height() == reference_height {
                view.clone()
            } else {
                let width = scaled_dimension(view.width(), reference_height, view.height());
                imageops::resize(view, width, reference_height, RESIZE_FILTER)
            }
        })
        .collect();

    let total_width: u32 = scaled.iter().map(RgbImage::width).sum();
    let mut strip = RgbImage::new(total_width, reference_height);
    let mut offset = 0i64;
    for view in &scaled {
        imageops::replace(&mut strip, view, offset, 0);
        offset += i64::from(view.width());
    }
    Some(strip)
}

fn shrink_to_width(image: &RgbImage, target_width: u32) -> RgbImage {
    let height = scaled_dimension(image.height(), target_width, image.width());
    imageops::resize(image, target_width, height, RESIZE_FILTER)
}

/// `value * numerator / denominator`, rounded, never below one pixel.
fn scaled_dimension(value: u32, numerator: u32, denominator: u32) -> u32 {
    let denominator = u64::from(denominator.max(1));
    let scaled = (u64::from(value) * u64::from(numerator) + denominator / 2) / denominator;
    scaled.clamp(1, u64::from(u32::MAX)) as u32
}
