//! Border crop: strip uniform background padding.

use std::path::Path;

use image::{imageops, DynamicImage, GenericImageView, ImageFormat, Rgba};

use super::{ensure_parent, Transform};
use crate::batch::WorkItem;
use crate::error::TransformError;

/// Crops an image to the bounding box of its non-background pixels and
/// stores the result as TIFF.
///
/// Background is pure white. Images with an alpha channel additionally treat
/// fully transparent pixels as background, whatever their colour. An image
/// that is all background is stored uncropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct BorderCrop;

impl Transform for BorderCrop {
    fn name(&self) -> &'static str {
        "border-crop"
    }

    fn apply(&self, _item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
        let img = image::open(input)?;
        let cropped = crop_to_content(&img);
        ensure_parent(output)?;
        cropped.save_with_format(output, ImageFormat::Tiff)?;
        Ok(())
    }
}

/// Crop `img` to its content. Alpha is kept when the source has it.
pub fn crop_to_content(img: &DynamicImage) -> DynamicImage {
    let Some((x, y, w, h)) = content_bounds(img) else {
        return normalise(img);
    };
    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        DynamicImage::ImageRgba8(imageops::crop_imm(&rgba, x, y, w, h).to_image())
    } else {
        let rgb = img.to_rgb8();
        DynamicImage::ImageRgb8(imageops::crop_imm(&rgb, x, y, w, h).to_image())
    }
}

/// Bounding box `(x, y, width, height)` of the non-background pixels, or
/// `None` when every pixel is background.
pub fn content_bounds(img: &DynamicImage) -> Option<(u32, u32, u32, u32)> {
    let has_alpha = img.color().has_alpha();
    let (width, height) = img.dimensions();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;

    for (x, y, pixel) in img.pixels() {
        if is_background(pixel, has_alpha) {
            continue;
        }
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    if min_x > max_x || min_y > max_y || width == 0 || height == 0 {
        return None;
    }
    Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
}

fn is_background(Rgba([r, g, b, a]): Rgba<u8>, has_alpha: bool) -> bool {
    (has_alpha && a == 0) || (r == 255 && g == 255 && b == 255 && a == 255)
}

/// TIFF supports 8-bit RGB(A) everywhere; map every other layout onto one.
fn normalise(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}
