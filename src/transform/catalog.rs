//! Catalog render: fixed-size grayscale thumbnail for the print catalog.

use std::path::Path;

use image::{imageops, DynamicImage, GrayImage, ImageFormat, Luma};

use super::{cm_to_px, ensure_parent, Transform};
use crate::batch::WorkItem;
use crate::error::TransformError;

/// Print resolution of catalog images.
pub const CATALOG_DPI: u32 = 300;
/// Edge of the square catalog cell.
pub const CATALOG_CELL_CM: f32 = 3.49;
/// Width landscape images are scaled to, leaving a margin inside the cell.
pub const CATALOG_NARROW_CM: f32 = 3.2;

/// Flattens an image over white, converts it to 8-bit grayscale and places
/// it on a white canvas sized for the catalog cell.
///
/// * portrait (taller than wide): scaled to the cell height, centred
///   horizontally on a square canvas
/// * landscape or square: scaled to the narrow width, centred horizontally on
///   a canvas as wide as the cell and as tall as the scaled image
#[derive(Debug, Clone, Copy)]
pub struct CatalogRender {
    cell_px: u32,
    narrow_px: u32,
}

impl Default for CatalogRender {
    fn default() -> Self {
        Self {
            cell_px: cm_to_px(CATALOG_CELL_CM, CATALOG_DPI),
            narrow_px: cm_to_px(CATALOG_NARROW_CM, CATALOG_DPI),
        }
    }
}

impl CatalogRender {
    pub fn with_sizes(cell_px: u32, narrow_px: u32) -> Self {
        Self {
            cell_px: cell_px.max(1),
            narrow_px: narrow_px.clamp(1, cell_px.max(1)),
        }
    }

    pub fn render(&self, img: &DynamicImage) -> GrayImage {
        let gray = flatten_to_gray(img);
        let (w, h) = gray.dimensions();
        let cell = self.cell_px;

        if h > w {
            let new_h = cell;
            let new_w = ((cell as f64 / h as f64) * w as f64).round() as u32;
            let new_w = new_w.clamp(1, cell);
            let resized = imageops::resize(&gray, new_w, new_h, imageops::FilterType::Lanczos3);
            let mut canvas = GrayImage::from_pixel(cell, cell, Luma([255]));
            imageops::overlay(&mut canvas, &resized, ((cell - new_w) / 2) as i64, 0);
            canvas
        } else {
            let new_w = self.narrow_px;
            let new_h = ((new_w as f64 / w.max(1) as f64) * h as f64).round() as u32;
            let new_h = new_h.max(1);
            let resized = imageops::resize(&gray, new_w, new_h, imageops::FilterType::Lanczos3);
            let mut canvas = GrayImage::from_pixel(cell, new_h, Luma([255]));
            imageops::overlay(&mut canvas, &resized, ((cell - new_w) / 2) as i64, 0);
            canvas
        }
    }
}

impl Transform for CatalogRender {
    fn name(&self) -> &'static str {
        "catalog-render"
    }

    fn apply(&self, _item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
        let img = image::open(input)?;
        if img.width() == 0 || img.height() == 0 {
            return Err(TransformError::Unsupported("image has no pixels".into()));
        }
        let rendered = self.render(&img);
        ensure_parent(output)?;
        DynamicImage::ImageLuma8(rendered).save_with_format(output, ImageFormat::Jpeg)?;
        Ok(())
    }
}

/// Composite over white and reduce to luma (ITU-R 601-2 weights).
fn flatten_to_gray(img: &DynamicImage) -> GrayImage {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let over_white = |c: u8| c as f32 * alpha + 255.0 * (1.0 - alpha);
        let luma = 0.299 * over_white(r) + 0.587 * over_white(g) + 0.114 * over_white(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn default_sizes_at_300_dpi() {
        let r = CatalogRender::default();
        assert_eq!(r.cell_px, 412);
        assert_eq!(r.narrow_px, 377);
    }

    #[test]
    fn portrait_fills_square_cell() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(100, 200, Rgba([0, 0, 0, 255])));
        let out = CatalogRender::default().render(&img);
        assert_eq!(out.dimensions(), (412, 412));
        // Scaled width is 206, centred: left margin stays white.
        assert_eq!(out.get_pixel(50, 200).0, [255]);
        assert!(out.get_pixel(206, 200).0[0] < 10);
    }

    #[test]
    fn landscape_uses_narrow_width() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 100, Rgba([0, 0, 0, 255])));
        let out = CatalogRender::default().render(&img);
        assert_eq!(out.width(), 412);
        assert_eq!(out.height(), 94);
        assert_eq!(out.get_pixel(5, 40).0, [255]);
    }

    #[test]
    fn transparency_becomes_white() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0])));
        let gray = flatten_to_gray(&img);
        assert!(gray.pixels().all(|p| p.0 == [255]));
    }

    #[test]
    fn writes_grayscale_jpeg() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a.tif");
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(30, 60, Rgba([10, 120, 200, 255])))
            .save_with_format(&src, ImageFormat::Tiff)
            .unwrap();
        let out = tmp.path().join("katalog").join("a.jpg");
        let item = WorkItem::new(0, src.clone(), vec![out.clone()]);
        CatalogRender::default().apply(&item, &src, &out).unwrap();

        let written = image::open(&out).unwrap();
        assert_eq!(written.dimensions(), (412, 412));
        assert_eq!(written.color(), image::ColorType::L8);
    }
}
