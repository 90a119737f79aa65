//! Layout compose: place a drawing on a fixed print canvas and stamp the date.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ab_glyph::{point, Font, FontArc, FontVec, PxScale, ScaleFont};
use chrono::Local;
use image::codecs::jpeg::{JpegEncoder, PixelDensity};
use image::{imageops, DynamicImage, ExtendedColorType, Rgba, RgbaImage, RgbImage};
use tracing::debug;

use super::source::DrawingSource;
use super::{cm_to_px, ensure_parent, Transform};
use crate::batch::WorkItem;
use crate::config::DrawingFormat;
use crate::error::TransformError;

/// Canvas geometry of a composed drawing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutGeometry {
    pub dpi: u32,
    pub width_cm: f32,
    pub height_cm: f32,
    pub margin_top_cm: f32,
    pub margin_bottom_cm: f32,
    pub margin_side_cm: f32,
    pub jpeg_quality: u8,
}

impl LayoutGeometry {
    pub fn for_format(format: DrawingFormat) -> Self {
        let (width_cm, height_cm) = format.canvas_cm();
        Self {
            dpi: 300,
            width_cm,
            height_cm,
            margin_top_cm: 0.5,
            margin_bottom_cm: 1.0,
            margin_side_cm: 0.3,
            jpeg_quality: 97,
        }
    }

    pub fn canvas_px(&self) -> (u32, u32) {
        (
            cm_to_px(self.width_cm, self.dpi),
            cm_to_px(self.height_cm, self.dpi),
        )
    }

    /// Where a `w × h` source lands: `(x, y, width, height)` after scaling
    /// to fit the area inside the margins and centring in it.
    pub fn placement(&self, w: u32, h: u32) -> (u32, u32, u32, u32) {
        let (canvas_w, canvas_h) = self.canvas_px();
        let top = cm_to_px(self.margin_top_cm, self.dpi);
        let bottom = cm_to_px(self.margin_bottom_cm, self.dpi);
        let side = cm_to_px(self.margin_side_cm, self.dpi);

        let avail_w = canvas_w.saturating_sub(2 * side).max(1);
        let avail_h = canvas_h.saturating_sub(top + bottom).max(1);
        let scale = (avail_w as f64 / w.max(1) as f64).min(avail_h as f64 / h.max(1) as f64);
        let new_w = ((w as f64 * scale).round() as u32).clamp(1, avail_w);
        let new_h = ((h as f64 * scale).round() as u32).clamp(1, avail_h);

        let x = side + (avail_w - new_w) / 2;
        let y = top + (avail_h - new_h) / 2;
        (x, y, new_w, new_h)
    }
}

// ── Date stamp ───────────────────────────────────────────────────────────

/// Date label drawn at the lower right of each composed drawing.
#[derive(Clone)]
pub struct DateStamp {
    font: FontArc,
    scale: PxScale,
    label: String,
}

impl std::fmt::Debug for DateStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DateStamp")
            .field("label", &self.label)
            .field("px", &self.scale.y)
            .finish()
    }
}

impl DateStamp {
    /// Pixel size of the stamp text.
    pub const SIZE_PX: f32 = 30.0;

    pub fn new(font: FontArc, label: impl Into<String>) -> Self {
        Self {
            font,
            scale: PxScale::from(Self::SIZE_PX),
            label: label.into(),
        }
    }

    /// Stamp with today's date as `dd.mm.YYYY`.
    pub fn today(font: FontArc) -> Self {
        Self::new(font, Local::now().format("%d.%m.%Y").to_string())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Width and height of the rendered label in pixels.
    pub fn extent(&self) -> (u32, u32) {
        let scaled = self.font.as_scaled(self.scale);
        let width: f32 = self
            .label
            .chars()
            .map(|c| scaled.h_advance(scaled.glyph_id(c)))
            .sum();
        let height = scaled.ascent() - scaled.descent();
        (width.ceil() as u32, height.ceil() as u32)
    }

    /// Draw the label in black with its top-left corner at `(x, y)`.
    pub fn draw(&self, canvas: &mut RgbImage, x: i64, y: i64) {
        let scaled = self.font.as_scaled(self.scale);
        let (width, height) = canvas.dimensions();
        let baseline = y as f32 + scaled.ascent();
        let mut caret = x as f32;

        for c in self.label.chars() {
            let id = scaled.glyph_id(c);
            let glyph = id.with_scale_and_position(self.scale, point(caret, baseline));
            caret += scaled.h_advance(id);
            let Some(outline) = self.font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outline.px_bounds();
            outline.draw(|gx, gy, coverage| {
                let px = bounds.min.x as i64 + gx as i64;
                let py = bounds.min.y as i64 + gy as i64;
                if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                    return;
                }
                let pixel = canvas.get_pixel_mut(px as u32, py as u32);
                let keep = 1.0 - coverage.clamp(0.0, 1.0);
                for channel in pixel.0.iter_mut() {
                    *channel = (*channel as f32 * keep).round() as u8;
                }
            });
        }
    }
}

/// Load a font from `path`, or ask the system for Arial, then any sans-serif.
pub fn load_font(path: Option<&Path>) -> Option<FontArc> {
    if let Some(path) = path {
        let data = std::fs::read(path).ok()?;
        return FontVec::try_from_vec(data).ok().map(FontArc::new);
    }

    let mut db = fontdb::Database::new();
    db.load_system_fonts();
    let id = db
        .query(&fontdb::Query {
            families: &[fontdb::Family::Name("Arial"), fontdb::Family::SansSerif],
            ..fontdb::Query::default()
        })
        .or_else(|| db.faces().next().map(|face| face.id))?;
    db.with_face_data(id, |data, index| {
        FontVec::try_from_vec_and_index(data.to_vec(), index).ok()
    })
    .flatten()
    .map(FontArc::new)
}

// ── Transform ────────────────────────────────────────────────────────────

/// Places a drawing on the page canvas, scaled to fit inside the margins and
/// centred, and stamps the date next to its lower right corner.
#[derive(Debug, Clone)]
pub struct LayoutCompose {
    geometry: LayoutGeometry,
    source: DrawingSource,
    stamp: Option<DateStamp>,
}

impl LayoutCompose {
    /// Right inset of the stamp from the drawing's right edge.
    const STAMP_INSET_X: i64 = 30;
    /// Drop of the stamp below the drawing's bottom edge.
    const STAMP_DROP_Y: i64 = 49;

    pub fn new(geometry: LayoutGeometry, source: DrawingSource, stamp: Option<DateStamp>) -> Self {
        Self {
            geometry,
            source,
            stamp,
        }
    }

    pub fn compose(&self, drawing: &DynamicImage) -> RgbImage {
        let (canvas_w, canvas_h) = self.geometry.canvas_px();
        let (x, y, new_w, new_h) = self.geometry.placement(drawing.width(), drawing.height());

        let resized = imageops::resize(
            &drawing.to_rgba8(),
            new_w,
            new_h,
            imageops::FilterType::Lanczos3,
        );
        let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([255, 255, 255, 255]));
        imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
        let mut canvas = DynamicImage::ImageRgba8(canvas).to_rgb8();

        if let Some(stamp) = &self.stamp {
            let (text_w, text_h) = stamp.extent();
            let text_x = (x + new_w) as i64 - text_w as i64 - Self::STAMP_INSET_X;
            let text_y = (y + new_h) as i64 - text_h as i64 + Self::STAMP_DROP_Y;
            stamp.draw(&mut canvas, text_x, text_y);
        }
        canvas
    }
}

impl Transform for LayoutCompose {
    fn name(&self) -> &'static str {
        "layout-compose"
    }

    fn apply(&self, _item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
        let drawing = self.source.load(input)?;
        if drawing.width() == 0 || drawing.height() == 0 {
            return Err(TransformError::Unsupported("drawing has no pixels".into()));
        }
        let canvas = self.compose(&drawing);

        ensure_parent(output)?;
        let mut writer = BufWriter::new(File::create(output)?);
        let mut encoder = JpegEncoder::new_with_quality(&mut writer, self.geometry.jpeg_quality);
        encoder.set_pixel_density(PixelDensity::dpi(self.geometry.dpi as u16));
        encoder.encode(
            canvas.as_raw(),
            canvas.width(),
            canvas.height(),
            ExtendedColorType::Rgb8,
        )?;
        drop(encoder);
        writer.flush()?;
        debug!("Composed {} → {}", input.display(), output.display());
        Ok(())
    }
}
