//! Template merge: overlay a composed drawing and its article label onto the
//! first page of a PDF template.
//!
//! The overlay is a single Form XObject carrying its own resources (the JPEG
//! as a `DCTDecode` image and Helvetica-Bold), so the template's resource
//! names can never clash with ours. The page content is wrapped in `q … Q`
//! before the overlay is painted, which keeps any graphics state the template
//! leaves behind from leaking into the overlay.

use std::path::{Path, PathBuf};

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::{ensure_parent, Transform};
use crate::batch::WorkItem;
use crate::config::DrawingFormat;
use crate::error::TransformError;
use crate::summary::split_article_prefix;

/// A4 in PDF points.
const PAGE_WIDTH_PT: f32 = 595.28;
const PAGE_HEIGHT_PT: f32 = 841.89;

const LABEL_FONT_PT: i64 = 14;
const OVERLAY_NAME: &str = "MzOverlay";

fn cm_to_pt(cm: f32) -> f32 {
    cm * 72.0 / 2.54
}

/// Image rectangle `(x, y, width, height)` in points, origin bottom-left.
pub fn image_rect(format: DrawingFormat) -> (f32, f32, f32, f32) {
    let (w_cm, h_cm) = format.canvas_cm();
    let top_gap = cm_to_pt(4.0);
    match format {
        DrawingFormat::FullPage => {
            let (w, h) = (cm_to_pt(w_cm), cm_to_pt(h_cm));
            ((PAGE_WIDTH_PT - w) / 2.0, PAGE_HEIGHT_PT - h - top_gap, w, h)
        }
        DrawingFormat::HalfPage => {
            let (w, h) = (cm_to_pt(w_cm + 1.5), cm_to_pt(h_cm + 1.0));
            (cm_to_pt(2.0), PAGE_HEIGHT_PT - h - top_gap, w, h)
        }
    }
}

/// Merges a composed JPEG onto a PDF template page.
#[derive(Debug, Clone)]
pub struct TemplateMerge {
    template: PathBuf,
    format: DrawingFormat,
}

impl TemplateMerge {
    pub fn new(template: impl Into<PathBuf>, format: DrawingFormat) -> Self {
        Self {
            template: template.into(),
            format,
        }
    }

    pub fn template(&self) -> &Path {
        &self.template
    }

    /// Label printed above the drawing.
    pub fn label_for(item: &WorkItem) -> String {
        format!("Artikelnummer {}", split_article_prefix(&item.stem()))
    }

    fn overlay_content(&self, label: &str) -> Content {
        let (x, y, w, h) = image_rect(self.format);
        let label_x = cm_to_pt(3.0);
        let label_y = PAGE_HEIGHT_PT - cm_to_pt(3.0);

        Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![w.into(), 0.into(), 0.into(), h.into(), x.into(), y.into()],
                ),
                Operation::new("Do", vec![Object::Name(b"Im1".to_vec())]),
                Operation::new("Q", vec![]),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), LABEL_FONT_PT.into()]),
                Operation::new("Td", vec![label_x.into(), label_y.into()]),
                Operation::new("Tj", vec![Object::string_literal(win_ansi(label))]),
                Operation::new("ET", vec![]),
            ],
        }
    }
}

impl Transform for TemplateMerge {
    fn name(&self) -> &'static str {
        "template-merge"
    }

    fn apply(&self, item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
        if !self.template.is_file() {
            return Err(TransformError::TemplateMissing {
                path: self.template.clone(),
            });
        }

        let mut doc = Document::load(&self.template)?;
        let page_id = doc
            .get_pages()
            .values()
            .next()
            .copied()
            .ok_or_else(|| TransformError::Pdf("template has no pages".into()))?;

        let (px_w, px_h) = image::image_dimensions(input)?;
        let jpeg = std::fs::read(input)?;
        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => px_w as i64,
                "Height" => px_h as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        )
        .with_compression(false);
        let image_id = doc.add_object(image);

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });

        let content = self.overlay_content(&Self::label_for(item)).encode()?;
        let overlay = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![0.into(), 0.into(), PAGE_WIDTH_PT.into(), PAGE_HEIGHT_PT.into()],
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im1" => image_id },
                    "Font" => dictionary! { "F1" => font_id },
                },
            },
            content,
        );
        let overlay_id = doc.add_object(overlay);
        doc.add_xobject(page_id, OVERLAY_NAME.as_bytes(), overlay_id)?;

        let original = doc.get_page_content(page_id).unwrap_or_default();
        let mut merged = Vec::with_capacity(original.len() + 32);
        merged.extend_from_slice(b"q\n");
        merged.extend_from_slice(&original);
        merged.extend_from_slice(format!("\nQ\nq /{OVERLAY_NAME} Do Q\n").as_bytes());
        doc.change_page_content(page_id, merged)?;

        ensure_parent(output)?;
        doc.save(output)?;
        Ok(())
    }
}

/// Map text onto single-byte WinAnsi, replacing what it cannot hold.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// One blank A4 page with a filled rectangle, for tests that need a template.
#[cfg(test)]
pub(crate) fn write_test_template(path: &Path) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let content = Content {
        operations: vec![
            Operation::new("re", vec![40.into(), 40.into(), 100.into(), 20.into()]),
            Operation::new("f", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! {},
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}
