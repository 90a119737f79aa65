//! PDF → one JPEG per page, rendered through PDFium.
//!
//! ## Binding
//!
//! PDFium is a shared library loaded at run time. A job checks the binding
//! once up front ([`bind_pdfium`]) so a missing library is one fatal error
//! instead of one failure per document. Each render then binds again on its
//! own worker thread; the `thread_safe` feature of `pdfium-render`
//! serialises the calls into the library.
//!
//! ## Output
//!
//! The stage target is a folder per document. A single-page PDF yields
//! `<stem>.jpg`, a longer one `<stem>_seite1.jpg`, `<stem>_seite2.jpg` ….

use std::path::{Path, PathBuf};

use pdfium_render::prelude::*;
use tracing::debug;

use super::jpeg::{write_jpeg, JPEG_QUALITY};
use super::Transform;
use crate::batch::WorkItem;
use crate::error::TransformError;
use crate::layout::stem_of;
use crate::listing::scan_dir;

/// Load PDFium from `library`, or from the working directory and then the
/// system library paths when no path is given.
pub fn bind_pdfium(library: Option<&Path>) -> Result<Pdfium, TransformError> {
    let bindings = match library {
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| TransformError::Pdfium(format!("{e:?}")))
}

/// File name of page `page` (1-based) of a `page_count`-page document.
pub fn page_file_name(stem: &str, page: usize, page_count: usize) -> String {
    if page_count > 1 {
        format!("{stem}_seite{page}.jpg")
    } else {
        format!("{stem}.jpg")
    }
}

/// Renders every page of a PDF into the item's target folder.
#[derive(Debug, Clone)]
pub struct PdfPages {
    /// Page scale; 1.0 renders at 72 dpi.
    pub zoom: f32,
    pub quality: u8,
    pub library: Option<PathBuf>,
}

impl PdfPages {
    pub fn new(zoom: f32, library: Option<PathBuf>) -> Self {
        Self {
            zoom,
            quality: JPEG_QUALITY,
            library,
        }
    }
}

impl Transform for PdfPages {
    fn name(&self) -> &'static str {
        "pdf-pages"
    }

    fn apply(&self, _item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError> {
        let pdfium = bind_pdfium(self.library.as_deref())?;
        let document = pdfium
            .load_pdf_from_file(input, None)
            .map_err(|e| TransformError::Pdfium(format!("cannot open: {e:?}")))?;
        let pages = document.pages();
        let page_count = pages.len() as usize;
        if page_count == 0 {
            return Err(TransformError::Unsupported("PDF has no pages".into()));
        }

        std::fs::create_dir_all(output)?;
        // Pages of an earlier, longer version of the same document.
        for stale in scan_dir(output, &["jpg"]) {
            std::fs::remove_file(stale)?;
        }

        let stem = stem_of(input);
        let render_config = PdfRenderConfig::new().scale_page_by_factor(self.zoom);
        for (index, page) in pages.iter().enumerate() {
            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| TransformError::Pdfium(format!("page {}: {e:?}", index + 1)))?;
            let rgb = bitmap.as_image().to_rgb8();
            let target = output.join(page_file_name(&stem, index + 1, page_count));
            write_jpeg(&rgb, &target, self.quality)?;
        }
        debug!(
            "Rendered {page_count} page(s) of {} at zoom {}",
            input.display(),
            self.zoom
        );
        Ok(())
    }
}
