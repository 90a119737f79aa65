//! Leaf transforms: one input file in, one output file out.
//!
//! ```text
//! images    border-crop ─────► catalog-render
//!           (any → .tif)       (.tif → grayscale .jpg)
//!
//! drawings  layout-compose ──► template-merge
//!           (eps/jpg → .jpg)   (.jpg → .pdf)
//!
//! cad       zip-single
//!           (any → .zip)
//!
//! to-jpg    jpeg-convert
//!           (tif/bmp/png → .jpg)
//!
//! pdf       pdf-pages
//!           (.pdf → folder of page .jpg)
//!
//! download  download
//!           (url → file)
//! ```
//!
//! Transforms are stateless with respect to items: the batch runner invokes
//! the same instance concurrently on disjoint items from pool threads, so
//! every implementation is `Send + Sync` and writes only to its `output`.

pub mod archive;
pub mod catalog;
pub mod compose;
pub mod crop;
pub mod fetch;
pub mod jpeg;
pub mod pdf;
pub mod source;
pub mod template;

use std::path::Path;

use crate::batch::WorkItem;
use crate::error::TransformError;

pub use archive::ZipSingle;
pub use catalog::CatalogRender;
pub use compose::{DateStamp, LayoutCompose, LayoutGeometry};
pub use crop::BorderCrop;
pub use fetch::HttpFetch;
pub use jpeg::JpegConvert;
pub use pdf::PdfPages;
pub use source::{DrawingSource, Ghostscript};
pub use template::TemplateMerge;

/// A per-file transformation run by one pipeline stage.
pub trait Transform: Send + Sync {
    /// Short stage name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Read `input`, write `output`. `item` carries the names a transform may
    /// need for labels (article number, original file name).
    fn apply(&self, item: &WorkItem, input: &Path, output: &Path) -> Result<(), TransformError>;
}

/// Create the parent directory of `output` if it is missing.
pub(crate) fn ensure_parent(output: &Path) -> Result<(), TransformError> {
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Centimetres to pixels at `dpi`, truncated like a print driver does.
pub fn cm_to_px(cm: f32, dpi: u32) -> u32 {
    (cm / 2.54 * dpi as f32) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cm_to_px_at_300_dpi() {
        assert_eq!(cm_to_px(3.49, 300), 412);
        assert_eq!(cm_to_px(3.2, 300), 377);
        assert_eq!(cm_to_px(17.3, 300), 2043);
        assert_eq!(cm_to_px(0.5, 300), 59);
    }
}
