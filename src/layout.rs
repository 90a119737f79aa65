//! Fixed directory contracts of a catalog project.
//!
//! The downstream import expects media in hard-coded folders below a project
//! root, one folder per pipeline stage. Stage directories are created on
//! demand; creating one that already exists is a no-op.
//!
//! ```text
//! <project>/
//!  ├─ 1_Abbildungen/
//!  │   ├─ 1_Originale               image sources
//!  │   ├─ 2_Bad_Artikelbild_max     cropped TIFF
//!  │   └─ 3_Katalog                 grayscale catalog JPEG
//!  ├─ 2_Masszeichnungen/
//!  │   ├─ 1_Originale               EPS / JPG drawings
//!  │   └─ 2b_WebJPEG                composed JPEG + merged PDF
//!  ├─ 8_Importfiles_Media-Datenpfade   summary spreadsheets
//!  ├─ ZIP_Output                    one zip per CAD file
//!  └─ JPG_Output                    converted JPEGs, one folder per PDF
//! ```
//!
//! CAD files, raster images to convert and PDFs are read from the project
//! root itself.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// Accepted image source extensions.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "tif", "bmp"];

/// Accepted technical-drawing source extensions.
pub const DRAWING_EXTENSIONS: &[&str] = &["eps", "jpg", "jpeg"];

/// Raster formats converted to JPEG.
pub const JPEG_SOURCE_EXTENSIONS: &[&str] = &["tif", "tiff", "bmp", "png"];

pub const PDF_EXTENSIONS: &[&str] = &["pdf"];

/// Media spreadsheets: workbooks via calamine, plus delimited text.
pub const SHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods", "csv"];

/// Accepted CAD extensions.
pub const CAD_EXTENSIONS: &[&str] = &[
    "dwg", "dxf", "dwf", "dgn", "step", "stp", "iges", "igs", "sat", "sab", "prt", "asm", "ipt",
    "iam", "catpart", "catproduct", "sldprt", "sldasm", "slddrw", "x_t", "x_b", "stl", "obj",
    "3dm", "rvt", "rfa",
];

const IMPORT_DIR: &str = "8_Importfiles_Media-Datenpfade";

/// Directory layout of one project root.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── Images ───────────────────────────────────────────────────────────

    pub fn image_originals(&self) -> PathBuf {
        self.root.join("1_Abbildungen").join("1_Originale")
    }

    pub fn image_cropped(&self) -> PathBuf {
        self.root.join("1_Abbildungen").join("2_Bad_Artikelbild_max")
    }

    pub fn image_catalog(&self) -> PathBuf {
        self.root.join("1_Abbildungen").join("3_Katalog")
    }

    // ── Drawings ─────────────────────────────────────────────────────────

    pub fn drawing_originals(&self) -> PathBuf {
        self.root.join("2_Masszeichnungen").join("1_Originale")
    }

    pub fn drawing_web(&self) -> PathBuf {
        self.root.join("2_Masszeichnungen").join("2b_WebJPEG")
    }

    // ── CAD ──────────────────────────────────────────────────────────────

    pub fn cad_output(&self) -> PathBuf {
        self.root.join("ZIP_Output")
    }

    // ── JPEG conversion ──────────────────────────────────────────────────

    pub fn jpg_output(&self) -> PathBuf {
        self.root.join("JPG_Output")
    }

    /// Page JPEGs of the PDF with file stem `stem`.
    pub fn pdf_pages(&self, stem: &str) -> PathBuf {
        self.jpg_output().join(stem)
    }

    /// Folder for summary spreadsheets and bundles.
    pub fn import_files(&self) -> PathBuf {
        self.root.join(IMPORT_DIR)
    }
}

/// Folder layout of the auxiliary copy destination.
#[derive(Debug, Clone)]
pub struct SecondaryLayout {
    root: PathBuf,
}

impl SecondaryLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn originals(&self) -> PathBuf {
        self.root.join("Originale")
    }

    pub fn article_image_max(&self) -> PathBuf {
        self.root.join("Print").join("BAD_Artikelbild_maximal")
    }

    pub fn catalog(&self) -> PathBuf {
        self.root.join("Print").join("HAWAKatalog")
    }

    /// Drawing JPEGs (`YM1`).
    pub fn drawing_jpg(&self) -> PathBuf {
        self.root.join("SAP").join("YM1")
    }

    /// Drawing PDFs (`YM2`).
    pub fn drawing_pdf(&self) -> PathBuf {
        self.root.join("SAP").join("YM2")
    }
}

/// Create `dir` and its parents. Idempotent.
pub fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(dir).map_err(|source| PipelineError::CreateDirFailed {
        path: dir.to_path_buf(),
        source,
    })
}

/// Case-insensitive extension match against an allow-list.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// File stem as UTF-8 (lossy).
pub fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// File name as UTF-8 (lossy).
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
