//! Summary spreadsheets for the downstream media import.
//!
//! One row per item that passed every stage, in submission order. The first
//! column numbers the rows from 1, the second holds the reformatted article
//! number, then one path column per artifact, then a fixed status column.
//! Paths are written the way the import system expects them: relative to the
//! secondary destination, backslash separated.
//!
//! ## Article numbers
//!
//! ```text
//! 0012345_1.002.000.tif
//!   │ strip leading zeros      12345_1.002.000.tif
//!   │ drop final extension     12345_1.002.000
//!   │ split after 4 chars      1234 | 5_1.002.000
//!   ▼ '_' → '.' in the rest    1234 5.1.002.000
//! ```
//!
//! The files are `.xlsx` workbooks with a single sheet: a bold header row,
//! the row number as a numeric cell and every other cell as text.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Format, Workbook, XlsxError};

use crate::batch::WorkItem;
use crate::error::PipelineError;
use crate::job::JobId;
use crate::layout::{file_name_of, stem_of};

/// Value of the status column in every row.
pub const STATUS_VALUE: &str = "allg. Mutation";

/// File name of the image summary.
pub const CATALOG_SUMMARY_FILE: &str = "Import_alle_Bilder_Status.xlsx";

const CATALOG_HEADERS: &[&str] = &[
    "Reihenfolge",
    "Artikel-Nr",
    "Orginalbild",
    "BAD Artikelbild maximal",
    "BAD Hauptbild für Katalog",
    "Status",
];

const DRAWING_HEADERS: &[&str] = &[
    "Reihenfolge",
    "Artikel-Nr",
    "Masszeichnung JPG (YM1)",
    "Masszeichnung PDF (YM2)",
    "Status",
];

/// File name of the drawing summary of job `id`.
pub fn drawing_summary_file(id: &JobId) -> String {
    format!("Import_MZ_{id}.xlsx")
}

// ── Identifier derivation ────────────────────────────────────────────────

/// Article number shown for an image file name.
///
/// Pure: the same file name always yields the same label.
pub fn article_number(file_name: &str) -> String {
    let trimmed = file_name.trim_start_matches('0');
    let without_ext = match trimmed.rsplit_once('.') {
        Some((head, _)) => head,
        None => trimmed,
    };
    split_with(without_ext, |rest| rest.replace('_', "."))
}

/// Article label of a drawing stem: the first four characters, a space, the
/// rest. Leading zeros are kept.
pub fn split_article_prefix(stem: &str) -> String {
    split_with(stem, str::to_string)
}

fn split_with(name: &str, rest: impl FnOnce(&str) -> String) -> String {
    match name.char_indices().nth(4) {
        Some((at, _)) => format!("{} {}", &name[..at], rest(&name[at..])),
        // Exactly four characters: nothing follows the separator.
        None if name.chars().count() == 4 => format!("{name} "),
        None => name.to_string(),
    }
}

// ── Tables ───────────────────────────────────────────────────────────────

/// One spreadsheet row plus the local files it refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRow {
    pub cells: Vec<String>,
    /// Local artifacts behind the path columns; all exist when the row is
    /// written.
    pub artifacts: Vec<PathBuf>,
}

/// A summary spreadsheet before it is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryTable {
    pub headers: &'static [&'static str],
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    /// Image summary. Each item's targets are `[cropped .tif, catalog .jpg]`.
    pub fn catalog(items: &[WorkItem]) -> Self {
        let rows = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let stem = item.stem();
                let original = original_name(&item.source);
                SummaryRow {
                    cells: vec![
                        (i + 1).to_string(),
                        article_number(&item.name),
                        format!("\\Originale\\{original}"),
                        format!("\\Print\\BAD_Artikelbild_maximal\\{stem}.tif"),
                        format!("\\Print\\HAWAKatalog\\{stem}.jpg"),
                        STATUS_VALUE.to_string(),
                    ],
                    artifacts: std::iter::once(item.source.clone())
                        .chain(item.targets.iter().cloned())
                        .collect(),
                }
            })
            .collect();
        Self {
            headers: CATALOG_HEADERS,
            rows,
        }
    }

    /// Drawing summary. Each item's targets are `[composed .jpg, merged .pdf]`.
    pub fn drawings(items: &[WorkItem]) -> Self {
        let rows = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let jpg = item.targets.first().cloned().unwrap_or_default();
                let stem = stem_of(&jpg);
                SummaryRow {
                    cells: vec![
                        (i + 1).to_string(),
                        split_article_prefix(&stem),
                        format!("\\SAP\\YM1\\{}", file_name_of(&jpg)),
                        format!("\\SAP\\YM2\\{stem}.pdf"),
                        STATUS_VALUE.to_string(),
                    ],
                    artifacts: item.targets.clone(),
                }
            })
            .collect();
        Self {
            headers: DRAWING_HEADERS,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table to `path` as a workbook, creating its directory.
    pub fn write_xlsx(&self, path: &Path) -> Result<(), PipelineError> {
        let fail = |detail: String| PipelineError::SummaryFailed {
            path: path.to_path_buf(),
            detail,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }
        self.build_workbook()
            .and_then(|mut workbook| workbook.save(path))
            .map_err(|e| fail(e.to_string()))
    }

    fn build_workbook(&self) -> Result<Workbook, XlsxError> {
        let mut workbook = Workbook::new();
        let bold = Format::new().set_bold();
        let sheet = workbook.add_worksheet();

        for (col, header) in (0u16..).zip(self.headers) {
            sheet.write_string_with_format(0, col, *header, &bold)?;
        }
        for (row, cells) in (1u32..).zip(&self.rows) {
            for (col, cell) in (0u16..).zip(&cells.cells) {
                match cell.parse::<f64>() {
                    Ok(number) if col == 0 => sheet.write_number(row, col, number)?,
                    _ => sheet.write_string(row, col, cell)?,
                };
            }
        }
        Ok(workbook)
    }
}

/// Source file name with its extension lower-cased.
fn original_name(source: &Path) -> String {
    let stem = stem_of(source);
    match source.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}.{}", ext.to_lowercase()),
        None => stem,
    }
}
