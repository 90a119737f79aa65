//! Media spreadsheets: one row per article, with the URLs of its product
//! image, its ambience pictures and its dimension drawing.
//!
//! ```text
//! Artikel-Nr        │ Abbildungen │ Ambientebilder   │ Masszeichnungen
//! ──────────────────┼─────────────┼──────────────────┼────────────────
//! 1313 414.105.000  │ https://…a  │ https://…b;https…│ https://…c
//!        │                │               │                 │
//!        ▼                ▼               ▼                 ▼
//!                 01313414_105_000.png    │          1313414.jpg
//!                         01313414_105_000_2.jpg, _3 …
//! ```
//!
//! Workbooks (`xlsx`, `xlsm`, `xls`, `ods`) are read through calamine,
//! first worksheet only. Delimited text is read with the csv crate; the
//! delimiter is `;` when the header line contains one, `,` otherwise.

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use tracing::debug;

use crate::error::PipelineError;
use crate::layout::has_extension;

pub const ARTICLE_COLUMN: &str = "Artikel-Nr";
pub const IMAGE_COLUMN: &str = "Abbildungen";
pub const AMBIENCE_COLUMN: &str = "Ambientebilder";
pub const DRAWING_COLUMN: &str = "Masszeichnungen";

/// Header names are compared after trimming, so `"Ambientebilder "` matches.
pub const REQUIRED_COLUMNS: [&str; 4] = [ARTICLE_COLUMN, IMAGE_COLUMN, AMBIENCE_COLUMN, DRAWING_COLUMN];

/// Digits of the article number that name a dimension drawing.
const DRAWING_NAME_DIGITS: usize = 7;

// ── Rows ─────────────────────────────────────────────────────────────────

/// One data row of a media sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRow {
    /// 1-based position among the data rows (the header is not counted).
    pub line: usize,
    pub article: String,
    pub image: Option<String>,
    /// Split on `;`. Blank entries keep their place so later pictures keep
    /// their number.
    pub ambience: Vec<String>,
    pub drawing: Option<String>,
}

impl MediaRow {
    pub fn has_urls(&self) -> bool {
        self.image.is_some() || self.ambience.iter().any(|url| !url.is_empty()) || self.drawing.is_some()
    }
}

/// Read every data row of the sheet at `path`.
///
/// Fails when the file cannot be parsed or a required column is missing.
/// Rows whose cells are all empty are skipped.
pub fn read_media_sheet(path: &Path) -> Result<Vec<MediaRow>, PipelineError> {
    let invalid = |detail: String| PipelineError::SheetInvalid {
        path: path.to_path_buf(),
        detail,
    };

    let table = if has_extension(path, &["csv"]) {
        read_delimited(path).map_err(invalid)?
    } else {
        read_workbook(path).map_err(invalid)?
    };

    let mut records = table.into_iter();
    let header = records
        .next()
        .ok_or_else(|| invalid("sheet is empty".into()))?;
    let column = |name: &str| header.iter().position(|h| h.trim() == name);

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| column(*name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(invalid(format!("missing column(s): {}", missing.join(", "))));
    }
    // Checked just above.
    let [article, image, ambience, drawing] = REQUIRED_COLUMNS.map(|name| column(name).unwrap_or(0));

    let mut rows = Vec::new();
    for (position, record) in records.enumerate() {
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        let cell = |i: usize| {
            record
                .get(i)
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .map(str::to_string)
        };
        rows.push(MediaRow {
            line: position + 1,
            article: cell(article).unwrap_or_default(),
            image: cell(image),
            ambience: cell(ambience)
                .map(|list| {
                    list.split(';')
                        .map(|url| url.trim().to_string())
                        .collect()
                })
                .unwrap_or_default(),
            drawing: cell(drawing),
        });
    }

    debug!("Read {} media row(s) from {}", rows.len(), path.display());
    Ok(rows)
}

fn read_workbook(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let mut workbook = open_workbook_auto(path).map_err(|e| e.to_string())?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| "workbook has no worksheet".to_string())?
        .map_err(|e| e.to_string())?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.to_string(),
        _ => String::new(),
    }
}

fn read_delimited(path: &Path) -> Result<Vec<Vec<String>>, String> {
    let text = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let header_line = text.lines().next().unwrap_or_default();
    let delimiter = if header_line.contains(';') { b';' } else { b',' };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());
    reader
        .records()
        .map(|record| {
            record
                .map(|r| r.iter().map(str::to_string).collect())
                .map_err(|e| e.to_string())
        })
        .collect()
}

// ── Naming ───────────────────────────────────────────────────────────────

/// Article number without spaces, dots turned into underscores.
pub fn sanitize_article(article: &str) -> String {
    article.replace(' ', "").replace('.', "_")
}

/// Stem of the product image: `0` + sanitised article number.
pub fn image_name(article: &str) -> String {
    format!("0{}", sanitize_article(article))
}

/// Stem of the `index`-th (0-based) ambience picture; numbering starts at 2
/// because the product image is picture 1.
pub fn ambience_name(article: &str, index: usize) -> String {
    format!("{}_{}", image_name(article), index + 2)
}

/// Stem of the dimension drawing: the first seven digits of the article number.
pub fn drawing_name(article: &str) -> String {
    article
        .chars()
        .filter(char::is_ascii_digit)
        .take(DRAWING_NAME_DIGITS)
        .collect()
}

/// Extension of the URL's path, with its dot, or `""`.
pub fn url_extension(url: &str) -> String {
    let path = reqwest::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or_default().to_string());
    let last = path.rsplit('/').next().unwrap_or_default();
    match last.rfind('.') {
        Some(dot) if dot > 0 && last[..dot].chars().any(|c| c != '.') => last[dot..].to_string(),
        _ => String::new(),
    }
}

// ── Download plan ────────────────────────────────────────────────────────

/// Which column a download came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    /// 0-based position in the ambience list.
    Ambience(usize),
    Drawing,
}

impl MediaKind {
    /// Label used in the download log.
    pub fn label(self) -> String {
        match self {
            Self::Image => "Abbildung".into(),
            Self::Ambience(index) => format!("Ambiente {}", index + 2),
            Self::Drawing => "Masszeichnung".into(),
        }
    }
}

/// One URL to fetch and the file name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedDownload {
    pub line: usize,
    pub kind: MediaKind,
    pub url: String,
    pub file_name: String,
}

/// Every download of `row`, in column order. Rows without an article
/// number yield nothing.
pub fn plan_row(row: &MediaRow) -> Vec<PlannedDownload> {
    if row.article.is_empty() {
        return Vec::new();
    }
    let planned = |kind: MediaKind, url: &str, stem: String| PlannedDownload {
        line: row.line,
        kind,
        url: url.to_string(),
        file_name: format!("{stem}{}", url_extension(url)),
    };

    let mut plan = Vec::new();
    if let Some(url) = &row.image {
        plan.push(planned(MediaKind::Image, url, image_name(&row.article)));
    }
    for (index, url) in row.ambience.iter().enumerate() {
        if url.is_empty() {
            continue;
        }
        plan.push(planned(
            MediaKind::Ambience(index),
            url,
            ambience_name(&row.article, index),
        ));
    }
    if let Some(url) = &row.drawing {
        plan.push(planned(MediaKind::Drawing, url, drawing_name(&row.article)));
    }
    plan
}
