//! Format-dependent text extraction for the analyzer.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Reader};

pub const SPREADSHEET_PREVIEW_ROWS: usize = 10;

const PDF_SUFFIXES: &[&str] = &["pdf"];
const SPREADSHEET_SUFFIXES: &[&str] = &["xls", "xlsx", "xlsm", "ods"];
const TEXT_SUFFIXES: &[&str] = &["txt", "html", "htm", "csv", "log", "md", "json", "xml"];
const BINARY_SUFFIXES: &[&str] = &["jpg", "jpeg", "png", "gif", "zip", "rar", "7z"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pdf,
    Spreadsheet,
    Text,
    Binary,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Text(String),
    Binary,
    Unsupported,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("io error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pdf extraction failed for {}: {message}", path.display())]
    Pdf { path: PathBuf, message: String },
    #[error("spreadsheet extraction failed for {}: {message}", path.display())]
    Spreadsheet { path: PathBuf, message: String },
}

/// Lower-cased extension without the dot, empty when there is none.
pub fn filetype(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}

pub fn file_kind(path: &Path) -> FileKind {
    let ext = filetype(path);
    let ext = ext.as_str();
    if PDF_SUFFIXES.contains(&ext) {
        FileKind::Pdf
    } else if SPREADSHEET_SUFFIXES.contains(&ext) {
        FileKind::Spreadsheet
    } else if TEXT_SUFFIXES.contains(&ext) {
        FileKind::Text
    } else if BINARY_SUFFIXES.contains(&ext) {
        FileKind::Binary
    } else {
        FileKind::Unsupported
    }
}

pub fn extract_text(path: &Path) -> Result<Extraction, ExtractError> {
    let text = match file_kind(path) {
        FileKind::Binary => return Ok(Extraction::Binary),
        FileKind::Unsupported => return Ok(Extraction::Unsupported),
        FileKind::Pdf => extract_pdf(path)?,
        FileKind::Spreadsheet => extract_spreadsheet(path)?,
        FileKind::Text => {
            let bytes = fs::read(path).map_err(|source| ExtractError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
    };
    Ok(Extraction::Text(text))
}

fn extract_pdf(path: &Path) -> Result<String, ExtractError> {
    // The parser panics on some damaged documents.
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| pdf_extract::extract_text(path)));
    match outcome {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(err)) => Err(ExtractError::Pdf {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        Err(_) => Err(ExtractError::Pdf {
            path: path.to_path_buf(),
            message: "pdf parser panicked".to_string(),
        }),
    }
}

fn extract_spreadsheet(path: &Path) -> Result<String, ExtractError> {
    let spreadsheet_err = |message: String| ExtractError::Spreadsheet {
        path: path.to_path_buf(),
        message,
    };
    let mut workbook = open_workbook_auto(path).map_err(|err| spreadsheet_err(err.to_string()))?;

    let mut text = String::new();
    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|err| spreadsheet_err(err.to_string()))?;
        if !text.is_empty() {
            text.push('\n');
        }
        let _ = writeln!(text, "--- Sheet: {name} ---");
        for row in range.rows().take(SPREADSHEET_PREVIEW_ROWS) {
            let cells: Vec<String> = row.iter().map(|cell| cell.to_string()).collect();
            let _ = writeln!(text, "{}", cells.join("\t"));
        }
    }
    Ok(text)
}

/// Keep at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}
