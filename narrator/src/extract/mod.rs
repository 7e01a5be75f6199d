//! Document text extraction.
//!
//! The pipeline only needs "document in, raw text out". Formats are plugged in
//! behind [`TextExtractor`]; a section that cannot be read is skipped rather
//! than failing the whole document.

mod epub;
mod pdf;
mod plain;

pub use epub::EpubExtractor;
pub use pdf::PdfExtractor;
pub use plain::PlainTextExtractor;

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Cannot read {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("No text found in {}", .path.display())]
    Empty { path: PathBuf },

    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
}

/// Produces raw text from a document.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError>;

    /// Format name for display
    fn name(&self) -> &'static str;
}

/// Pick an extractor from the file extension.
pub fn extractor_for(path: &Path) -> Result<Box<dyn TextExtractor>, ExtractionError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "epub" => Ok(Box::new(EpubExtractor)),
        "pdf" => Ok(Box::new(PdfExtractor)),
        "txt" | "text" | "md" => Ok(Box::new(PlainTextExtractor)),
        "" => Err(ExtractionError::UnsupportedFormat(format!(
            "{} has no extension",
            path.display()
        ))),
        other => Err(ExtractionError::UnsupportedFormat(other.to_string())),
    }
}
