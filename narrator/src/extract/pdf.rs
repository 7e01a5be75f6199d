// PDF text extraction

use super::{ExtractionError, TextExtractor};
use lopdf::Document;
use std::path::Path;

/// Reads pages in order. A page whose text cannot be decoded is skipped.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let doc = Document::load(path).map_err(|e| ExtractionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut pages = Vec::new();
        for page_number in doc.get_pages().into_keys() {
            match doc.extract_text(&[page_number]) {
                Ok(text) if !text.trim().is_empty() => pages.push(text),
                Ok(_) => log::debug!("Page {} has no text", page_number),
                Err(e) => log::warn!("Skipping unreadable page {}: {}", page_number, e),
            }
        }

        if pages.is_empty() {
            return Err(ExtractionError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(pages.join("\n\n"))
    }

    fn name(&self) -> &'static str {
        "PDF"
    }
}
