use super::{ExtractionError, TextExtractor};
use std::path::Path;

/// UTF-8 text files. Invalid sequences are replaced, not rejected.
pub struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String, ExtractionError> {
        let bytes = std::fs::read(path).map_err(|e| ExtractionError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            return Err(ExtractionError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(text)
    }

    fn name(&self) -> &'static str {
        "plain text"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_extract_plain_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("book.txt");
        std::fs::write(&path, "Call me Ishmael.\nSome years ago").unwrap();

        let text = PlainTextExtractor.extract(&path).unwrap();
        assert_eq!(text, "Call me Ishmael.\nSome years ago");
    }

    #[test]
    fn test_extract_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "  \n ").unwrap();

        assert!(matches!(
            PlainTextExtractor.extract(&path),
            Err(ExtractionError::Empty { .. })
        ));
    }

    #[test]
    fn test_extract_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            PlainTextExtractor.extract(&dir.path().join("nope.txt")),
            Err(ExtractionError::Unreadable { .. })
        ));
    }
}
