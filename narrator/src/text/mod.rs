//! Text processing for TTS: whitespace normalization and chunking.

pub mod segmenter;

pub use segmenter::{DEFAULT_CHUNK_LIMIT, normalize_whitespace, segment};

/// A chunk of text ready for TTS processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// 1-based position in the document; merge order follows it
    pub index: usize,
    /// The text content
    pub text: String,
}

impl TextChunk {
    /// Create a new text chunk.
    pub fn new(index: usize, text: String) -> Self {
        Self { index, text }
    }
}

/// Segment `text` and number the chunks from 1.
pub fn chunk_document(text: &str, limit: usize) -> Vec<TextChunk> {
    segment(text, limit)
        .into_iter()
        .enumerate()
        .map(|(i, text)| TextChunk::new(i + 1, text))
        .collect()
}
