//! Byte-level concatenation of stored segments.
//!
//! Segments are joined as-is in ascending chunk order. No transcoding happens
//! here; the output format is whatever the TTS engine produced.

use std::io;
use std::path::Path;

use crate::store::SegmentStore;

/// Merged narration audio plus the chunk indices it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationArtifact {
    bytes: Vec<u8>,
    indices: Vec<usize>,
}

impl NarrationArtifact {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Chunk indices included, ascending. Gaps are failed chunks.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Write the narration to `path`, creating parent directories.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.bytes())
    }
}

/// Build a narration from everything currently held in `store`.
///
/// Every call is a full pass over the store; nothing is cached between calls.
pub fn merge(store: &SegmentStore) -> NarrationArtifact {
    let segments = store.snapshot();

    let total: usize = segments.iter().map(|s| s.size()).sum();
    let mut bytes = Vec::with_capacity(total);
    let mut indices = Vec::with_capacity(segments.len());

    for segment in segments {
        bytes.extend_from_slice(&segment.bytes);
        indices.push(segment.index);
    }

    log::debug!(
        "Merged {} segments ({} bytes): {:?}",
        indices.len(),
        bytes.len(),
        indices
    );

    NarrationArtifact { bytes, indices }
}
