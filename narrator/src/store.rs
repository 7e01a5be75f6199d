//! Validated, index-keyed storage for synthesized segments.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Default minimum size for a usable segment. Anything at or below is noise.
pub const DEFAULT_MIN_SEGMENT_BYTES: usize = 1024;

/// Synthesized audio for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub bytes: Vec<u8>,
}

impl Segment {
    pub fn new(index: usize, bytes: Vec<u8>) -> Self {
        Self { index, bytes }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreRejection {
    #[error("segment {index} is {size} bytes, not above the {min} byte minimum")]
    Undersized { index: usize, size: usize, min: usize },

    #[error("segment {index} was already stored")]
    Duplicate { index: usize },
}

/// Segments keyed by chunk index.
///
/// Safe to fill from concurrent synthesis tasks; each index is written once.
/// When a directory is attached, accepted segments are also written there as
/// `segment_<index>.<ext>` so an interrupted run can pick them up again.
pub struct SegmentStore {
    min_bytes: usize,
    segments: Mutex<BTreeMap<usize, Segment>>,
    dir: Option<(PathBuf, String)>,
}

impl SegmentStore {
    pub fn new(min_bytes: usize) -> Self {
        Self {
            min_bytes,
            segments: Mutex::new(BTreeMap::new()),
            dir: None,
        }
    }

    /// A store that mirrors accepted segments into `dir`.
    pub fn with_dir(min_bytes: usize, dir: &Path, extension: &str) -> std::io::Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: Some((dir.to_path_buf(), extension.trim_start_matches('.').to_string())),
            ..Self::new(min_bytes)
        })
    }

    pub fn put(&self, segment: Segment) -> Result<(), StoreRejection> {
        if segment.size() <= self.min_bytes {
            return Err(StoreRejection::Undersized {
                index: segment.index,
                size: segment.size(),
                min: self.min_bytes,
            });
        }

        let mut segments = self.lock();
        if segments.contains_key(&segment.index) {
            return Err(StoreRejection::Duplicate {
                index: segment.index,
            });
        }

        if let Some((dir, ext)) = &self.dir {
            let path = segment_path(dir, segment.index, ext);
            if let Err(e) = fs::write(&path, &segment.bytes) {
                // the in-memory copy is still good for this run
                log::warn!("Could not persist {}: {}", path.display(), e);
            }
        }

        segments.insert(segment.index, segment);
        Ok(())
    }

    pub fn contains(&self, index: usize) -> bool {
        self.lock().contains_key(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current contents in ascending index order.
    pub fn snapshot(&self) -> Vec<Segment> {
        self.lock().values().cloned().collect()
    }

    /// Reload segments persisted by an earlier run. Files that no longer pass
    /// validation are ignored. Returns how many were restored.
    pub fn restore(&self) -> std::io::Result<usize> {
        let Some((dir, ext)) = &self.dir else {
            return Ok(0);
        };

        let mut restored = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(index) = parse_segment_index(&path, ext) else {
                continue;
            };
            let bytes = fs::read(&path)?;
            if bytes.len() <= self.min_bytes {
                continue;
            }
            let mut segments = self.lock();
            if let std::collections::btree_map::Entry::Vacant(slot) = segments.entry(index) {
                slot.insert(Segment::new(index, bytes));
                restored += 1;
            }
        }

        Ok(restored)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<usize, Segment>> {
        // a panic mid-insert cannot leave the map half-written
        self.segments.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn segment_path(dir: &Path, index: usize, ext: &str) -> PathBuf {
    dir.join(format!("segment_{:05}.{}", index, ext))
}

fn parse_segment_index(path: &Path, ext: &str) -> Option<usize> {
    if path.extension()?.to_str()? != ext {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix("segment_")?
        .parse()
        .ok()
}
