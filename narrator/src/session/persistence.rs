//! Run state persistence: creating, saving, finding and cleaning up sessions.
//!
//! Everything lives under one data root: `sessions/<id>.json` for the state
//! and `work/<id>/` for synthesized segments.

use super::types::RunState;
use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

/// Default data root for narrator.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join("narrator"))
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))
}

fn sessions_dir(root: &Path) -> Result<PathBuf> {
    let dir = root.join("sessions");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

fn session_file(root: &Path, session_id: &str) -> Result<PathBuf> {
    Ok(sessions_dir(root)?.join(format!("{}.json", session_id)))
}

/// Directory holding a session's segment files.
pub fn work_dir(root: &Path, session_id: &str) -> Result<PathBuf> {
    let dir = root.join("work").join(session_id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir)
}

/// SHA256 of the first 1MB of the document, first 16 hex characters.
pub fn compute_document_hash(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut buffer = Vec::with_capacity(1024 * 1024);
    BufReader::new(file)
        .take(1024 * 1024)
        .read_to_end(&mut buffer)?;

    let digest = Sha256::digest(&buffer);
    Ok(format!("{:x}", digest)[..16].to_string())
}

/// Start a new session for `document` and save it immediately.
///
/// `fingerprint` identifies the engine settings segments will be made with.
pub fn create_session(
    root: &Path,
    document: &Path,
    chunk_limit: usize,
    fingerprint: &str,
) -> Result<RunState> {
    let hash = compute_document_hash(document)?;
    let session_id = format!("{}_{}", hash, Utc::now().format("%Y%m%d_%H%M%S"));

    let mut state = RunState::new(session_id, Some(document.to_path_buf()), hash, chunk_limit);
    state.synthesis_fingerprint = fingerprint.to_string();
    save_session(root, &state)?;
    Ok(state)
}

pub fn save_session(root: &Path, state: &RunState) -> Result<()> {
    let path = session_file(root, &state.session_id)?;

    let mut state = state.clone();
    state.updated_at = Utc::now();

    let file = File::create(&path).context("Failed to create session file")?;
    serde_json::to_writer_pretty(BufWriter::new(file), &state)
        .context("Failed to write session JSON")?;
    Ok(())
}

/// Most recent unfinished session for this document cut with the same limit
/// and synthesized with the same engine settings.
///
/// A different limit gives different chunk boundaries, and a different engine
/// or voice gives segments that do not match new ones, so neither is reused.
pub fn find_session_for_document(
    root: &Path,
    document: &Path,
    chunk_limit: usize,
    fingerprint: &str,
) -> Result<Option<RunState>> {
    let hash = compute_document_hash(document)?;
    let dir = sessions_dir(root)?;

    let mut matching = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e != "json").unwrap_or(true) {
            continue;
        }

        let Ok(file) = File::open(&path) else {
            continue;
        };
        match serde_json::from_reader::<_, RunState>(BufReader::new(file)) {
            Ok(state)
                if state.document_hash == hash
                    && state.chunk_limit == chunk_limit
                    && state.synthesis_fingerprint == fingerprint
                    && !state.completed =>
            {
                matching.push(state)
            }
            Ok(_) => {}
            Err(e) => log::debug!("Ignoring unreadable session {}: {}", path.display(), e),
        }
    }

    matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Ok(matching.into_iter().next())
}

/// Remove a session's state file and its segment directory.
pub fn cleanup_session(root: &Path, state: &RunState) -> Result<()> {
    let path = session_file(root, &state.session_id)?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to remove session file")?;
    }

    let work = root.join("work").join(&state.session_id);
    if work.exists() {
        fs::remove_dir_all(&work).context("Failed to remove work directory")?;
    }

    Ok(())
}
