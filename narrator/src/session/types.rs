//! Run state data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pipeline stages, in the order they must complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    TextExtracted,
    NarrationGenerated,
    VoiceCloned,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::TextExtracted => "text extraction",
            Stage::NarrationGenerated => "narration",
            Stage::VoiceCloned => "voice cloning",
        };
        f.write_str(name)
    }
}

/// A non-fatal event worth keeping, usually a chunk that produced no audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub stage: Stage,
    /// The chunk this event concerns, if any
    pub chunk_index: Option<usize>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-invocation record of completed stages and the artifacts they produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique session identifier
    pub session_id: String,
    /// Source document, if this run started from one
    pub document_path: Option<PathBuf>,
    /// SHA256 prefix of the document
    pub document_hash: String,
    /// Segmenter limit the chunks were cut with
    pub chunk_limit: usize,
    /// Hash of the engine settings the segments were synthesized with
    #[serde(default)]
    pub synthesis_fingerprint: String,
    /// Number of chunks the text was segmented into
    pub total_chunks: usize,
    pub text_extracted: bool,
    pub narration_generated: bool,
    pub voice_cloned: bool,
    pub narration_path: Option<PathBuf>,
    pub cloned_path: Option<PathBuf>,
    /// Provider job that produced the cloned audio
    pub clone_job_id: Option<String>,
    pub events: Vec<RunEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once every requested stage has finished
    pub completed: bool,
}

impl RunState {
    pub fn new(
        session_id: String,
        document_path: Option<PathBuf>,
        document_hash: String,
        chunk_limit: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            document_path,
            document_hash,
            chunk_limit,
            synthesis_fingerprint: String::new(),
            total_chunks: 0,
            text_extracted: false,
            narration_generated: false,
            voice_cloned: false,
            narration_path: None,
            cloned_path: None,
            clone_job_id: None,
            events: Vec::new(),
            created_at: now,
            updated_at: now,
            completed: false,
        }
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        match stage {
            Stage::TextExtracted => self.text_extracted,
            Stage::NarrationGenerated => self.narration_generated,
            Stage::VoiceCloned => self.voice_cloned,
        }
    }

    pub fn mark_text_extracted(&mut self, total_chunks: usize) {
        self.text_extracted = true;
        self.total_chunks = total_chunks;
    }

    pub fn mark_narration_generated(&mut self, path: PathBuf) {
        self.narration_generated = true;
        self.narration_path = Some(path);
    }

    pub fn mark_voice_cloned(&mut self, path: PathBuf, job_id: String) {
        self.voice_cloned = true;
        self.cloned_path = Some(path);
        self.clone_job_id = Some(job_id);
    }

    pub fn record_event(&mut self, stage: Stage, chunk_index: Option<usize>, message: impl Into<String>) {
        self.events.push(RunEvent {
            stage,
            chunk_index,
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Chunk indices that have a recorded failure, ascending and deduplicated.
    pub fn failed_chunks(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.events.iter().filter_map(|e| e.chunk_index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    /// Failed chunks that still have no segment, i.e. the ones a resumed run retries.
    pub fn unresolved_failures(&self, has_segment: impl Fn(usize) -> bool) -> Vec<usize> {
        self.failed_chunks()
            .into_iter()
            .filter(|&i| !has_segment(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new(
            "abc_20260101_000000".to_string(),
            Some(PathBuf::from("/tmp/book.txt")),
            "abc".to_string(),
            150,
        )
    }

    #[test]
    fn test_run_state_new() {
        let state = state();
        assert!(!state.is_complete(Stage::TextExtracted));
        assert!(!state.is_complete(Stage::NarrationGenerated));
        assert!(!state.is_complete(Stage::VoiceCloned));
        assert!(state.events.is_empty());
        assert!(!state.completed);
    }

    #[test]
    fn test_stage_marks() {
        let mut state = state();
        state.mark_text_extracted(5);
        state.mark_narration_generated(PathBuf::from("/tmp/out.wav"));
        state.mark_voice_cloned(PathBuf::from("/tmp/cloned.wav"), "job-1".to_string());

        assert_eq!(state.total_chunks, 5);
        assert!(state.is_complete(Stage::NarrationGenerated));
        assert_eq!(state.cloned_path, Some(PathBuf::from("/tmp/cloned.wav")));
        assert_eq!(state.clone_job_id.as_deref(), Some("job-1"));
    }

    #[test]
    fn test_failed_chunks() {
        let mut state = state();
        state.record_event(Stage::NarrationGenerated, Some(4), "engine crashed");
        state.record_event(Stage::NarrationGenerated, Some(2), "too small");
        state.record_event(Stage::NarrationGenerated, Some(4), "engine crashed again");
        state.record_event(Stage::VoiceCloned, None, "timed out");

        assert_eq!(state.failed_chunks(), vec![2, 4]);
    }

    #[test]
    fn test_unresolved_failures_skip_recovered_chunks() {
        let mut state = state();
        state.record_event(Stage::NarrationGenerated, Some(2), "too small");
        state.record_event(Stage::NarrationGenerated, Some(5), "engine crashed");
        state.record_event(Stage::NarrationGenerated, Some(7), "engine crashed");

        // chunk 5 was synthesized by a later run
        assert_eq!(state.unresolved_failures(|i| i == 5), vec![2, 7]);
        assert!(state.unresolved_failures(|_| true).is_empty());
    }

    #[test]
    fn test_fingerprint_defaults_when_missing() {
        let mut json = serde_json::to_value(state()).unwrap();
        json.as_object_mut().unwrap().remove("synthesis_fingerprint");
        let back: RunState = serde_json::from_value(json).unwrap();
        assert!(back.synthesis_fingerprint.is_empty());
    }

    #[test]
    fn test_run_state_serde() {
        let mut state = state();
        state.record_event(Stage::NarrationGenerated, Some(3), "boom");
        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"narration_generated\""));

        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.events, state.events);
    }
}
