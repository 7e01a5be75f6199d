//! Stage sequencing: extract, segment, synthesize, merge, and optionally clone.
//!
//! The pipeline owns the [`RunState`]. A stage only starts once its
//! prerequisite has completed, and every failure is recorded as an event
//! before it is returned.

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use indicatif::ProgressBar;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use voice_clone::{
    CancelToken, CloneError, CloneJob, ClonedAudio, CloningProvider, StagingHost, ValidatedConfig,
};

use crate::audio::merge;
use crate::extract::{ExtractionError, TextExtractor};
use crate::session::{save_session, RunState, Stage};
use crate::store::SegmentStore;
use crate::text::{chunk_document, normalize_whitespace, TextChunk};
use crate::tts::{SynthesisError, SynthesizerAdapter};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("text extraction: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("text extraction: document contains no words")]
    EmptyText,

    #[error("{stage} cannot start before {prerequisite} has completed")]
    StageNotReady { stage: Stage, prerequisite: Stage },

    #[error("narration: no usable narration produced ({failed} of {total} chunks failed)")]
    NoUsableNarration { failed: usize, total: usize },

    #[error("voice cloning: {0}")]
    Clone(#[from] CloneError),

    #[error("{stage}: cannot write {}: {source}", .path.display())]
    Output {
        stage: Stage,
        path: PathBuf,
        source: io::Error,
    },

    #[error("{0}: cancelled")]
    Cancelled(Stage),
}

impl PipelineError {
    /// Cloning ran out of poll budget. The narration is intact and the
    /// cloning stage alone can be retried.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Clone(CloneError::Timeout { .. }))
    }
}

/// Outcome of the narration stage.
#[derive(Debug, Clone)]
pub struct NarrationReport {
    pub path: PathBuf,
    /// Chunk indices merged into the narration, ascending
    pub included: Vec<usize>,
    /// Chunk indices with no usable segment
    pub failed: Vec<usize>,
    /// Segments carried over from an interrupted run
    pub reused: usize,
    pub bytes: usize,
}

pub struct Pipeline {
    state: RunState,
    data_root: Option<PathBuf>,
    chunks: Vec<TextChunk>,
    progress: ProgressBar,
}

impl Pipeline {
    pub fn new(state: RunState) -> Self {
        Self {
            state,
            data_root: None,
            chunks: Vec::new(),
            progress: ProgressBar::hidden(),
        }
    }

    /// A pipeline for cloning a narration produced elsewhere. The existing
    /// file stands in for the extraction and narration stages.
    pub fn from_narration(narration: &Path) -> Self {
        let session_id = format!("clone_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        let mut state = RunState::new(session_id, None, String::new(), 0);
        state.mark_text_extracted(0);
        state.mark_narration_generated(narration.to_path_buf());
        Self::new(state)
    }

    /// Save the run state under `data_root` after every stage.
    pub fn persisted(mut self, data_root: PathBuf) -> Self {
        self.data_root = Some(data_root);
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Extract and segment the document. Returns the chunk count.
    pub fn extract(
        &mut self,
        extractor: &dyn TextExtractor,
        document: &Path,
    ) -> Result<usize, PipelineError> {
        let text = match extractor.extract(document) {
            Ok(text) => text,
            Err(e) => return Err(self.fail(Stage::TextExtracted, e)),
        };

        let text = normalize_whitespace(&text);
        let chunks = chunk_document(&text, self.state.chunk_limit);
        if chunks.is_empty() {
            return Err(self.fail(Stage::TextExtracted, PipelineError::EmptyText));
        }

        log::info!(
            "Extracted {} characters ({}), {} chunks at limit {}",
            text.chars().count(),
            extractor.name(),
            chunks.len(),
            self.state.chunk_limit
        );

        self.state.mark_text_extracted(chunks.len());
        self.chunks = chunks;
        self.persist();
        Ok(self.chunks.len())
    }

    /// Synthesize every chunk not already in `store`, then merge to `output`.
    ///
    /// Chunk failures are recorded and skipped. The merge only starts after
    /// every synthesis attempt has settled, and the stage fails only when no
    /// chunk produced a usable segment.
    pub async fn narrate(
        &mut self,
        synthesizer: &SynthesizerAdapter,
        store: &SegmentStore,
        concurrency: usize,
        output: &Path,
        mut cancel: CancelToken,
    ) -> Result<NarrationReport, PipelineError> {
        self.require(Stage::NarrationGenerated, Stage::TextExtracted)?;

        let total = self.chunks.len();
        let pending: Vec<&TextChunk> = self
            .chunks
            .iter()
            .filter(|c| !store.contains(c.index))
            .collect();
        let reused = total - pending.len();
        if reused > 0 {
            log::info!("Reusing {} segments from an earlier run", reused);
        }

        self.progress.set_length(total as u64);
        self.progress.set_position(reused as u64);

        let mut results = stream::iter(pending)
            .map(|chunk| synthesizer.synthesize(chunk.index, &chunk.text))
            .buffer_unordered(concurrency.max(1));

        let mut cancelled = false;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                next = results.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };

            record_outcome(&mut self.state, store, result);
            self.progress.inc(1);
        }
        // in-flight engine calls are dropped here, which kills their processes
        drop(results);

        if cancelled {
            self.progress.abandon();
            let stage = Stage::NarrationGenerated;
            return Err(self.fail(stage, PipelineError::Cancelled(stage)));
        }
        self.progress.finish_and_clear();

        let failed: Vec<usize> = self
            .chunks
            .iter()
            .map(|c| c.index)
            .filter(|&i| !store.contains(i))
            .collect();

        if store.is_empty() {
            let error = PipelineError::NoUsableNarration {
                failed: failed.len(),
                total,
            };
            return Err(self.fail(Stage::NarrationGenerated, error));
        }

        let artifact = merge(store);
        if let Err(source) = artifact.write_to(output) {
            let error = PipelineError::Output {
                stage: Stage::NarrationGenerated,
                path: output.to_path_buf(),
                source,
            };
            return Err(self.fail(Stage::NarrationGenerated, error));
        }

        log::info!(
            "Narration written to {} ({} of {} chunks)",
            output.display(),
            artifact.indices().len(),
            total
        );
        self.state.mark_narration_generated(output.to_path_buf());
        self.persist();

        Ok(NarrationReport {
            path: output.to_path_buf(),
            included: artifact.indices().to_vec(),
            failed,
            reused,
            bytes: artifact.len(),
        })
    }

    /// Re-voice the narration through the remote provider and write the
    /// result to `output`.
    pub async fn clone_voice(
        &mut self,
        config: &ValidatedConfig,
        host: &dyn StagingHost,
        provider: &dyn CloningProvider,
        output: &Path,
        cancel: CancelToken,
    ) -> Result<ClonedAudio, PipelineError> {
        self.require(Stage::VoiceCloned, Stage::NarrationGenerated)?;
        let Some(narration) = self.state.narration_path.clone() else {
            return Err(PipelineError::StageNotReady {
                stage: Stage::VoiceCloned,
                prerequisite: Stage::NarrationGenerated,
            });
        };

        let mut job = CloneJob::new(config, host, provider);
        let cloned = match job.run(&narration, cancel).await {
            Ok(cloned) => cloned,
            Err(e) => {
                log::warn!("Cloning ended in state {:?}", job.state());
                return Err(self.fail(Stage::VoiceCloned, e));
            }
        };

        if let Err(source) = write_file(output, &cloned.bytes) {
            let error = PipelineError::Output {
                stage: Stage::VoiceCloned,
                path: output.to_path_buf(),
                source,
            };
            return Err(self.fail(Stage::VoiceCloned, error));
        }

        log::info!("Cloned narration written to {}", output.display());
        self.state
            .mark_voice_cloned(output.to_path_buf(), cloned.job_id.to_string());
        self.persist();
        Ok(cloned)
    }

    /// Mark the run as finished so it is not offered for resume.
    pub fn finish(&mut self) {
        self.state.completed = true;
        self.persist();
    }

    fn require(&self, stage: Stage, prerequisite: Stage) -> Result<(), PipelineError> {
        let ready = self.state.is_complete(prerequisite)
            && match prerequisite {
                Stage::TextExtracted => !self.chunks.is_empty(),
                Stage::NarrationGenerated => self.state.narration_path.is_some(),
                Stage::VoiceCloned => true,
            };

        if ready {
            Ok(())
        } else {
            Err(PipelineError::StageNotReady {
                stage,
                prerequisite,
            })
        }
    }

    /// Record a stage failure as an event and hand the error back.
    fn fail(&mut self, stage: Stage, error: impl Into<PipelineError>) -> PipelineError {
        let error = error.into();
        log::error!("{}", error);
        self.state.record_event(stage, None, error.to_string());
        self.persist();
        error
    }

    fn persist(&self) {
        if let Some(root) = &self.data_root {
            if let Err(e) = save_session(root, &self.state) {
                log::warn!("Could not save run state: {:#}", e);
            }
        }
    }
}

fn record_outcome(
    state: &mut RunState,
    store: &SegmentStore,
    result: Result<crate::store::Segment, SynthesisError>,
) {
    let (index, message) = match result {
        Ok(segment) => {
            let index = segment.index;
            match store.put(segment) {
                Ok(()) => {
                    log::debug!("Chunk {} stored", index);
                    return;
                }
                Err(rejection) => (index, rejection.to_string()),
            }
        }
        Err(e) => (e.index(), e.to_string()),
    };

    log::warn!("Skipping chunk {}: {}", index, message);
    state.record_event(Stage::NarrationGenerated, Some(index), message);
}

fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PlainTextExtractor;
    use crate::session::{create_session, find_session_for_document};
    use crate::store::Segment;
    use crate::tts::testing::ScriptedBackend;
    use crate::tts::VoiceParams;
    use std::sync::Arc;
    use tempfile::TempDir;
    use voice_clone::{cancel_pair, CloneConfig, MockProvider, MockStagingHost};

    const SEGMENT_SIZE: usize = 2048;

    /// 75 seven-letter words, 599 characters. At limit 150 each chunk holds
    /// 18 words, giving five chunks whose words start with a..e.
    fn five_chunk_text() -> String {
        (0..75)
            .map(|i| {
                let letter = (b'a' + (i / 18) as u8) as char;
                letter.to_string().repeat(7)
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn document(dir: &TempDir, text: &str) -> PathBuf {
        let path = dir.path().join("book.txt");
        std::fs::write(&path, text).unwrap();
        path
    }

    fn state() -> RunState {
        RunState::new("test".to_string(), None, "hash".to_string(), 150)
    }

    fn adapter(backend: ScriptedBackend) -> (Arc<ScriptedBackend>, SynthesizerAdapter) {
        let backend = Arc::new(backend);
        let adapter = SynthesizerAdapter::new(backend.clone(), VoiceParams::new(), 1024);
        (backend, adapter)
    }

    fn clone_config() -> ValidatedConfig {
        CloneConfig {
            api_key: Some("key".into()),
            project_id: Some("proj".into()),
            voice_id: Some("voice".into()),
            ..CloneConfig::default()
        }
        .validate()
        .unwrap()
    }

    fn expected_audio(letters: &[u8]) -> Vec<u8> {
        letters
            .iter()
            .flat_map(|&l| std::iter::repeat(l).take(SEGMENT_SIZE))
            .collect()
    }

    #[tokio::test]
    async fn test_failed_chunk_is_skipped_and_order_kept() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir, &five_chunk_text());
        let output = dir.path().join("narration.wav");

        let mut pipeline = Pipeline::new(state());
        assert_eq!(pipeline.extract(&PlainTextExtractor, &doc).unwrap(), 5);
        assert!(pipeline.chunks.iter().all(|c| c.text.chars().count() <= 150));

        let (backend, synth) = adapter(ScriptedBackend::new(SEGMENT_SIZE).failing_on("ccccccc"));
        let store = SegmentStore::new(1024);
        let report = pipeline
            .narrate(&synth, &store, 1, &output, CancelToken::never())
            .await
            .unwrap();

        assert_eq!(backend.calls(), 5);
        assert_eq!(report.included, vec![1, 2, 4, 5]);
        assert_eq!(report.failed, vec![3]);
        assert_eq!(std::fs::read(&output).unwrap(), expected_audio(b"abde"));
        assert!(pipeline.state().narration_generated);
        assert_eq!(pipeline.state().failed_chunks(), vec![3]);
    }

    #[tokio::test]
    async fn test_concurrent_synthesis_merges_in_chunk_order() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir, &five_chunk_text());
        let output = dir.path().join("narration.wav");

        let mut pipeline = Pipeline::new(state());
        pipeline.extract(&PlainTextExtractor, &doc).unwrap();

        let (_, synth) = adapter(ScriptedBackend::new(SEGMENT_SIZE).tiny_on("bbbbbbb"));
        let store = SegmentStore::new(1024);
        let report = pipeline
            .narrate(&synth, &store, 4, &output, CancelToken::never())
            .await
            .unwrap();

        assert_eq!(report.included, vec![1, 3, 4, 5]);
        assert_eq!(std::fs::read(&output).unwrap(), expected_audio(b"acde"));
    }

    #[tokio::test]
    async fn test_all_chunks_failing_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir, "one two three");
        let output = dir.path().join("narration.wav");

        let mut pipeline = Pipeline::new(state());
        pipeline.extract(&PlainTextExtractor, &doc).unwrap();

        let (_, synth) = adapter(ScriptedBackend::new(SEGMENT_SIZE).failing_on("one"));
        let err = pipeline
            .narrate(&synth, &SegmentStore::new(1024), 1, &output, CancelToken::never())
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::NoUsableNarration { failed: 1, total: 1 }));
        assert!(!pipeline.state().narration_generated);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_narrate_requires_extraction() {
        let dir = TempDir::new().unwrap();
        let (backend, synth) = adapter(ScriptedBackend::new(SEGMENT_SIZE));

        let mut pipeline = Pipeline::new(state());
        let err = pipeline
            .narrate(
                &synth,
                &SegmentStore::new(1024),
                1,
                &dir.path().join("out.wav"),
                CancelToken::never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageNotReady {
                stage: Stage::NarrationGenerated,
                prerequisite: Stage::TextExtracted
            }
        ));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_whitespace_only_text_is_empty() {
        struct Blank;
        impl TextExtractor for Blank {
            fn extract(&self, _: &Path) -> Result<String, ExtractionError> {
                Ok(" \n\t ".to_string())
            }
            fn name(&self) -> &'static str {
                "blank"
            }
        }

        let mut pipeline = Pipeline::new(state());
        let err = pipeline.extract(&Blank, Path::new("x.txt")).unwrap_err();
        assert!(matches!(err, PipelineError::EmptyText));
        assert!(!pipeline.state().text_extracted);
        assert_eq!(pipeline.state().events.len(), 1);
    }

    #[test]
    fn test_extraction_error_recorded() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = Pipeline::new(state());
        let err = pipeline
            .extract(&PlainTextExtractor, &dir.path().join("missing.txt"))
            .unwrap_err();

        assert!(matches!(err, PipelineError::Extraction(ExtractionError::Unreadable { .. })));
        assert_eq!(pipeline.state().events[0].stage, Stage::TextExtracted);
    }

    #[tokio::test]
    async fn test_resume_skips_stored_segments() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir, &five_chunk_text());
        let output = dir.path().join("narration.wav");

        let store = SegmentStore::new(1024);
        store.put(Segment::new(1, vec![b'a'; SEGMENT_SIZE])).unwrap();
        store.put(Segment::new(2, vec![b'b'; SEGMENT_SIZE])).unwrap();

        let mut pipeline = Pipeline::new(state());
        pipeline.extract(&PlainTextExtractor, &doc).unwrap();

        let (backend, synth) = adapter(ScriptedBackend::new(SEGMENT_SIZE));
        let report = pipeline
            .narrate(&synth, &store, 2, &output, CancelToken::never())
            .await
            .unwrap();

        assert_eq!(backend.calls(), 3);
        assert_eq!(report.reused, 2);
        assert_eq!(std::fs::read(&output).unwrap(), expected_audio(b"abcde"));
    }

    #[tokio::test]
    async fn test_cancelled_narration_does_not_merge() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir, &five_chunk_text());
        let output = dir.path().join("narration.wav");

        let mut pipeline = Pipeline::new(state());
        pipeline.extract(&PlainTextExtractor, &doc).unwrap();

        let (handle, token) = cancel_pair();
        handle.cancel();

        let (_, synth) = adapter(ScriptedBackend::new(SEGMENT_SIZE));
        let err = pipeline
            .narrate(&synth, &SegmentStore::new(1024), 1, &output, token)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Cancelled(Stage::NarrationGenerated)));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_clone_requires_narration() {
        let dir = TempDir::new().unwrap();
        let config = clone_config();
        let host = MockStagingHost::serving("https://stage/n.wav");
        let provider = MockProvider::ready_after(0, b"cloned");

        let mut pipeline = Pipeline::new(state());
        let err = pipeline
            .clone_voice(
                &config,
                &host,
                &provider,
                &dir.path().join("cloned.wav"),
                CancelToken::never(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::StageNotReady {
                stage: Stage::VoiceCloned,
                prerequisite: Stage::NarrationGenerated
            }
        ));
        assert!(host.uploads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_with_cloning() {
        let dir = TempDir::new().unwrap();
        let doc = document(&dir, &five_chunk_text());
        let narration = dir.path().join("narration.wav");
        let cloned_path = dir.path().join("cloned").join("narration.wav");

        let mut pipeline = Pipeline::new(state());
        pipeline.extract(&PlainTextExtractor, &doc).unwrap();
        let (_, synth) = adapter(ScriptedBackend::new(SEGMENT_SIZE));
        pipeline
            .narrate(&synth, &SegmentStore::new(1024), 2, &narration, CancelToken::never())
            .await
            .unwrap();

        let config = clone_config();
        let host = MockStagingHost::serving("https://stage/narration.wav");
        let provider = MockProvider::ready_after(2, b"cloned-audio");
        let cloned = pipeline
            .clone_voice(&config, &host, &provider, &cloned_path, CancelToken::never())
            .await
            .unwrap();

        assert_eq!(cloned.polls, 3);
        assert_eq!(std::fs::read(&cloned_path).unwrap(), b"cloned-audio");
        assert_eq!(host.uploads(), vec![("narration.wav".to_string(), 5 * SEGMENT_SIZE)]);

        let state = pipeline.state();
        assert!(state.voice_cloned);
        assert_eq!(state.clone_job_id.as_deref(), Some(cloned.job_id.0.as_str()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clone_timeout_is_distinct_and_keeps_narration() {
        let dir = TempDir::new().unwrap();
        let narration = dir.path().join("narration.wav");
        std::fs::write(&narration, vec![1u8; 4096]).unwrap();

        let config = clone_config();
        let host = MockStagingHost::serving("https://stage/n.wav");
        let provider = MockProvider::never_ready();

        let mut pipeline = Pipeline::from_narration(&narration);
        let err = pipeline
            .clone_voice(
                &config,
                &host,
                &provider,
                &dir.path().join("cloned.wav"),
                CancelToken::never(),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(provider.poll_calls(), 30);
        assert!(!pipeline.state().voice_cloned);
        assert!(pipeline.state().narration_generated);
        assert_eq!(pipeline.state().events.last().unwrap().stage, Stage::VoiceCloned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clone_provider_failure_is_not_timeout() {
        let dir = TempDir::new().unwrap();
        let narration = dir.path().join("narration.wav");
        std::fs::write(&narration, vec![1u8; 4096]).unwrap();

        let config = clone_config();
        let host = MockStagingHost::serving("https://stage/n.wav");
        let provider = MockProvider::fails_after(0, "voice not found");

        let mut pipeline = Pipeline::from_narration(&narration);
        let err = pipeline
            .clone_voice(
                &config,
                &host,
                &provider,
                &dir.path().join("cloned.wav"),
                CancelToken::never(),
            )
            .await
            .unwrap_err();

        assert!(!err.is_timeout());
        assert!(err.to_string().contains("voice not found"));
        assert_eq!(provider.poll_calls(), 1);
    }

    #[tokio::test]
    async fn test_persisted_run_can_be_found_until_finished() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        let doc = document(&dir, &five_chunk_text());

        let state = create_session(&root, &doc, 150, "espeak").unwrap();
        let mut pipeline = Pipeline::new(state).persisted(root.clone());
        pipeline.extract(&PlainTextExtractor, &doc).unwrap();

        let found = find_session_for_document(&root, &doc, 150, "espeak").unwrap().unwrap();
        assert!(found.text_extracted);
        assert_eq!(found.total_chunks, 5);

        pipeline.finish();
        assert!(find_session_for_document(&root, &doc, 150, "espeak").unwrap().is_none());
    }
}
