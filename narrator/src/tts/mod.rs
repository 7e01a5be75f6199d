//! TTS backend trait and the per-chunk synthesizer adapter.

pub mod command;

pub use command::CommandBackend;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::store::Segment;

/// Opaque voice settings handed to the backend untouched.
pub type VoiceParams = BTreeMap<String, String>;

/// TTS backend trait - all TTS engines implement this.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    /// Synthesize text to encoded audio bytes.
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> anyhow::Result<Vec<u8>>;

    /// Engine name for display
    fn name(&self) -> &str;
}

/// A failure scoped to one chunk.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("chunk {index}: engine failed after {attempts} attempt(s): {message}")]
    Engine {
        index: usize,
        attempts: u32,
        message: String,
    },

    #[error("chunk {index}: output of {size} bytes is below the {min} byte minimum")]
    Undersized { index: usize, size: usize, min: usize },
}

impl SynthesisError {
    pub fn index(&self) -> usize {
        match self {
            Self::Engine { index, .. } | Self::Undersized { index, .. } => *index,
        }
    }
}

/// Wraps a backend and turns one chunk into one validated segment.
#[derive(Clone)]
pub struct SynthesizerAdapter {
    backend: Arc<dyn TtsBackend>,
    voice: VoiceParams,
    min_segment_bytes: usize,
    max_attempts: u32,
}

impl SynthesizerAdapter {
    pub fn new(backend: Arc<dyn TtsBackend>, voice: VoiceParams, min_segment_bytes: usize) -> Self {
        Self {
            backend,
            voice,
            min_segment_bytes,
            max_attempts: 1,
        }
    }

    /// Retry engine failures up to `attempts` times in total. Undersized
    /// output is never retried.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn synthesize(&self, index: usize, text: &str) -> Result<Segment, SynthesisError> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.backend.synthesize(text, &self.voice).await {
                Ok(bytes) => {
                    if bytes.len() <= self.min_segment_bytes {
                        return Err(SynthesisError::Undersized {
                            index,
                            size: bytes.len(),
                            min: self.min_segment_bytes,
                        });
                    }
                    return Ok(Segment::new(index, bytes));
                }
                Err(e) => {
                    log::debug!(
                        "Chunk {} synthesis failed (attempt {}/{}): {:#}",
                        index,
                        attempt,
                        self.max_attempts,
                        e
                    );
                    last_error = format!("{:#}", e);
                }
            }
        }

        Err(SynthesisError::Engine {
            index,
            attempts: self.max_attempts,
            message: last_error,
        })
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted backend for pipeline tests.

    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Emits `size` bytes tagged with the chunk's first word, failing on
    /// texts that contain any of the `fail_on` markers.
    pub struct ScriptedBackend {
        pub size: usize,
        pub fail_on: HashSet<String>,
        pub tiny_on: HashSet<String>,
        pub calls: AtomicUsize,
        pub seen_voice: Mutex<Option<VoiceParams>>,
    }

    impl ScriptedBackend {
        pub fn new(size: usize) -> Self {
            Self {
                size,
                fail_on: HashSet::new(),
                tiny_on: HashSet::new(),
                calls: AtomicUsize::new(0),
                seen_voice: Mutex::new(None),
            }
        }

        pub fn failing_on(mut self, marker: &str) -> Self {
            self.fail_on.insert(marker.to_string());
            self
        }

        pub fn tiny_on(mut self, marker: &str) -> Self {
            self.tiny_on.insert(marker.to_string());
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    /// Deterministic fake audio: the text's first byte repeated.
    pub fn fake_audio(text: &str, size: usize) -> Vec<u8> {
        vec![text.as_bytes().first().copied().unwrap_or(b'?'); size]
    }

    #[async_trait]
    impl TtsBackend for ScriptedBackend {
        async fn synthesize(&self, text: &str, voice: &VoiceParams) -> anyhow::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_voice.lock().unwrap() = Some(voice.clone());

            if self.fail_on.iter().any(|m| text.contains(m.as_str())) {
                anyhow::bail!("engine crashed on {:?}", text);
            }
            if self.tiny_on.iter().any(|m| text.contains(m.as_str())) {
                return Ok(vec![0u8; 16]);
            }
            Ok(fake_audio(text, self.size))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedBackend;
    use super::*;

    #[tokio::test]
    async fn test_valid_segment() {
        let backend = Arc::new(ScriptedBackend::new(2048));
        let adapter = SynthesizerAdapter::new(backend, VoiceParams::new(), 1024);

        let segment = adapter.synthesize(3, "hello there").await.unwrap();
        assert_eq!(segment.index, 3);
        assert_eq!(segment.size(), 2048);
    }

    #[tokio::test]
    async fn test_undersized_output_is_rejected_without_retry() {
        let backend = Arc::new(ScriptedBackend::new(2048).tiny_on("quiet"));
        let adapter =
            SynthesizerAdapter::new(backend.clone(), VoiceParams::new(), 1024).with_attempts(3);

        let err = adapter.synthesize(2, "quiet please").await.unwrap_err();
        assert!(matches!(err, SynthesisError::Undersized { index: 2, size: 16, min: 1024 }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_exactly_minimum_size_is_invalid() {
        let backend = Arc::new(ScriptedBackend::new(1024));
        let adapter = SynthesizerAdapter::new(backend, VoiceParams::new(), 1024);
        assert!(adapter.synthesize(1, "edge").await.is_err());
    }

    #[tokio::test]
    async fn test_engine_failure_retried_then_reported() {
        let backend = Arc::new(ScriptedBackend::new(2048).failing_on("boom"));
        let adapter =
            SynthesizerAdapter::new(backend.clone(), VoiceParams::new(), 1024).with_attempts(2);

        let err = adapter.synthesize(5, "boom goes the engine").await.unwrap_err();
        assert_eq!(err.index(), 5);
        assert!(matches!(err, SynthesisError::Engine { attempts: 2, .. }));
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_voice_params_pass_through() {
        let backend = Arc::new(ScriptedBackend::new(2048));
        let mut voice = VoiceParams::new();
        voice.insert("rate".into(), "150".into());
        voice.insert("volume".into(), "0.9".into());

        let adapter = SynthesizerAdapter::new(backend.clone(), voice.clone(), 1024);
        adapter.synthesize(1, "text").await.unwrap();

        assert_eq!(backend.seen_voice.lock().unwrap().as_ref(), Some(&voice));
    }
}
