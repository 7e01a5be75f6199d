//! narrator configuration management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use voice_clone::CloneConfig;

use crate::store::DEFAULT_MIN_SEGMENT_BYTES;
use crate::text::DEFAULT_CHUNK_LIMIT;
use crate::tts::VoiceParams;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarratorConfig {
    /// Character budget per chunk
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,

    /// Segments at or below this size are discarded
    #[serde(default = "default_min_segment_bytes")]
    pub min_segment_bytes: usize,

    /// Chunks synthesized at the same time
    #[serde(default = "default_synthesis_concurrency")]
    pub synthesis_concurrency: usize,

    /// Engine attempts per chunk before it is given up
    #[serde(default = "default_synthesis_attempts")]
    pub synthesis_attempts: u32,

    /// File extension of the engine's output
    #[serde(default = "default_segment_extension")]
    pub segment_extension: String,

    /// TTS command template. `{text}`, `{output}` and voice keys are substituted.
    /// Put `--` before `{text}` so chunks starting with `-` are not read as flags.
    #[serde(default = "default_tts_command")]
    pub tts_command: Vec<String>,

    /// Voice parameters passed to the engine untouched
    #[serde(default = "default_voice")]
    pub voice: VoiceParams,

    #[serde(default)]
    pub clone: CloneConfig,
}

fn default_chunk_limit() -> usize {
    DEFAULT_CHUNK_LIMIT
}

fn default_min_segment_bytes() -> usize {
    DEFAULT_MIN_SEGMENT_BYTES
}

fn default_synthesis_concurrency() -> usize {
    1
}

fn default_synthesis_attempts() -> u32 {
    1
}

fn default_segment_extension() -> String {
    "wav".to_string()
}

fn default_tts_command() -> Vec<String> {
    ["espeak-ng", "-v", "{lang}", "-w", "{output}", "--", "{text}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_voice() -> VoiceParams {
    VoiceParams::from([("lang".to_string(), "en".to_string())])
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self {
            chunk_limit: default_chunk_limit(),
            min_segment_bytes: default_min_segment_bytes(),
            synthesis_concurrency: default_synthesis_concurrency(),
            synthesis_attempts: default_synthesis_attempts(),
            segment_extension: default_segment_extension(),
            tts_command: default_tts_command(),
            voice: default_voice(),
            clone: CloneConfig::default(),
        }
    }
}

impl NarratorConfig {
    /// Get the config file path: ~/.config/cli-programs/narrator.toml
    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("cli-programs")
            .join("narrator.toml"))
    }

    /// Load config from file, returning default if file doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: NarratorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(())
    }

    /// Short hash of every setting that shapes a segment's bytes. Segments
    /// from a run with a different fingerprint are not reused.
    pub fn synthesis_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for arg in &self.tts_command {
            hasher.update(arg.as_bytes());
            hasher.update([0]);
        }
        hasher.update([1]);
        for (key, value) in &self.voice {
            hasher.update(key.as_bytes());
            hasher.update([0]);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        }
        hasher.update([1]);
        hasher.update(self.segment_extension.as_bytes());
        hasher.update((self.min_segment_bytes as u64).to_le_bytes());

        format!("{:x}", hasher.finalize())[..16].to_string()
    }

    /// Reject values the pipeline cannot run with.
    pub fn check(&self) -> Result<()> {
        if self.chunk_limit == 0 {
            anyhow::bail!("chunk_limit must be greater than zero");
        }
        if self.synthesis_concurrency == 0 {
            anyhow::bail!("synthesis_concurrency must be greater than zero");
        }
        if self.tts_command.is_empty() {
            anyhow::bail!("tts_command is empty. Set it with 'narrator config set-command'.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NarratorConfig::default();
        assert_eq!(config.chunk_limit, 150);
        assert_eq!(config.min_segment_bytes, 1024);
        assert_eq!(config.synthesis_concurrency, 1);
        assert_eq!(config.clone.max_poll_attempts, 30);
        assert_eq!(config.voice.get("lang").map(String::as_str), Some("en"));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_config_path() {
        let path = NarratorConfig::config_path().unwrap();
        assert!(path.ends_with("cli-programs/narrator.toml"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
chunk_limit = 200
synthesis_concurrency = 4
segment_extension = "mp3"
tts_command = ["piper", "--model", "{model}", "--output_file", "{output}"]

[voice]
model = "en_US-lessac-medium"

[clone]
project_id = "proj-1"
voice_id = "voice-1"
poll_interval_secs = 5
"#;
        let config: NarratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chunk_limit, 200);
        assert_eq!(config.synthesis_concurrency, 4);
        assert_eq!(config.segment_extension, "mp3");
        assert_eq!(config.tts_command[0], "piper");
        assert_eq!(config.voice.get("model").map(String::as_str), Some("en_US-lessac-medium"));
        assert_eq!(config.clone.project_id.as_deref(), Some("proj-1"));
        assert_eq!(config.clone.poll_interval_secs, 5);
        assert_eq!(config.clone.max_poll_attempts, 30);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: NarratorConfig = toml::from_str("").unwrap();
        assert_eq!(config.chunk_limit, 150);
        assert_eq!(config.tts_command, default_tts_command());
    }

    #[test]
    fn test_synthesis_fingerprint_tracks_engine_settings() {
        let base = NarratorConfig::default();
        let fingerprint = base.synthesis_fingerprint();
        assert_eq!(fingerprint.len(), 16);
        assert_eq!(fingerprint, NarratorConfig::default().synthesis_fingerprint());

        let mut voice = base.clone();
        voice.voice.insert("lang".into(), "fr".into());
        let mut command = base.clone();
        command.tts_command[0] = "espeak".into();
        let mut floor = base.clone();
        floor.min_segment_bytes = 2048;
        for changed in [voice, command, floor] {
            assert_ne!(changed.synthesis_fingerprint(), fingerprint);
        }

        // scheduling settings do not change segment bytes
        let tuned = NarratorConfig {
            synthesis_concurrency: 8,
            chunk_limit: 80,
            ..NarratorConfig::default()
        };
        assert_eq!(tuned.synthesis_fingerprint(), fingerprint);
    }

    #[test]
    fn test_check_rejects_zero_limit() {
        let config = NarratorConfig {
            chunk_limit: 0,
            ..Default::default()
        };
        assert!(config.check().is_err());
    }
}
