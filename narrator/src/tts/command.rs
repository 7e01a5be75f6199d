//! TTS backend that shells out to an external engine (espeak-ng, piper, say, ...).
//!
//! The command is an argv template. `{text}` and `{output}` are filled per
//! chunk, any other `{name}` from the voice parameters. Without `{text}` the
//! chunk is written to stdin; without `{output}` audio is read from stdout.

use super::{TtsBackend, VoiceParams};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

const TEXT_PLACEHOLDER: &str = "{text}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

pub struct CommandBackend {
    argv: Vec<String>,
    extension: String,
}

impl CommandBackend {
    pub fn new(argv: Vec<String>, extension: &str) -> Result<Self> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            anyhow::bail!("tts_command is empty. Set it with 'narrator config set-command'.");
        }

        Ok(Self {
            argv,
            extension: extension.trim_start_matches('.').to_string(),
        })
    }

    fn uses(&self, placeholder: &str) -> bool {
        self.argv.iter().any(|a| a.contains(placeholder))
    }

    /// Expand the template for one call.
    fn render(&self, text: &str, output: &str, voice: &VoiceParams) -> Vec<String> {
        self.argv
            .iter()
            .map(|arg| {
                let mut arg = arg.replace(OUTPUT_PLACEHOLDER, output);
                for (key, value) in voice {
                    arg = arg.replace(&format!("{{{}}}", key), value);
                }
                // last, so chunk text can never be re-expanded
                arg.replace(TEXT_PLACEHOLDER, text)
            })
            .collect()
    }
}

#[async_trait]
impl TtsBackend for CommandBackend {
    async fn synthesize(&self, text: &str, voice: &VoiceParams) -> Result<Vec<u8>> {
        // Removed on drop, on success and failure alike
        let temp = tempfile::Builder::new()
            .prefix("narrator-segment-")
            .suffix(&format!(".{}", self.extension))
            .tempfile()
            .context("Failed to create temporary audio file")?;
        let output_path = temp.path().to_string_lossy().into_owned();

        let argv = self.render(text, &output_path, voice);
        let text_via_stdin = !self.uses(TEXT_PLACEHOLDER);
        let audio_via_stdout = !self.uses(OUTPUT_PLACEHOLDER);

        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(if text_via_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start TTS command '{}'", argv[0]))?;

        let mut write_result = Ok(());
        if let Some(mut stdin) = child.stdin.take() {
            write_result = stdin.write_all(text.as_bytes()).await;
        }

        let output = child
            .wait_with_output()
            .await
            .context("Failed to wait for TTS command")?;

        // exit status first: an early exit also breaks the stdin pipe
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("TTS command exited with {}: {}", output.status, stderr.trim());
        }
        write_result.context("Failed to write text to TTS command")?;

        if audio_via_stdout {
            return Ok(output.stdout);
        }

        tokio::fs::read(temp.path())
            .await
            .context("Failed to read synthesized audio")
    }

    fn name(&self) -> &str {
        &self.argv[0]
    }
}
