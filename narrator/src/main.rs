//! narrator - Turn documents into narrated audio, optionally re-voiced by a remote cloning provider

mod audio;
mod config;
mod extract;
mod pipeline;
mod session;
mod store;
mod text;
mod tts;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::NarratorConfig;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::{Pipeline, PipelineError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use store::SegmentStore;
use tts::{CommandBackend, SynthesizerAdapter};
use voice_clone::{cancel_pair, default_backends, CancelToken, ValidatedConfig};

#[derive(Parser, Debug)]
#[command(name = "narrator")]
#[command(about = "Turn documents into narrated audio", long_about = None)]
#[command(version)]
struct Args {
    /// Document to narrate (.pdf, .epub, .txt or .md)
    document: Option<PathBuf>,

    /// Output file path (default: <document-name>.<segment extension>)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Re-voice the narration through the cloning provider
    #[arg(long)]
    clone: bool,

    /// Where to write the cloned narration (default: <document-name>_cloned.wav)
    #[arg(long)]
    clone_output: Option<PathBuf>,

    /// Start fresh, ignore existing session
    #[arg(long)]
    no_resume: bool,

    /// Keep the session and its segment files after a successful run
    #[arg(long)]
    keep_work: bool,

    /// Character limit per chunk (overrides config)
    #[arg(long)]
    limit: Option<usize>,

    /// Chunks synthesized at the same time (overrides config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Enable debug output
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Clone an existing narration without re-running synthesis
    Clone {
        /// Narration audio file
        audio: PathBuf,

        /// Output file path (default: <audio-name>_cloned.wav)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set default chunk character limit
    SetLimit {
        /// Value (greater than 0)
        value: usize,
    },
    /// Set a voice parameter passed to the TTS command
    SetVoiceParam {
        /// Parameter name, used as {name} in the command template
        key: String,
        /// Parameter value
        value: String,
    },
    /// Set the TTS command template
    SetCommand {
        /// Program and arguments, e.g. espeak-ng -w {output} -- {text}
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        argv: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    match &args.command {
        Some(Commands::Config { action }) => return handle_config_command(action),
        Some(Commands::Clone { audio, output }) => {
            return run_clone(audio, output.as_deref()).await;
        }
        None => {}
    }

    let document = args
        .document
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Document path is required. Run 'narrator --help' for usage."))?;

    if !document.exists() {
        anyhow::bail!("Document not found: {}", document.display());
    }

    let mut config = NarratorConfig::load().context("Failed to load configuration")?;
    if let Some(limit) = args.limit {
        config.chunk_limit = limit;
    }
    if let Some(concurrency) = args.concurrency {
        config.synthesis_concurrency = concurrency;
    }
    config.check()?;

    // Credentials are checked before any work starts
    let clone_config = if args.clone {
        Some(config.clone.clone().with_env_fallback().validate()?)
    } else {
        None
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| sibling_path(&document, "", &config.segment_extension));
    let clone_output = args
        .clone_output
        .clone()
        .unwrap_or_else(|| sibling_path(&document, "_cloned", "wav"));

    if args.debug {
        eprintln!("Document: {}", document.display());
        eprintln!("Output: {}", output.display());
        eprintln!("Chunk limit: {}", config.chunk_limit);
        eprintln!("Concurrency: {}", config.synthesis_concurrency);
        eprintln!("TTS command: {}", config.tts_command.join(" "));
    }

    // Find or create the session
    let data_root = session::default_data_dir()?;
    let fingerprint = config.synthesis_fingerprint();
    let existing = if args.no_resume {
        None
    } else {
        session::find_session_for_document(&data_root, &document, config.chunk_limit, &fingerprint)?
    };
    let resumed = existing.is_some();
    let state = match existing {
        Some(state) => {
            eprintln!("Resuming session {}", state.session_id);
            state
        }
        None => session::create_session(&data_root, &document, config.chunk_limit, &fingerprint)?,
    };

    let work_dir = session::work_dir(&data_root, &state.session_id)?;
    let store = SegmentStore::with_dir(config.min_segment_bytes, &work_dir, &config.segment_extension)
        .context("Failed to open segment directory")?;
    store.restore().context("Failed to reload segments")?;

    if resumed {
        let retrying = state.unresolved_failures(|i| store.contains(i));
        if !retrying.is_empty() {
            eprintln!("Retrying chunks that failed last time: {:?}", retrying);
        }
    }

    let extractor = extract::extractor_for(&document)?;
    let backend = Arc::new(CommandBackend::new(
        config.tts_command.clone(),
        &config.segment_extension,
    )?);
    let synthesizer = SynthesizerAdapter::new(backend, config.voice.clone(), config.min_segment_bytes)
        .with_attempts(config.synthesis_attempts);

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("via {}", synthesizer.backend_name()));

    let mut pipeline = Pipeline::new(state)
        .persisted(data_root.clone())
        .with_progress(pb);
    let cancel = cancel_on_ctrl_c();

    eprintln!("Reading {}", document.display());
    let chunk_count = pipeline.extract(extractor.as_ref(), &document)?;
    eprintln!("Total chunks: {}", chunk_count);

    let report = pipeline
        .narrate(
            &synthesizer,
            &store,
            config.synthesis_concurrency,
            &output,
            cancel.clone(),
        )
        .await?;

    let size_mb = report.bytes as f64 / (1024.0 * 1024.0);
    eprintln!(
        "Narration: {} ({:.1} MB, {} of {} chunks)",
        report.path.display(),
        size_mb,
        report.included.len(),
        chunk_count
    );
    if report.reused > 0 {
        eprintln!("Reused {} segments from the previous run", report.reused);
    }
    if !report.failed.is_empty() {
        eprintln!("Skipped chunks: {:?}", report.failed);
    }

    if let Some(clone_config) = &clone_config {
        clone_stage(&mut pipeline, clone_config, &clone_output, cancel).await?;
    }

    pipeline.finish();
    if !args.keep_work {
        session::cleanup_session(&data_root, pipeline.state())?;
    }

    Ok(())
}

/// `narrator clone`: run only the cloning stage against an existing narration.
async fn run_clone(audio: &Path, output: Option<&Path>) -> Result<()> {
    let config = NarratorConfig::load().context("Failed to load configuration")?;
    let clone_config = config.clone.with_env_fallback().validate()?;

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| sibling_path(audio, "_cloned", "wav"));

    let mut pipeline = Pipeline::from_narration(audio);
    clone_stage(&mut pipeline, &clone_config, &output, cancel_on_ctrl_c()).await
}

async fn clone_stage(
    pipeline: &mut Pipeline,
    config: &ValidatedConfig,
    output: &Path,
    cancel: CancelToken,
) -> Result<()> {
    let (host, provider) = default_backends(config)?;
    eprintln!(
        "Cloning voice via {} (staging on {})...",
        provider.name(),
        host.name()
    );

    let result = pipeline
        .clone_voice(config, host.as_ref(), provider.as_ref(), output, cancel)
        .await;
    let narration = pipeline
        .state()
        .narration_path
        .as_deref()
        .map(|p| p.display().to_string())
        .unwrap_or_default();

    match result {
        Ok(cloned) => {
            eprintln!(
                "Cloned narration: {} (job {}, {} polls)",
                output.display(),
                cloned.job_id,
                cloned.polls
            );
            Ok(())
        }
        Err(e) if e.is_timeout() => {
            anyhow::bail!("{}. Timed out, retry with 'narrator clone {}'", e, narration)
        }
        Err(PipelineError::Clone(e)) if e.is_retriable() => {
            anyhow::bail!("{}. Retry with 'narrator clone {}'", e, narration)
        }
        Err(e) => Err(e.into()),
    }
}

/// A token cancelled by the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancelToken {
    let (handle, token) = cancel_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping...");
            handle.cancel();
        }
    });
    token
}

/// `<dir>/<stem><suffix>.<ext>` next to `path`.
fn sibling_path(path: &Path, suffix: &str, ext: &str) -> PathBuf {
    let stem = path.file_stem().unwrap_or_default().to_string_lossy();
    path.with_file_name(format!("{}{}.{}", stem, suffix, ext.trim_start_matches('.')))
}

fn mask(secret: &Option<String>) -> String {
    match secret {
        Some(s) if s.chars().count() > 4 => format!("{}...", s.chars().take(4).collect::<String>()),
        Some(_) => "(set)".to_string(),
        None => "(none)".to_string(),
    }
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = NarratorConfig::load()?;
            println!("Configuration file: {:?}", NarratorConfig::config_path()?);
            println!();
            println!("chunk_limit = {}", config.chunk_limit);
            println!("min_segment_bytes = {}", config.min_segment_bytes);
            println!("synthesis_concurrency = {}", config.synthesis_concurrency);
            println!("synthesis_attempts = {}", config.synthesis_attempts);
            println!("segment_extension = \"{}\"", config.segment_extension);
            println!("tts_command = {:?}", config.tts_command);
            for (key, value) in &config.voice {
                println!("voice.{} = \"{}\"", key, value);
            }

            let clone = config.clone.with_env_fallback();
            println!();
            println!("clone.api_key = {}", mask(&clone.api_key));
            println!(
                "clone.project_id = {}",
                clone.project_id.as_deref().unwrap_or("(none)")
            );
            println!(
                "clone.voice_id = {}",
                clone.voice_id.as_deref().unwrap_or("(none)")
            );
            println!("clone.staging_endpoint = \"{}\"", clone.staging_endpoint);
            println!("clone.api_base = \"{}\"", clone.api_base);
            println!("clone.poll_interval_secs = {}", clone.poll_interval_secs);
            println!("clone.max_poll_attempts = {}", clone.max_poll_attempts);

            let missing = clone.missing_fields();
            if !missing.is_empty() {
                println!();
                println!("Cloning unavailable, missing: {}", missing.join(", "));
            }
        }
        ConfigAction::SetLimit { value } => {
            if *value == 0 {
                anyhow::bail!("Chunk limit must be greater than zero");
            }
            let mut config = NarratorConfig::load()?;
            config.chunk_limit = *value;
            config.save()?;
            println!("Default chunk limit set to: {}", config.chunk_limit);
        }
        ConfigAction::SetVoiceParam { key, value } => {
            let mut config = NarratorConfig::load()?;
            config.voice.insert(key.clone(), value.clone());
            config.save()?;
            println!("Voice parameter {} set to: {}", key, value);
        }
        ConfigAction::SetCommand { argv } => {
            let mut config = NarratorConfig::load()?;
            config.tts_command = argv.clone();
            config.save()?;
            println!("TTS command set to: {}", argv.join(" "));
        }
    }
    Ok(())
}
