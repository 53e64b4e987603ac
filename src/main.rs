//! basicpitch-daemon: audio-to-MIDI transcription.
//!
//! This binary can run in two modes:
//! - Batch mode: transcribe one WAV file and exit
//! - Daemon mode: load the model once, then serve `process` commands on stdin

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use basicpitch_daemon::cli::{Cli, RunMode};
use basicpitch_daemon::config::DaemonConfig;
use basicpitch_daemon::daemon::DaemonServer;
use basicpitch_daemon::engine::{load_engine, EngineResource, OrtEngine};
use basicpitch_daemon::transcription::transcribe_file;

fn main() -> ExitCode {
    let cli = match Cli::parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_logging();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr; stdout is reserved for daemon replies.
fn init_logging() {
    let filter = std::env::var("BASICPITCH_LOG")
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("basicpitch_daemon=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.load_config().context("Invalid configuration")?;

    match cli.mode()? {
        RunMode::Batch { input, output_dir } => run_batch(&config, &input, &output_dir),
        RunMode::Daemon { default_output_dir } => run_daemon(&config, default_output_dir),
    }
}

/// Transcribes a single file.
fn run_batch(config: &DaemonConfig, input: &Path, output_dir: &Path) -> anyhow::Result<()> {
    info!("Input: {}", input.display());
    info!("Output directory: {}", output_dir.display());
    info!("Settings: {}", config.transcription.summary());

    let mut engine: EngineResource<OrtEngine> = EngineResource::new();
    let handle = engine
        .initialize(|| load_engine(config))
        .context("Failed to load model")?;

    let path = transcribe_file(handle, input, output_dir, &config.transcription)
        .with_context(|| format!("Failed to transcribe {}", input.display()))?;

    info!("MIDI file written to {}", path.display());
    engine.shutdown();
    Ok(())
}

/// Serves the line protocol until `quit` or end of input.
fn run_daemon(config: &DaemonConfig, default_output_dir: PathBuf) -> anyhow::Result<()> {
    let mut server: DaemonServer<OrtEngine> = DaemonServer::new(default_output_dir, config.transcription);
    info!("Settings: {}", config.transcription.summary());

    server.start(|| load_engine(config)).context("Failed to load model")?;
    server.run_stdio()?;
    Ok(())
}
