//! Command-line interface.
//!
//! Batch mode transcribes one file: `basicpitch-daemon <input> <output-dir>`.
//! Daemon mode (`--daemon <dir>`) loads the model once and serves the line
//! protocol on stdin/stdout. Transcription flags apply to both.

use std::path::PathBuf;

use clap::Parser;

use crate::config::DaemonConfig;
use crate::error::{Result, TranscribeError};

/// basicpitch-daemon: polyphonic audio-to-MIDI transcription
#[derive(Parser, Debug)]
#[command(name = "basicpitch-daemon")]
#[command(about = "Transcribe audio files to MIDI with the Basic Pitch model")]
#[command(version)]
pub struct Cli {
    /// Input WAV file
    #[arg(required_unless_present = "daemon")]
    pub input: Option<PathBuf>,

    /// Directory the .mid file is written to
    #[arg(required_unless_present = "daemon")]
    pub output_dir: Option<PathBuf>,

    /// Run in daemon mode, writing to DIR unless a command names another directory
    #[arg(long, value_name = "DIR", conflicts_with_all = ["input", "output_dir"])]
    pub daemon: Option<PathBuf>,

    /// JSON config file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// ONNX model file (downloaded there if missing)
    #[arg(short, long, value_name = "FILE")]
    pub model: Option<PathBuf>,

    /// Intra-op threads for ONNX Runtime
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=256))]
    pub threads: Option<u32>,

    /// Never download the model
    #[arg(long)]
    pub offline: bool,

    /// Onset threshold (0.1-1.0, default 0.5)
    #[arg(long)]
    pub onset_threshold: Option<f32>,

    /// Frame threshold (0.1-1.0, default 0.3)
    #[arg(long)]
    pub frame_threshold: Option<f32>,

    /// Minimum frequency in Hz (20-100, default 27.5)
    #[arg(long)]
    pub min_frequency: Option<f32>,

    /// Maximum frequency in Hz (1000-8000, default 4186)
    #[arg(long)]
    pub max_frequency: Option<f32>,

    /// Minimum note length in model frames (1-100, default 11)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub min_note_length: Option<u32>,

    /// MIDI tempo in BPM (60-200, default 120)
    #[arg(long)]
    pub tempo: Option<f32>,

    /// Disable the melodia trick
    #[arg(long)]
    pub no_melodia_trick: bool,

    /// Disable pitch bends
    #[arg(long)]
    pub no_pitch_bends: bool,
}

/// What the binary should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// Transcribe a single file.
    Batch { input: PathBuf, output_dir: PathBuf },
    /// Serve the line protocol.
    Daemon { default_output_dir: PathBuf },
}

impl Cli {
    /// Parses the process arguments. Usage errors and `--help` come back
    /// as a `clap::Error` for the caller to print.
    pub fn parse_args() -> std::result::Result<Self, clap::Error> {
        Cli::try_parse()
    }

    /// Returns the selected mode.
    pub fn mode(&self) -> Result<RunMode> {
        if let Some(ref dir) = self.daemon {
            return Ok(RunMode::Daemon {
                default_output_dir: dir.clone(),
            });
        }

        match (&self.input, &self.output_dir) {
            (Some(input), Some(output_dir)) => Ok(RunMode::Batch {
                input: input.clone(),
                output_dir: output_dir.clone(),
            }),
            _ => Err(TranscribeError::invalid_config(
                "expected <input> <output-dir> or --daemon <dir>",
            )),
        }
    }

    /// Overlays the flags that were given onto `config`.
    pub fn apply_to(&self, config: &mut DaemonConfig) {
        if let Some(ref model) = self.model {
            config.model_path = Some(model.clone());
        }
        if self.threads.is_some() {
            config.threads = self.threads;
        }
        if self.offline {
            config.allow_download = false;
        }

        let t = &mut config.transcription;
        if let Some(v) = self.onset_threshold {
            t.onset_threshold = v;
        }
        if let Some(v) = self.frame_threshold {
            t.frame_threshold = v;
        }
        if let Some(v) = self.min_frequency {
            t.min_frequency = v;
        }
        if let Some(v) = self.max_frequency {
            t.max_frequency = v;
        }
        if let Some(v) = self.min_note_length {
            t.min_note_length = v;
        }
        if let Some(v) = self.tempo {
            t.tempo_bpm = v;
        }
        if self.no_melodia_trick {
            t.use_melodia_trick = false;
        }
        if self.no_pitch_bends {
            t.include_pitch_bends = false;
        }
    }

    /// Builds the effective configuration: defaults, config file,
    /// environment, then flags. The result is validated.
    pub fn load_config(&self) -> Result<DaemonConfig> {
        let mut config = match self.config {
            Some(ref path) => DaemonConfig::from_file(path)?,
            None => DaemonConfig::default(),
        };
        config.apply_env();
        self.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }
}
