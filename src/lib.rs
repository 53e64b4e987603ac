//! basicpitch-daemon: polyphonic audio-to-MIDI transcription with the Basic
//! Pitch ONNX model.
//!
//! Three front-ends share one pipeline (decode, downmix, resample to
//! 22.05 kHz, infer, decode notes, encode MIDI):
//! - a batch command line that transcribes one file
//! - a daemon that loads the model once and serves a line protocol on stdio
//! - `extern "C"` entry points for embedding in a host
//!
//! # Modules
//!
//! - [`types`]: Core data types (AudioBuffer, TranscriptionConfig, InferenceResult)
//! - [`config`]: Runtime configuration (DaemonConfig)
//! - [`error`]: Error types and codes (TranscribeError, ErrorCode)
//! - [`engine`]: Model loading and the load-once EngineResource
//! - [`transcription`]: Note decoding, MIDI encoding, pipeline
//!
//! # Example
//!
//! ```rust,ignore
//! use basicpitch_daemon::{
//!     config::DaemonConfig,
//!     engine::{load_engine, EngineResource},
//!     transcription::transcribe_file,
//! };
//!
//! let config = DaemonConfig::from_env();
//! let mut engine = EngineResource::new();
//! let handle = engine.initialize(|| load_engine(&config))?;
//! let midi = transcribe_file(handle, "song.wav".as_ref(), "out".as_ref(), &config.transcription)?;
//! ```

pub mod audio;
pub mod boundary;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod sink;
pub mod transcription;
pub mod types;

// Re-export commonly used types
pub use config::DaemonConfig;
pub use error::{ErrorCode, Result, TranscribeError};
pub use types::{AudioBuffer, DecodedAudio, InferenceResult, TranscriptionConfig};
