//! Core types for basicpitch-daemon.
//!
//! - [`AudioBuffer`]: mono samples tagged with a sample rate
//! - [`DecodedAudio`]: interleaved samples straight from the decoder
//! - [`TranscriptionConfig`]: per-job tunables with documented ranges
//! - [`InferenceResult`]: note, onset and contour posteriorgrams

mod audio;
mod config;
mod inference;

pub use audio::{AudioBuffer, DecodedAudio};
pub use config::{
    TranscriptionConfig, FRAME_THRESHOLD_RANGE, MAX_FREQUENCY_RANGE, MIN_FREQUENCY_RANGE,
    MIN_NOTE_LENGTH_RANGE, ONSET_THRESHOLD_RANGE, TEMPO_RANGE,
};
pub use inference::{InferenceResult, N_CONTOUR_BINS, N_PITCH_BINS};
