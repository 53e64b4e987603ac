//! TranscriptionConfig: the tunable parameters of one transcription job.
//!
//! Values are range-checked by [`TranscriptionConfig::validate`] at the
//! boundary that builds them (CLI flags, config file, guest scalars). The
//! pipeline itself trusts whatever it is given.

use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TranscribeError};

/// Accepted onset threshold range.
pub const ONSET_THRESHOLD_RANGE: RangeInclusive<f32> = 0.1..=1.0;

/// Accepted frame threshold range.
pub const FRAME_THRESHOLD_RANGE: RangeInclusive<f32> = 0.1..=1.0;

/// Accepted minimum frequency range in Hz.
pub const MIN_FREQUENCY_RANGE: RangeInclusive<f32> = 20.0..=100.0;

/// Accepted maximum frequency range in Hz.
pub const MAX_FREQUENCY_RANGE: RangeInclusive<f32> = 1000.0..=8000.0;

/// Accepted minimum note length range in model frames.
pub const MIN_NOTE_LENGTH_RANGE: RangeInclusive<u32> = 1..=100;

/// Accepted tempo range in BPM.
pub const TEMPO_RANGE: RangeInclusive<f32> = 60.0..=200.0;

/// Parameters controlling note decoding and MIDI output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Minimum onset probability for a note to start.
    pub onset_threshold: f32,

    /// Minimum frame probability for a note to continue.
    pub frame_threshold: f32,

    /// Lowest pitch kept, in Hz. Default is A0 (lowest piano key).
    pub min_frequency: f32,

    /// Highest pitch kept, in Hz. Default is C8.
    pub max_frequency: f32,

    /// Notes shorter than this many model frames are discarded.
    pub min_note_length: u32,

    /// Tempo written into the MIDI file.
    pub tempo_bpm: f32,

    /// Recover notes without a detected onset from the remaining energy.
    pub use_melodia_trick: bool,

    /// Emit pitch-bend events derived from the pitch contours.
    pub include_pitch_bends: bool,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            onset_threshold: 0.5,
            frame_threshold: 0.3,
            min_frequency: 27.5,
            max_frequency: 4186.0,
            min_note_length: 11,
            tempo_bpm: 120.0,
            use_melodia_trick: true,
            include_pitch_bends: true,
        }
    }
}

impl TranscriptionConfig {
    /// Checks every numeric field against its documented range.
    pub fn validate(&self) -> Result<()> {
        check_range("onset-threshold", self.onset_threshold, &ONSET_THRESHOLD_RANGE)?;
        check_range("frame-threshold", self.frame_threshold, &FRAME_THRESHOLD_RANGE)?;
        check_range("min-frequency", self.min_frequency, &MIN_FREQUENCY_RANGE)?;
        check_range("max-frequency", self.max_frequency, &MAX_FREQUENCY_RANGE)?;
        check_range("tempo", self.tempo_bpm, &TEMPO_RANGE)?;

        if !MIN_NOTE_LENGTH_RANGE.contains(&self.min_note_length) {
            return Err(TranscribeError::invalid_config(format!(
                "min-note-length must be between {} and {} (got {})",
                MIN_NOTE_LENGTH_RANGE.start(),
                MIN_NOTE_LENGTH_RANGE.end(),
                self.min_note_length
            )));
        }

        Ok(())
    }

    /// Returns the MIDI tempo in microseconds per quarter note.
    pub fn tempo_us(&self) -> u32 {
        (60_000_000.0 / self.tempo_bpm as f64).round() as u32
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "onset={} frame={} freq={}-{}Hz min_len={} tempo={}bpm melodia={} bends={}",
            self.onset_threshold,
            self.frame_threshold,
            self.min_frequency,
            self.max_frequency,
            self.min_note_length,
            self.tempo_bpm,
            on_off(self.use_melodia_trick),
            on_off(self.include_pitch_bends),
        )
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag {
        "on"
    } else {
        "off"
    }
}

fn check_range(name: &str, value: f32, range: &RangeInclusive<f32>) -> Result<()> {
    // NaN fails `contains`, which is what we want.
    if range.contains(&value) {
        Ok(())
    } else {
        Err(TranscribeError::invalid_config(format!(
            "{} must be between {} and {} (got {})",
            name,
            range.start(),
            range.end(),
            value
        )))
    }
}
