//! Transcription pipeline: audio in, MIDI bytes out.
//!
//! Stages run in order (downmix, normalize, infer, encode) against a
//! borrowed engine. Each stage's failure is re-tagged with the stage's error
//! code; nothing is retried, and the engine stays usable after a failure.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::audio::{downmix, normalize, read_wav, TARGET_SAMPLE_RATE};
use crate::engine::TranscriptionEngine;
use crate::error::{ErrorCode, Result, TranscribeError};
use crate::sink::write_midi;
use crate::types::{DecodedAudio, TranscriptionConfig};

use super::midi::encode_midi;
use super::notes::decode_notes;

/// Runs every stage over decoded audio and returns the MIDI file bytes.
pub fn transcribe<E>(engine: &mut E, audio: DecodedAudio, config: &TranscriptionConfig) -> Result<Vec<u8>>
where
    E: TranscriptionEngine + ?Sized,
{
    if audio.samples.is_empty() {
        return Err(TranscribeError::invalid_audio("Audio contains no samples"));
    }

    let start = Instant::now();
    let source_rate = audio.sample_rate;
    debug!(
        "Decoded {} frames x {} channels at {} Hz",
        audio.frames(),
        audio.channels,
        source_rate
    );

    let mono = downmix(audio).map_err(|e| e.into_stage(ErrorCode::InvalidAudioFormat, "downmix"))?;
    let normalized = normalize(mono, TARGET_SAMPLE_RATE)
        .map_err(|e| e.into_stage(ErrorCode::InvalidAudioFormat, "normalize"))?;
    debug!(
        "Normalized {} Hz audio to {} samples at {} Hz ({:.2}s)",
        source_rate,
        normalized.len(),
        normalized.sample_rate,
        normalized.duration_secs()
    );

    let result = engine
        .infer(&normalized.samples)
        .map_err(|e| e.into_stage(ErrorCode::InferenceFailed, "inference"))?;
    if !result.is_consistent() {
        return Err(TranscribeError::inference_failed(
            "Engine returned matrices with mismatched frame counts",
        ));
    }

    let notes = decode_notes(&result, config);
    let bytes = encode_midi(&notes, result.frames(), config)
        .map_err(|e| e.into_stage(ErrorCode::EncodingFailed, "encode"))?;

    info!(
        "Transcribed {} frames into {} notes ({} bytes) in {:.2}s",
        result.frames(),
        notes.len(),
        bytes.len(),
        start.elapsed().as_secs_f32()
    );
    Ok(bytes)
}

/// Transcribes a WAV file and writes `<stem>.mid` into `output_dir`.
pub fn transcribe_file<E>(
    engine: &mut E,
    input: &Path,
    output_dir: &Path,
    config: &TranscriptionConfig,
) -> Result<PathBuf>
where
    E: TranscriptionEngine + ?Sized,
{
    info!("Transcribing {}", input.display());
    let audio = read_wav(input)?;
    let bytes = transcribe(engine, audio, config)?;
    write_midi(&bytes, input, output_dir)
}
