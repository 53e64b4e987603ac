//! WAV file decoder for transcription input.
//!
//! Reads PCM (8/16/24/32-bit integer or 32-bit float) WAV data using the
//! hound crate and returns interleaved `f32` samples in [-1.0, 1.0].

use std::io::Read;
use std::path::Path;

use hound::{SampleFormat, WavReader};

use crate::error::{ErrorCode, Result, TranscribeError};
use crate::types::DecodedAudio;

/// Decodes a WAV file from disk.
///
/// # Example
///
/// ```ignore
/// use basicpitch_daemon::audio::read_wav;
///
/// let audio = read_wav(Path::new("take1.wav"))?;
/// println!("{} Hz, {} channels", audio.sample_rate, audio.channels);
/// ```
pub fn read_wav(path: &Path) -> Result<DecodedAudio> {
    let reader = WavReader::open(path).map_err(|e| map_hound_error(path, e))?;
    decode(reader).map_err(|e| map_hound_error(path, e))
}

/// Decodes WAV data from any reader.
pub fn read_wav_from<R: Read>(source: R) -> Result<DecodedAudio> {
    let reader = WavReader::new(source).map_err(|e| map_hound_error(Path::new("<stream>"), e))?;
    decode(reader).map_err(|e| map_hound_error(Path::new("<stream>"), e))
}

fn decode<R: Read>(mut reader: WavReader<R>) -> std::result::Result<DecodedAudio, hound::Error> {
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<Vec<_>, _>>()?,
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };

    Ok(DecodedAudio {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        samples,
    })
}

/// Returns the factor mapping a signed integer sample to [-1.0, 1.0].
fn int_scale(bits_per_sample: u16) -> f32 {
    let bits = bits_per_sample.clamp(1, 32) as i32;
    1.0 / 2f32.powi(bits - 1)
}

fn map_hound_error(path: &Path, error: hound::Error) -> TranscribeError {
    match error {
        hound::Error::IoError(e) => {
            TranscribeError::io(format!("Failed to read {}", path.display()), e)
        }
        other => TranscribeError::with_source(
            ErrorCode::InvalidAudioFormat,
            format!("Unsupported or corrupt WAV data in {}", path.display()),
            other,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use tempfile::tempdir;

    #[test]
    fn reads_int16_stereo() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [16384i16, -16384, 0, 32767] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.frames(), 2);
        assert!((audio.samples[0] - 0.5).abs() < 1e-6);
        assert!((audio.samples[1] + 0.5).abs() < 1e-6);
        assert!(audio.samples[3] < 1.0);
    }

    #[test]
    fn reads_float_mono() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mono.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for s in [0.25f32, -0.75] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let audio = read_wav(&path).unwrap();
        assert_eq!(audio.samples, vec![0.25, -0.75]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = read_wav(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert_eq!(err.code, ErrorCode::Io);
    }

    #[test]
    fn garbage_is_invalid_format() {
        let err = read_wav_from(std::io::Cursor::new(b"not a riff file at all".to_vec())).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAudioFormat);
    }

    #[test]
    fn int_scale_values() {
        assert_eq!(int_scale(16), 1.0 / 32768.0);
        assert_eq!(int_scale(8), 1.0 / 128.0);
    }
}
