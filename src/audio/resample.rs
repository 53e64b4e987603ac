//! Sample-rate normalization.
//!
//! The model expects mono audio at [`TARGET_SAMPLE_RATE`]. Conversion is two
//! steps:
//!
//! 1. [`downmix`] averages stereo frames to mono (mono passes through).
//! 2. [`normalize`] drives a [`StreamingResampler`] frame by frame until
//!    exactly `round(len * target / source)` samples have been produced.
//!
//! The streaming machine wraps a rubato `SincFixedIn` resampler. It has two
//! observable states: it either needs another input frame, or it holds an
//! output frame ready to be read.

use std::collections::VecDeque;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tracing::debug;

use crate::error::{ErrorCode, Result, TranscribeError};
use crate::types::{AudioBuffer, DecodedAudio};

/// Sample rate the transcription model was trained on.
pub const TARGET_SAMPLE_RATE: u32 = 22050;

/// Input frames handed to rubato per processing call.
const CHUNK_SIZE: usize = 1024;

/// Flushes in a row that may yield no output before giving up.
const MAX_EMPTY_FLUSHES: usize = 4;

/// State of a [`StreamingResampler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResamplerState {
    /// No output is buffered; the machine needs another input frame.
    AwaitingInput,
    /// At least one output frame can be read.
    OutputReady,
}

/// Push/pull resampler over a mono stream.
pub struct StreamingResampler {
    resampler: SincFixedIn<f32>,
    pending: Vec<f32>,
    ready: VecDeque<f32>,
    empty_flushes: usize,
}

impl std::fmt::Debug for StreamingResampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResampler")
            .field("pending", &self.pending.len())
            .field("ready", &self.ready.len())
            .finish_non_exhaustive()
    }
}

impl StreamingResampler {
    /// Creates a resampler converting `source_rate` to `target_rate`.
    pub fn new(source_rate: u32, target_rate: u32) -> Result<Self> {
        check_rate(source_rate)?;
        check_rate(target_rate)?;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };
        let ratio = target_rate as f64 / source_rate as f64;

        let resampler = SincFixedIn::<f32>::new(ratio, 1.1, params, CHUNK_SIZE, 1).map_err(|e| {
            TranscribeError::with_source(
                ErrorCode::InvalidAudioFormat,
                format!(
                    "Cannot resample from {} Hz to {} Hz",
                    source_rate, target_rate
                ),
                e,
            )
        })?;

        // SincFixedIn output is already aligned with its input; no leading
        // frames are discarded.
        Ok(Self {
            pending: Vec::with_capacity(CHUNK_SIZE),
            ready: VecDeque::new(),
            empty_flushes: 0,
            resampler,
        })
    }

    /// Returns the current state.
    pub fn state(&self) -> ResamplerState {
        if self.ready.is_empty() {
            ResamplerState::AwaitingInput
        } else {
            ResamplerState::OutputReady
        }
    }

    /// Returns true if another input frame must be written before reading.
    pub fn is_write_needed(&self) -> bool {
        self.state() == ResamplerState::AwaitingInput
    }

    /// Writes one input frame.
    ///
    /// Once a full chunk is buffered it is resampled and its output becomes
    /// readable.
    pub fn write_frame(&mut self, sample: f32) -> Result<()> {
        self.pending.push(sample);
        if self.pending.len() >= self.resampler.input_frames_next() {
            self.process_pending()?;
        }
        Ok(())
    }

    /// Pads the buffered input with silence and processes it.
    ///
    /// Used once the source is exhausted to push the filter tail out.
    pub fn flush(&mut self) -> Result<()> {
        let needed = self.resampler.input_frames_next();
        self.pending.resize(needed, 0.0);
        let before = self.ready.len();
        self.process_pending()?;

        if self.ready.len() == before {
            self.empty_flushes += 1;
            if self.empty_flushes > MAX_EMPTY_FLUSHES {
                return Err(TranscribeError::invalid_audio(
                    "Resampler stopped producing output while flushing",
                ));
            }
        } else {
            self.empty_flushes = 0;
        }
        Ok(())
    }

    /// Reads one output frame, if any is ready.
    pub fn read_frame(&mut self) -> Option<f32> {
        self.ready.pop_front()
    }

    fn process_pending(&mut self) -> Result<()> {
        let waves_in = vec![std::mem::take(&mut self.pending)];
        let mut output = self.resampler.process(waves_in.as_slice(), None).map_err(|e| {
            TranscribeError::with_source(
                ErrorCode::InvalidAudioFormat,
                "Resampling failed",
                e,
            )
        })?;
        self.pending = Vec::with_capacity(CHUNK_SIZE);

        if let Some(channel) = output.pop() {
            self.ready.extend(channel);
        }
        Ok(())
    }
}

/// Returns `round(input_len * target_rate / source_rate)`.
pub fn expected_output_len(input_len: usize, source_rate: u32, target_rate: u32) -> usize {
    if source_rate == 0 {
        return 0;
    }
    let numerator = input_len as u128 * target_rate as u128;
    let source = source_rate as u128;
    ((2 * numerator + source) / (2 * source)) as usize
}

/// Mixes decoded audio down to mono by averaging channels.
///
/// Only mono and stereo input is accepted; any other channel count is
/// rejected before any resampling or inference happens.
pub fn downmix(audio: DecodedAudio) -> Result<AudioBuffer> {
    check_rate(audio.sample_rate)?;

    match audio.channels {
        1 => Ok(AudioBuffer::new(audio.samples, audio.sample_rate)),
        2 => {
            if audio.samples.len() % 2 != 0 {
                return Err(TranscribeError::invalid_audio(
                    "Stereo data has a dangling sample",
                ));
            }
            let mono = audio
                .samples
                .chunks_exact(2)
                .map(|frame| (frame[0] + frame[1]) / 2.0)
                .collect();
            Ok(AudioBuffer::new(mono, audio.sample_rate))
        }
        n => Err(TranscribeError::unsupported_channels(n)),
    }
}

/// Converts a mono buffer to `target_rate`.
///
/// Returns the input untouched when the rates already match. Zero-length
/// input yields zero-length output.
pub fn normalize(input: AudioBuffer, target_rate: u32) -> Result<AudioBuffer> {
    check_rate(input.sample_rate)?;
    check_rate(target_rate)?;

    if input.sample_rate == target_rate {
        return Ok(input);
    }
    if input.is_empty() {
        return Ok(AudioBuffer::new(Vec::new(), target_rate));
    }

    let expected = expected_output_len(input.len(), input.sample_rate, target_rate);
    debug!(
        "Resampling {} samples {} Hz -> {} Hz ({} out)",
        input.len(),
        input.sample_rate,
        target_rate,
        expected
    );

    let mut machine = StreamingResampler::new(input.sample_rate, target_rate)?;
    let mut frames = input.samples.iter().copied();
    let mut output = Vec::with_capacity(expected);

    while output.len() < expected {
        match machine.state() {
            ResamplerState::AwaitingInput => match frames.next() {
                Some(sample) => machine.write_frame(sample)?,
                None => machine.flush()?,
            },
            ResamplerState::OutputReady => {
                if let Some(sample) = machine.read_frame() {
                    output.push(sample);
                }
            }
        }
    }

    Ok(AudioBuffer::new(output, target_rate))
}

fn check_rate(rate: u32) -> Result<()> {
    if rate == 0 {
        return Err(TranscribeError::invalid_audio("Sample rate must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn expected_len_rounds_half_up() {
        assert_eq!(expected_output_len(480, 48_000, 16_000), 160);
        assert_eq!(expected_output_len(44_100, 44_100, 22_050), 22_050);
        // 1 * 22050 / 16000 = 1.378
        assert_eq!(expected_output_len(1, 16_000, 22_050), 1);
        // 3 * 1 / 2 = 1.5
        assert_eq!(expected_output_len(3, 2, 1), 2);
        assert_eq!(expected_output_len(1, 48_000, 22_050), 0);
    }

    #[test]
    fn normalize_produces_exact_length() {
        let cases = [
            (44_100u32, 22_050u32, 1000usize),
            (48_000, 22_050, 4_801),
            (16_000, 22_050, 333),
            (8_000, 22_050, 1),
            (22_050, 44_100, 2_049),
            (96_000, 22_050, 10_000),
        ];
        for (source, target, len) in cases {
            let input = AudioBuffer::new(vec![0.1; len], source);
            let out = normalize(input, target).unwrap();
            assert_eq!(
                out.len(),
                expected_output_len(len, source, target),
                "{source} -> {target} with {len} samples"
            );
            assert_eq!(out.sample_rate, target);
        }
    }

    #[test]
    fn normalize_same_rate_is_identity() {
        let samples: Vec<f32> = (0..300).map(|i| (i as f32 * 0.01).sin()).collect();
        let input = AudioBuffer::new(samples.clone(), TARGET_SAMPLE_RATE);
        let out = normalize(input, TARGET_SAMPLE_RATE).unwrap();
        assert_eq!(out.samples, samples);
        assert_eq!(out.sample_rate, TARGET_SAMPLE_RATE);
    }

    #[test]
    fn normalize_empty_input() {
        let out = normalize(AudioBuffer::new(Vec::new(), 44_100), TARGET_SAMPLE_RATE).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.sample_rate, TARGET_SAMPLE_RATE);
    }

    #[test]
    fn normalize_rejects_zero_rate() {
        let err = normalize(AudioBuffer::new(vec![0.0; 4], 0), TARGET_SAMPLE_RATE).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAudioFormat);

        let err = normalize(AudioBuffer::new(vec![0.0; 4], 44_100), 0).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAudioFormat);
    }

    #[test]
    fn normalize_keeps_dc_level_mid_signal() {
        let input = AudioBuffer::new(vec![0.5; 44_100], 44_100);
        let out = normalize(input, TARGET_SAMPLE_RATE).unwrap();
        let mid = out.samples[out.len() / 2];
        assert!((mid - 0.5).abs() < 0.02, "DC drifted to {mid}");
    }

    fn peak_index(samples: &[f32]) -> usize {
        samples
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn normalize_keeps_impulse_in_place() {
        let cases = [
            (44_100u32, 22_050u32, 22_050usize),
            (16_000, 22_050, 8_000),
            (22_050, 44_100, 11_025),
            (48_000, 22_050, 24_000),
        ];
        for (source, target, position) in cases {
            let mut samples = vec![0.0f32; source as usize];
            samples[position] = 1.0;
            let out = normalize(AudioBuffer::new(samples, source), target).unwrap();

            let expected = expected_output_len(position, source, target);
            let peak = peak_index(&out.samples);
            assert!(
                peak.abs_diff(expected) <= 1,
                "{source} -> {target}: impulse at {peak}, expected {expected}"
            );
        }
    }

    #[test]
    fn normalize_keeps_dc_level_near_end() {
        let input = AudioBuffer::new(vec![0.5; 44_100], 44_100);
        let out = normalize(input, TARGET_SAMPLE_RATE).unwrap();
        let n = out.len();
        for (i, &s) in out.samples[n - 48..n - 16].iter().enumerate() {
            assert!((s - 0.5).abs() < 0.05, "sample {} fell to {s}", n - 48 + i);
        }
    }

    #[test]
    fn machine_alternates_states() {
        let mut machine = StreamingResampler::new(44_100, 22_050).unwrap();
        assert_eq!(machine.state(), ResamplerState::AwaitingInput);
        assert!(machine.read_frame().is_none());

        let mut writes = 0;
        while machine.is_write_needed() {
            machine.write_frame(0.0).unwrap();
            writes += 1;
            assert!(writes <= 10 * CHUNK_SIZE, "machine never produced output");
        }
        assert_eq!(machine.state(), ResamplerState::OutputReady);
        while machine.read_frame().is_some() {}
        assert_eq!(machine.state(), ResamplerState::AwaitingInput);
    }

    #[test]
    fn flush_produces_tail() {
        let mut machine = StreamingResampler::new(16_000, 22_050).unwrap();
        machine.write_frame(0.3).unwrap();
        let mut flushes = 0;
        while machine.is_write_needed() {
            machine.flush().unwrap();
            flushes += 1;
            assert!(flushes < 10);
        }
        assert!(machine.read_frame().is_some());
    }

    #[test]
    fn downmix_stereo_is_channel_mean() {
        let decoded = DecodedAudio {
            channels: 2,
            sample_rate: TARGET_SAMPLE_RATE,
            samples: vec![1.0, -1.0, 0.5, 0.25, -0.2, -0.4],
        };
        let mono = downmix(decoded).unwrap();
        let out = normalize(mono, TARGET_SAMPLE_RATE).unwrap();
        let expected = [0.0f32, 0.375, -0.3];
        assert_eq!(out.len(), 3);
        for (got, want) in out.samples.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn downmix_mono_passthrough() {
        let mono = downmix(DecodedAudio::mono(vec![0.1, 0.2], 8000)).unwrap();
        assert_eq!(mono.samples, vec![0.1, 0.2]);
        assert_eq!(mono.sample_rate, 8000);
    }

    #[test]
    fn downmix_rejects_three_channels() {
        let decoded = DecodedAudio {
            channels: 3,
            sample_rate: 44_100,
            samples: vec![0.0; 9],
        };
        let err = downmix(decoded).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidAudioFormat);
        assert!(err.message.contains('3'));
    }

    #[test]
    fn downmix_rejects_zero_channels() {
        let decoded = DecodedAudio {
            channels: 0,
            sample_rate: 44_100,
            samples: Vec::new(),
        };
        assert!(downmix(decoded).is_err());
    }
}
