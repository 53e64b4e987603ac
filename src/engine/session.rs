//! ONNX Runtime implementation of the transcription engine.
//!
//! The model consumes fixed two-second windows `[windows, 43844, 1]` and
//! returns three posteriorgrams per window. Neighbouring windows overlap by
//! 30 frames; half of the overlap is cut from each side before the windows
//! are stitched back into one continuous `[frames, bins]` matrix.

use std::path::Path;

use ndarray::{s, Array2, ArrayView3};
use ort::session::builder::SessionBuilder;
use ort::session::Session;
use ort::value::{DynValue, Tensor};
use tracing::{debug, info};

use crate::error::{Result, TranscribeError};
use crate::types::InferenceResult;

use super::constants::{
    ANNOTATIONS_FPS, AUDIO_N_SAMPLES, CONTOUR_OUTPUT, HOP_SIZE, INPUT_NAME, MODEL_SAMPLE_RATE,
    NOTE_OUTPUT, N_OVERLAPPING_FRAMES, ONSET_OUTPUT, OVERLAP_LEN,
};
use super::TranscriptionEngine;

/// Runtime settings shared by every session built from it.
///
/// Outlives the session it configured; [`OrtEngine`] releases its session
/// first and the environment second.
#[derive(Debug, Clone)]
pub struct ExecutionEnvironment {
    name: String,
    intra_threads: usize,
}

impl ExecutionEnvironment {
    /// Creates an environment. `intra_threads == 0` lets the runtime choose.
    pub fn new(name: impl Into<String>, intra_threads: usize) -> Self {
        Self {
            name: name.into(),
            intra_threads,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn session_builder(&self) -> Result<SessionBuilder> {
        let mut builder = Session::builder().map_err(|e| {
            TranscribeError::engine_load_failed(format!("Failed to create session builder: {}", e))
        })?;

        if self.intra_threads > 0 {
            builder = builder.with_intra_threads(self.intra_threads).map_err(|e| {
                TranscribeError::engine_load_failed(format!(
                    "Failed to set {} intra-op threads: {}",
                    self.intra_threads, e
                ))
            })?;
        }

        Ok(builder)
    }
}

impl Drop for ExecutionEnvironment {
    fn drop(&mut self) {
        debug!("Released execution environment '{}'", self.name);
    }
}

/// Note-transcription model backed by an ONNX Runtime session.
pub struct OrtEngine {
    session: Session,
    environment: ExecutionEnvironment,
}

impl OrtEngine {
    /// Loads the model from an `.onnx` file.
    pub fn load(path: &Path, threads: usize) -> Result<Self> {
        if !path.exists() {
            return Err(TranscribeError::engine_load_failed(format!(
                "Model file not found: {}",
                path.display()
            )));
        }

        let environment = ExecutionEnvironment::new("basicpitch", threads);
        let session = environment
            .session_builder()?
            .commit_from_file(path)
            .map_err(|e| {
                TranscribeError::engine_load_failed(format!(
                    "Failed to load {}: {}",
                    path.display(),
                    e
                ))
            })?;

        info!("Loaded model session from {}", path.display());
        Ok(Self {
            session,
            environment,
        })
    }

    /// Loads the model from bytes already in memory.
    pub fn from_memory(model: &[u8], threads: usize) -> Result<Self> {
        if model.is_empty() {
            return Err(TranscribeError::engine_load_failed("Model buffer is empty"));
        }

        let environment = ExecutionEnvironment::new("basicpitch", threads);
        let session = environment
            .session_builder()?
            .commit_from_memory(model)
            .map_err(|e| {
                TranscribeError::engine_load_failed(format!("Failed to load model from memory: {}", e))
            })?;

        info!("Loaded model session from {} bytes", model.len());
        Ok(Self {
            session,
            environment,
        })
    }
}

impl TranscriptionEngine for OrtEngine {
    fn infer(&mut self, audio: &[f32]) -> Result<InferenceResult> {
        let (n_windows, windows) = frame_audio(audio);
        debug!("Running model over {} windows", n_windows);

        let input = Tensor::from_array(([n_windows, AUDIO_N_SAMPLES, 1usize], windows))
            .map_err(|e| TranscribeError::inference_failed(format!("Failed to create input tensor: {}", e)))?;

        let mut outputs = self
            .session
            .run(ort::inputs![INPUT_NAME => input])
            .map_err(|e| TranscribeError::inference_failed(format!("Model run failed: {}", e)))?;

        let mut take = |name: &str| -> Result<Array2<f32>> {
            let value = outputs.remove(name).ok_or_else(|| {
                TranscribeError::inference_failed(format!("Missing model output {}", name))
            })?;
            unwrap_value(&value, name, audio.len())
        };

        let result = InferenceResult {
            notes: take(NOTE_OUTPUT)?,
            onsets: take(ONSET_OUTPUT)?,
            contours: take(CONTOUR_OUTPUT)?,
        };

        if !result.is_consistent() {
            return Err(TranscribeError::inference_failed(
                "Model outputs disagree on frame count",
            ));
        }

        Ok(result)
    }

    fn release(self) {
        let OrtEngine {
            session,
            environment,
        } = self;
        drop(session);
        debug!("Released model session");
        drop(environment);
    }

    fn name(&self) -> &str {
        self.environment.name()
    }
}

/// Splits audio into overlapping model windows.
///
/// The signal is left-padded by half the overlap and every window is
/// zero-filled past the end of the signal. Returns the window count and the
/// flattened `[windows, AUDIO_N_SAMPLES]` buffer.
pub fn frame_audio(audio: &[f32]) -> (usize, Vec<f32>) {
    let mut padded = vec![0.0f32; OVERLAP_LEN / 2];
    padded.extend_from_slice(audio);

    let n_windows = padded.len().div_ceil(HOP_SIZE);
    let mut windows = vec![0.0f32; n_windows * AUDIO_N_SAMPLES];

    for w in 0..n_windows {
        let start = w * HOP_SIZE;
        let end = (start + AUDIO_N_SAMPLES).min(padded.len());
        let dest = w * AUDIO_N_SAMPLES;
        windows[dest..dest + (end - start)].copy_from_slice(&padded[start..end]);
    }

    (n_windows, windows)
}

/// Stitches per-window model output back into one matrix.
///
/// `shape` is `[windows, frames, bins]`. The result is trimmed to the number
/// of frames covered by `audio_len` samples.
pub fn unwrap_output(data: &[f32], shape: &[usize], audio_len: usize) -> Result<Array2<f32>> {
    let &[n_windows, frames, bins] = shape else {
        return Err(TranscribeError::inference_failed(format!(
            "Expected 3-D model output, got shape {:?}",
            shape
        )));
    };

    let n_olap = N_OVERLAPPING_FRAMES / 2;
    if frames <= 2 * n_olap {
        return Err(TranscribeError::inference_failed(format!(
            "Model output has only {} frames per window",
            frames
        )));
    }

    let windows = ArrayView3::from_shape((n_windows, frames, bins), data)
        .map_err(|e| TranscribeError::inference_failed(format!("Bad model output shape: {}", e)))?;
    let trimmed = windows.slice(s![.., n_olap..frames - n_olap, ..]);

    let kept = frames - 2 * n_olap;
    let n_out = (audio_len * ANNOTATIONS_FPS / MODEL_SAMPLE_RATE).min(n_windows * kept);

    let mut out = Array2::zeros((n_out, bins));
    for (i, mut row) in out.outer_iter_mut().enumerate() {
        row.assign(&trimmed.slice(s![i / kept, i % kept, ..]));
    }

    Ok(out)
}

fn unwrap_value(value: &DynValue, name: &str, audio_len: usize) -> Result<Array2<f32>> {
    let (shape, data) = value.try_extract_tensor::<f32>().map_err(|e| {
        TranscribeError::inference_failed(format!("Failed to extract {}: {}", name, e))
    })?;

    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    unwrap_output(data, &dims, audio_len)
}
