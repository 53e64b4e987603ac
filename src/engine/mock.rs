//! In-memory engine for tests.
//!
//! Produces a deterministic posteriorgram (one sustained middle C when the
//! audio is long enough) without loading any model, and records when it
//! has been released.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::audio::TARGET_SAMPLE_RATE;
use crate::error::{Result, TranscribeError};
use crate::types::InferenceResult;

use super::constants::ANNOTATIONS_FPS;
use super::TranscriptionEngine;

/// Pitch bin of middle C (MIDI 60).
pub(crate) const MOCK_NOTE_BIN: usize = 60 - 21;

/// Contour bin at the centre of middle C.
const MOCK_CONTOUR_BIN: usize = 117;

pub(crate) struct MockEngine {
    destroyed: Arc<AtomicBool>,
    releases: Arc<AtomicUsize>,
    fail_inference: bool,
    pub(crate) calls: usize,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self {
            destroyed: Arc::new(AtomicBool::new(false)),
            releases: Arc::new(AtomicUsize::new(0)),
            fail_inference: false,
            calls: 0,
        }
    }

    /// An engine whose every inference call fails.
    pub(crate) fn failing() -> Self {
        Self {
            fail_inference: true,
            ..Self::new()
        }
    }

    pub(crate) fn destroyed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.destroyed)
    }

    pub(crate) fn release_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.releases)
    }

    pub(crate) fn set_failing(&mut self, fail: bool) {
        self.fail_inference = fail;
    }
}

impl TranscriptionEngine for MockEngine {
    fn infer(&mut self, audio: &[f32]) -> Result<InferenceResult> {
        self.calls += 1;
        if self.fail_inference {
            return Err(TranscribeError::inference_failed("forced failure"));
        }

        let frames = audio.len() * ANNOTATIONS_FPS / TARGET_SAMPLE_RATE as usize;
        let mut result = InferenceResult::silent(frames);
        if frames >= 40 {
            result.onsets[[5, MOCK_NOTE_BIN]] = 0.9;
            for t in 5..30 {
                result.notes[[t, MOCK_NOTE_BIN]] = 0.8;
                result.contours[[t, MOCK_CONTOUR_BIN]] = 0.8;
            }
        }
        Ok(result)
    }

    fn release(self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.destroyed.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "mock"
    }
}
