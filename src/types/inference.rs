//! Raw model output for one transcription job.

use ndarray::Array2;

/// Number of pitch bins in the note and onset matrices (piano keys).
pub const N_PITCH_BINS: usize = 88;

/// Number of bins in the contour matrix (3 per semitone).
pub const N_CONTOUR_BINS: usize = 264;

/// Posteriorgrams produced by the inference engine.
///
/// All three matrices are indexed `[frame, bin]` and share the same number
/// of frames.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    /// Note (frame) activation, `[frames, 88]`.
    pub notes: Array2<f32>,
    /// Onset activation, `[frames, 88]`.
    pub onsets: Array2<f32>,
    /// Pitch contours, `[frames, 264]`.
    pub contours: Array2<f32>,
}

impl InferenceResult {
    /// Creates an all-zero result with `frames` frames.
    pub fn silent(frames: usize) -> Self {
        Self {
            notes: Array2::zeros((frames, N_PITCH_BINS)),
            onsets: Array2::zeros((frames, N_PITCH_BINS)),
            contours: Array2::zeros((frames, N_CONTOUR_BINS)),
        }
    }

    /// Number of time frames.
    pub fn frames(&self) -> usize {
        self.notes.nrows()
    }

    /// Returns true if all three matrices agree on the time axis.
    pub fn is_consistent(&self) -> bool {
        self.notes.nrows() == self.onsets.nrows()
            && self.notes.nrows() == self.contours.nrows()
            && self.notes.ncols() == self.onsets.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_result_shapes() {
        let result = InferenceResult::silent(12);
        assert_eq!(result.frames(), 12);
        assert_eq!(result.notes.ncols(), N_PITCH_BINS);
        assert_eq!(result.contours.ncols(), N_CONTOUR_BINS);
        assert!(result.is_consistent());
    }

    #[test]
    fn mismatched_frames_detected() {
        let mut result = InferenceResult::silent(12);
        result.onsets = Array2::zeros((11, N_PITCH_BINS));
        assert!(!result.is_consistent());
    }
}
