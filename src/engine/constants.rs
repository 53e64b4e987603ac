//! Fixed geometry of the note-transcription model.

/// Sample rate the model was trained on.
pub const MODEL_SAMPLE_RATE: usize = 22050;

/// Hop between model frames, in samples.
pub const FFT_HOP: usize = 256;

/// Model frames per second of audio (integer part).
pub const ANNOTATIONS_FPS: usize = MODEL_SAMPLE_RATE / FFT_HOP;

/// Length of one model window, in samples (two seconds minus one hop).
pub const AUDIO_N_SAMPLES: usize = MODEL_SAMPLE_RATE * 2 - FFT_HOP;

/// Frames produced for one window.
pub const ANNOT_N_FRAMES: usize = ANNOTATIONS_FPS * 2;

/// Frames shared between neighbouring windows.
pub const N_OVERLAPPING_FRAMES: usize = 30;

/// Overlap between neighbouring windows, in samples.
pub const OVERLAP_LEN: usize = N_OVERLAPPING_FRAMES * FFT_HOP;

/// Stride between window starts, in samples.
pub const HOP_SIZE: usize = AUDIO_N_SAMPLES - OVERLAP_LEN;

/// Lowest pitch bin, as a MIDI note number (A0).
pub const MIDI_OFFSET: u8 = 21;

/// Highest pitch bin index.
pub const MAX_FREQ_IDX: usize = 87;

/// Contour bins per semitone.
pub const CONTOURS_BINS_PER_SEMITONE: usize = 3;

pub const INPUT_NAME: &str = "serving_default_input_2:0";
pub const CONTOUR_OUTPUT: &str = "StatefulPartitionedCall:0";
pub const NOTE_OUTPUT: &str = "StatefulPartitionedCall:1";
pub const ONSET_OUTPUT: &str = "StatefulPartitionedCall:2";

/// Public location of the pre-trained ONNX model.
pub const DEFAULT_MODEL_URL: &str =
    "https://github.com/spotify/basic-pitch/raw/main/basic_pitch/saved_models/icassp_2022/nmp.onnx";

/// File name the model is stored under.
pub const MODEL_FILE_NAME: &str = "nmp.onnx";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_geometry() {
        assert_eq!(ANNOTATIONS_FPS, 86);
        assert_eq!(AUDIO_N_SAMPLES, 43844);
        assert_eq!(OVERLAP_LEN, 7680);
        assert_eq!(HOP_SIZE, 36164);
        assert_eq!(ANNOT_N_FRAMES, 172);
    }
}
