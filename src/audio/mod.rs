//! Audio input module.
//!
//! WAV decoding and conversion to the model's mono 22.05 kHz format.

pub mod resample;
pub mod wav;

// Re-export commonly used items
pub use resample::{
    downmix, expected_output_len, normalize, ResamplerState, StreamingResampler, TARGET_SAMPLE_RATE,
};
pub use wav::{read_wav, read_wav_from};
