//! Transcription module.
//!
//! Note decoding, MIDI encoding, and the pipeline tying them to an engine.

pub mod midi;
pub mod notes;
pub mod pipeline;

// Re-export commonly used items
pub use midi::encode_midi;
pub use notes::{decode_notes, NoteEvent};
pub use pipeline::{transcribe, transcribe_file};
