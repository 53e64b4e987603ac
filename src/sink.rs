//! MIDI file output.
//!
//! Writes `<input stem>.mid` into an output directory, creating the
//! directory (and its parents) when it does not exist yet.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, TranscribeError};

/// Extension of written files.
pub const MIDI_EXTENSION: &str = "mid";

/// Returns the output file name for an input path: its base name with the
/// extension replaced by `.mid`.
pub fn midi_file_name(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| std::ffi::OsStr::new("output"));
    PathBuf::from(stem).with_extension(MIDI_EXTENSION)
}

/// Makes sure `dir` exists and is a directory.
///
/// Fails with `NOT_A_DIRECTORY` when the path exists but is not a directory.
pub fn ensure_output_dir(dir: &Path) -> Result<()> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(TranscribeError::not_a_directory(dir)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => fs::create_dir_all(dir).map_err(|e| {
            TranscribeError::io(format!("Failed to create output directory {}", dir.display()), e)
        }),
        Err(e) => Err(TranscribeError::io(
            format!("Failed to inspect output directory {}", dir.display()),
            e,
        )),
    }
}

/// Writes MIDI bytes for `input` into `output_dir` and returns the file path.
///
/// An existing file of the same name is replaced.
pub fn write_midi(bytes: &[u8], input: &Path, output_dir: &Path) -> Result<PathBuf> {
    ensure_output_dir(output_dir)?;

    let path = output_dir.join(midi_file_name(input));
    fs::write(&path, bytes)
        .map_err(|e| TranscribeError::io(format!("Failed to write {}", path.display()), e))?;

    info!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(path)
}
