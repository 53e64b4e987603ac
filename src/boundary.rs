//! Embedded guest interface.
//!
//! A host that loads this crate as a guest module drives it through four
//! `extern "C"` entry points:
//!
//! - [`basicpitch_load_model`]: create the resident engine from model bytes
//! - [`basicpitch_convert_to_midi`]: transcribe mono 22.05 kHz samples
//! - [`basicpitch_free_midi`]: hand a returned buffer back for release
//! - [`basicpitch_unload_model`]: release the engine
//!
//! Ownership rules: input buffers are only read during the call and never
//! retained. Every successful conversion allocates exactly one output
//! buffer in the guest's memory; ownership passes to the host, which must
//! return it through [`basicpitch_free_midi`] exactly once. On any failure
//! the output parameters are set to `(null, 0)` and nothing is allocated.

use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, warn};

use crate::audio::TARGET_SAMPLE_RATE;
use crate::engine::{EngineResource, OrtEngine, TranscriptionEngine};
use crate::error::{ErrorCode, Result, TranscribeError};
use crate::transcription::transcribe;
use crate::types::{DecodedAudio, TranscriptionConfig};

/// Status returned by every entry point.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStatus {
    Ok = 0,
    /// The job failed; the engine is still usable.
    JobFailed = 1,
    /// No engine is loaded, or loading it failed.
    EngineUnavailable = 2,
    /// `basicpitch_load_model` was called while an engine is loaded.
    AlreadyInitialized = 3,
    /// A pointer, length or configuration value was rejected.
    InvalidArgument = 4,
    /// The output buffer could not be allocated.
    AllocationFailed = 5,
    /// The guest panicked; the call had no effect on the outputs.
    Panicked = 6,
}

impl From<&TranscribeError> for BoundaryStatus {
    fn from(error: &TranscribeError) -> Self {
        match error.code {
            ErrorCode::EngineLoadFailed | ErrorCode::ModelDownloadFailed => Self::EngineUnavailable,
            ErrorCode::AlreadyInitialized => Self::AlreadyInitialized,
            code if code.is_job_scoped() => Self::JobFailed,
            _ => Self::InvalidArgument,
        }
    }
}

/// A conversion result, before it crosses the boundary.
#[derive(Debug, PartialEq, Eq)]
pub enum OutputBuffer {
    /// Nothing was produced.
    Empty,
    /// Bytes owned by the guest until published.
    Occupied(Box<[u8]>),
}

impl OutputBuffer {
    pub fn len(&self) -> usize {
        match self {
            OutputBuffer::Empty => 0,
            OutputBuffer::Occupied(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Allocates output buffers and tracks the ones the host currently owns.
pub struct OutputAllocator {
    /// Largest buffer handed out, in bytes.
    max_len: usize,
    /// `(address, length)` of every published, not yet released buffer.
    live: Mutex<Vec<(usize, usize)>>,
}

impl OutputAllocator {
    pub const fn new() -> Self {
        Self::with_max_len(usize::MAX)
    }

    /// An allocator that refuses buffers larger than `max_len` bytes.
    pub const fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            live: Mutex::new(Vec::new()),
        }
    }

    /// Copies `bytes` into a fresh buffer of exactly that size.
    ///
    /// Returns `Empty` when `bytes` is empty or the allocation fails.
    pub fn allocate(&self, bytes: &[u8]) -> OutputBuffer {
        if bytes.is_empty() || bytes.len() > self.max_len {
            return OutputBuffer::Empty;
        }

        let mut buffer = Vec::new();
        if buffer.try_reserve_exact(bytes.len()).is_err() {
            return OutputBuffer::Empty;
        }
        buffer.extend_from_slice(bytes);
        OutputBuffer::Occupied(buffer.into_boxed_slice())
    }

    /// Transfers ownership of `buffer` to the host.
    ///
    /// Returns `(null, 0)` for `Empty`.
    pub fn publish(&self, buffer: OutputBuffer) -> (*mut u8, usize) {
        match buffer {
            OutputBuffer::Empty => (ptr::null_mut(), 0),
            OutputBuffer::Occupied(bytes) => {
                let len = bytes.len();
                let raw = Box::into_raw(bytes) as *mut u8;
                self.lock().push((raw as usize, len));
                (raw, len)
            }
        }
    }

    /// Releases a buffer previously returned by [`publish`](Self::publish).
    ///
    /// Pointers this allocator does not currently track (null, already
    /// released, or a mismatched length) are ignored and reported as false.
    ///
    /// # Safety
    ///
    /// The host must not access the buffer after this call.
    pub unsafe fn release(&self, ptr: *mut u8, len: usize) -> bool {
        if ptr.is_null() {
            return false;
        }

        let mut live = self.lock();
        let Some(index) = live.iter().position(|&entry| entry == (ptr as usize, len)) else {
            return false;
        };
        live.swap_remove(index);
        drop(live);

        // SAFETY: (ptr, len) came from `Box::into_raw` in `publish` and was
        // still tracked, so it has not been freed.
        drop(Box::from_raw(ptr::slice_from_raw_parts_mut(ptr, len)));
        true
    }

    /// Number of published buffers the host has not released.
    pub fn live(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(usize, usize)>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for OutputAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration as passed across the boundary, one scalar per field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfigScalars {
    pub onset_threshold: f32,
    pub frame_threshold: f32,
    pub min_frequency: f32,
    pub max_frequency: f32,
    pub min_note_length: f32,
    pub tempo_bpm: f32,
    pub use_melodia_trick: i32,
    pub include_pitch_bends: i32,
}

impl ConfigScalars {
    /// Builds and validates a [`TranscriptionConfig`].
    pub fn to_config(self) -> Result<TranscriptionConfig> {
        if !self.min_note_length.is_finite() || self.min_note_length < 0.0 {
            return Err(TranscribeError::invalid_config(format!(
                "min-note-length must be a non-negative number (got {})",
                self.min_note_length
            )));
        }

        let config = TranscriptionConfig {
            onset_threshold: self.onset_threshold,
            frame_threshold: self.frame_threshold,
            min_frequency: self.min_frequency,
            max_frequency: self.max_frequency,
            min_note_length: self.min_note_length.round() as u32,
            tempo_bpm: self.tempo_bpm,
            use_melodia_trick: self.use_melodia_trick != 0,
            include_pitch_bends: self.include_pitch_bends != 0,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Guest-side owner of the resident engine.
pub struct BoundaryAdapter<H: TranscriptionEngine> {
    engine: EngineResource<H>,
}

impl<H: TranscriptionEngine> BoundaryAdapter<H> {
    pub const fn new() -> Self {
        Self {
            engine: EngineResource::new(),
        }
    }

    /// Creates the resident engine. Fails with `ALREADY_INITIALIZED` if one
    /// is loaded.
    pub fn load<F>(&mut self, load: F) -> Result<()>
    where
        F: FnOnce() -> Result<H>,
    {
        self.engine.initialize(load).map(|_| ())
    }

    pub fn is_loaded(&self) -> bool {
        self.engine.is_initialized()
    }

    /// Transcribes mono samples at the model rate.
    ///
    /// The samples are copied before use; nothing refers to `samples` after
    /// this returns.
    pub fn convert(&mut self, samples: &[f32], config: &TranscriptionConfig) -> Result<Vec<u8>> {
        let engine = self.engine.handle_mut()?;
        let audio = DecodedAudio::mono(samples.to_vec(), TARGET_SAMPLE_RATE);
        transcribe(engine, audio, config)
    }

    /// Releases the resident engine. Returns false if none was loaded.
    pub fn unload(&mut self) -> bool {
        self.engine.shutdown()
    }
}

impl<H: TranscriptionEngine> Default for BoundaryAdapter<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one conversion and writes the outputs through raw out-parameters.
///
/// # Safety
///
/// `out_ptr` and `out_len` must be null or valid for writes. `samples` must
/// be null or valid for reads of `len` floats for the duration of the call.
unsafe fn convert_raw<H: TranscriptionEngine>(
    adapter: &mut BoundaryAdapter<H>,
    allocator: &OutputAllocator,
    samples: *const f32,
    len: usize,
    scalars: ConfigScalars,
    out_ptr: *mut *mut u8,
    out_len: *mut usize,
) -> BoundaryStatus {
    if out_ptr.is_null() || out_len.is_null() {
        return BoundaryStatus::InvalidArgument;
    }
    *out_ptr = ptr::null_mut();
    *out_len = 0;

    if samples.is_null() || len == 0 {
        warn!("Rejected conversion: empty input buffer");
        return BoundaryStatus::InvalidArgument;
    }

    let config = match scalars.to_config() {
        Ok(config) => config,
        Err(e) => {
            warn!("Rejected conversion: {}", e);
            return BoundaryStatus::InvalidArgument;
        }
    };
    debug!("Converting {} samples ({})", len, config.summary());

    let input = slice::from_raw_parts(samples, len);
    let bytes = match adapter.convert(input, &config) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Conversion failed: {}", e);
            return BoundaryStatus::from(&e);
        }
    };

    let buffer = allocator.allocate(&bytes);
    if buffer.is_empty() {
        error!("Failed to allocate {} bytes for MIDI output", bytes.len());
        return BoundaryStatus::AllocationFailed;
    }

    let (raw, raw_len) = allocator.publish(buffer);
    *out_ptr = raw;
    *out_len = raw_len;
    BoundaryStatus::Ok
}

static ADAPTER: Mutex<BoundaryAdapter<OrtEngine>> = Mutex::new(BoundaryAdapter::new());
static OUTPUTS: OutputAllocator = OutputAllocator::new();

fn adapter() -> MutexGuard<'static, BoundaryAdapter<OrtEngine>> {
    ADAPTER.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loads the model from `len` bytes at `model`.
///
/// # Safety
///
/// `model` must be null or valid for reads of `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn basicpitch_load_model(model: *const u8, len: usize) -> i32 {
    if model.is_null() || len == 0 {
        return BoundaryStatus::InvalidArgument as i32;
    }
    let bytes = slice::from_raw_parts(model, len);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        adapter().load(|| OrtEngine::from_memory(bytes, 1))
    }));

    match outcome {
        Ok(Ok(())) => BoundaryStatus::Ok as i32,
        Ok(Err(e)) => {
            error!("Model load failed: {}", e);
            BoundaryStatus::from(&e) as i32
        }
        Err(_) => BoundaryStatus::Panicked as i32,
    }
}

/// Transcribes `len` mono samples at 22.05 kHz into a MIDI file.
///
/// On success `*midi_ptr`/`*midi_len` describe a new buffer owned by the
/// caller, to be released with [`basicpitch_free_midi`]. On failure they are
/// set to null and zero.
///
/// # Safety
///
/// `samples` must be null or valid for reads of `len` floats; `midi_ptr` and
/// `midi_len` must be null or valid for writes.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn basicpitch_convert_to_midi(
    samples: *const f32,
    len: usize,
    midi_ptr: *mut *mut u8,
    midi_len: *mut usize,
    onset_threshold: f32,
    frame_threshold: f32,
    min_frequency: f32,
    max_frequency: f32,
    min_note_length: f32,
    tempo_bpm: f32,
    use_melodia_trick: i32,
    include_pitch_bends: i32,
) -> i32 {
    let scalars = ConfigScalars {
        onset_threshold,
        frame_threshold,
        min_frequency,
        max_frequency,
        min_note_length,
        tempo_bpm,
        use_melodia_trick,
        include_pitch_bends,
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut guard = adapter();
        convert_raw(&mut *guard, &OUTPUTS, samples, len, scalars, midi_ptr, midi_len)
    }));

    match outcome {
        Ok(status) => status as i32,
        Err(_) => BoundaryStatus::Panicked as i32,
    }
}

/// Releases a buffer returned by [`basicpitch_convert_to_midi`].
///
/// Unknown or already released pointers are ignored.
///
/// # Safety
///
/// The caller must not use the buffer afterwards.
#[no_mangle]
pub unsafe extern "C" fn basicpitch_free_midi(ptr: *mut u8, len: usize) {
    if !OUTPUTS.release(ptr, len) && !ptr.is_null() {
        warn!("Ignored release of unknown buffer");
    }
}

/// Releases the resident engine.
#[no_mangle]
pub extern "C" fn basicpitch_unload_model() -> i32 {
    match panic::catch_unwind(|| adapter().unload()) {
        Ok(true) => BoundaryStatus::Ok as i32,
        Ok(false) => BoundaryStatus::EngineUnavailable as i32,
        Err(_) => BoundaryStatus::Panicked as i32,
    }
}
