//! Lifecycle owner for the transcription engine handle.
//!
//! An [`EngineResource`] holds at most one live handle. The front-end that
//! owns it initializes it once, lends `&mut` access to each job, and shuts
//! it down exactly once. Dropping the resource shuts it down too, so every
//! exit path (including unwinding out of a job) releases the engine.

use tracing::{debug, info};

use crate::error::{ErrorCode, Result, TranscribeError};

use super::TranscriptionEngine;

/// Owns the process-wide engine handle.
pub struct EngineResource<H: TranscriptionEngine> {
    handle: Option<H>,
}

impl<H: TranscriptionEngine> EngineResource<H> {
    /// Creates an empty resource with no live handle.
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Loads the engine with `load` and stores the handle.
    ///
    /// Fails with `ALREADY_INITIALIZED` without calling `load` if a handle is
    /// already live; the existing handle stays valid. Loader failures are
    /// reported as `ENGINE_LOAD_FAILED` unless they are already process-fatal.
    pub fn initialize<F>(&mut self, load: F) -> Result<&mut H>
    where
        F: FnOnce() -> Result<H>,
    {
        if self.handle.is_some() {
            return Err(TranscribeError::already_initialized());
        }

        let handle = load().map_err(|e| {
            if e.code.is_process_fatal() {
                e
            } else {
                e.into_stage(ErrorCode::EngineLoadFailed, "engine load")
            }
        })?;

        info!("Engine initialized ({})", handle.name());
        Ok(self.handle.insert(handle))
    }

    /// Returns true if a handle is live.
    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    /// Borrows the live handle for one job.
    pub fn handle_mut(&mut self) -> Result<&mut H> {
        self.handle
            .as_mut()
            .ok_or_else(|| TranscribeError::engine_load_failed("engine is not initialized"))
    }

    /// Releases the live handle.
    ///
    /// Returns false (and does nothing) when no handle is live.
    pub fn shutdown(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                debug!("Shutting down engine ({})", handle.name());
                handle.release();
                info!("Engine shut down");
                true
            }
            None => false,
        }
    }
}

impl<H: TranscriptionEngine> Default for EngineResource<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: TranscriptionEngine> Drop for EngineResource<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
