//! Inference engine module.
//!
//! Provides the [`TranscriptionEngine`] seam, the load-once
//! [`EngineResource`] lifecycle, and the ONNX Runtime implementation.

pub mod constants;
pub mod downloader;
pub mod resource;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

use tracing::info;

use crate::config::DaemonConfig;
use crate::error::Result;
use crate::types::InferenceResult;

// Re-export commonly used items
pub use constants::{DEFAULT_MODEL_URL, MODEL_FILE_NAME};
pub use downloader::{ensure_model, model_fingerprint};
pub use resource::EngineResource;
pub use session::{ExecutionEnvironment, OrtEngine};

/// A loaded model that turns mono 22.05 kHz audio into posteriorgrams.
pub trait TranscriptionEngine {
    /// Runs the model over the whole buffer.
    fn infer(&mut self, audio: &[f32]) -> Result<InferenceResult>;

    /// Releases the handle and everything it owns.
    fn release(self)
    where
        Self: Sized,
    {
    }

    /// Short label for logs.
    fn name(&self) -> &str {
        "engine"
    }
}

/// Resolves the model file (downloading it if allowed) and loads it.
pub fn load_engine(config: &DaemonConfig) -> Result<OrtEngine> {
    let model_path = config.effective_model_path();

    if !model_path.exists() && config.allow_download {
        ensure_model(&model_path, &config.model_url)?;
    }

    info!("Loading model from {}", model_path.display());
    OrtEngine::load(&model_path, config.intra_threads())
}
