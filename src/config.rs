//! Process configuration.
//!
//! Settings are layered: defaults, then an optional JSON file, then
//! `BASICPITCH_*` environment variables, then command-line flags.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::{DEFAULT_MODEL_URL, MODEL_FILE_NAME};
use crate::error::{ErrorCode, Result, TranscribeError};
use crate::types::TranscriptionConfig;

/// Highest accepted intra-op thread count.
pub const MAX_THREADS: u32 = 256;

/// Runtime configuration shared by the batch and daemon front-ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// ONNX model file.
    /// If None, uses the platform-specific default cache location.
    pub model_path: Option<PathBuf>,

    /// Where to fetch the model from when it is missing.
    pub model_url: String,

    /// Download the model when the file does not exist.
    pub allow_download: bool,

    /// Number of threads for intra-op parallelism in ONNX Runtime.
    /// If None, uses ONNX Runtime's default.
    pub threads: Option<u32>,

    /// Process-wide transcription parameters.
    pub transcription: TranscriptionConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            model_url: DEFAULT_MODEL_URL.to_string(),
            allow_download: true,
            threads: None,
            transcription: TranscriptionConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Creates a DaemonConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a JSON config file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| TranscribeError::io(format!("Failed to read config {}", path.display()), e))?;

        serde_json::from_str(&text).map_err(|e| {
            TranscribeError::with_source(
                ErrorCode::InvalidConfig,
                format!("Invalid config file {}", path.display()),
                e,
            )
        })
    }

    /// Creates a DaemonConfig from defaults and environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlays the process environment.
    ///
    /// Reads the following environment variables:
    /// - `BASICPITCH_MODEL_PATH` - Path to the ONNX model file
    /// - `BASICPITCH_MODEL_URL` - Download source for the model
    /// - `BASICPITCH_OFFLINE` - `1`/`true`/`yes` disables downloads
    /// - `BASICPITCH_THREADS` - Number of intra-op threads
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    /// Overlays variables from an arbitrary lookup. Unparseable values are
    /// logged and ignored.
    pub fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("BASICPITCH_MODEL_PATH").filter(|p| !p.is_empty()) {
            self.model_path = Some(PathBuf::from(path));
        }

        if let Some(url) = lookup("BASICPITCH_MODEL_URL").filter(|u| !u.is_empty()) {
            self.model_url = url;
        }

        if let Some(flag) = lookup("BASICPITCH_OFFLINE") {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => self.allow_download = false,
                "" | "0" | "false" | "no" => {}
                other => warn!("Ignoring BASICPITCH_OFFLINE={}", other),
            }
        }

        if let Some(threads) = lookup("BASICPITCH_THREADS") {
            match threads.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.threads = Some(n),
                _ => warn!("Ignoring BASICPITCH_THREADS={}", threads),
            }
        }
    }

    /// Returns the effective model path, using the platform default if not specified.
    pub fn effective_model_path(&self) -> PathBuf {
        match self.model_path {
            Some(ref path) => path.clone(),
            None => default_model_path(),
        }
    }

    /// Thread count handed to ONNX Runtime; 0 means its own default.
    pub fn intra_threads(&self) -> usize {
        self.threads.map_or(0, |n| n as usize)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(threads) = self.threads {
            if threads == 0 || threads > MAX_THREADS {
                return Err(TranscribeError::invalid_config(format!(
                    "threads must be between 1 and {} (got {})",
                    MAX_THREADS, threads
                )));
            }
        }

        if self.model_url.is_empty() {
            return Err(TranscribeError::invalid_config("model_url must not be empty"));
        }

        self.transcription.validate()
    }
}

/// Returns the platform-specific default model file.
///
/// - macOS: ~/Library/Caches/basicpitch/models/nmp.onnx
/// - Linux: ~/.cache/basicpitch/models/nmp.onnx
/// - Windows: C:\Users\<user>\AppData\Local\basicpitch\cache\models\nmp.onnx
fn default_model_path() -> PathBuf {
    let dir = match directories::ProjectDirs::from("", "", "basicpitch") {
        Some(proj_dirs) => proj_dirs.cache_dir().join("models"),
        None => PathBuf::from("./models"),
    };
    dir.join(MODEL_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = DaemonConfig::new();
        assert!(config.validate().is_ok());
        assert!(config.allow_download);
        assert_eq!(config.model_url, DEFAULT_MODEL_URL);
        assert_eq!(config.intra_threads(), 0);
        assert!(config.effective_model_path().ends_with(MODEL_FILE_NAME));
    }

    #[test]
    fn thread_validation() {
        let mut config = DaemonConfig::new();
        config.threads = Some(0);
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::InvalidConfig);

        config.threads = Some(257);
        assert!(config.validate().is_err());

        config.threads = Some(4);
        assert!(config.validate().is_ok());
        assert_eq!(config.intra_threads(), 4);
    }

    #[test]
    fn transcription_ranges_checked() {
        let mut config = DaemonConfig::new();
        config.transcription.tempo_bpm = 300.0;
        assert_eq!(config.validate().unwrap_err().code, ErrorCode::InvalidConfig);
    }

    #[test]
    fn environment_overlay() {
        let mut config = DaemonConfig::new();
        config.apply_vars(vars(&[
            ("BASICPITCH_MODEL_PATH", "/models/custom.onnx"),
            ("BASICPITCH_MODEL_URL", "https://mirror.example/nmp.onnx"),
            ("BASICPITCH_OFFLINE", "true"),
            ("BASICPITCH_THREADS", "2"),
        ]));

        assert_eq!(config.effective_model_path(), PathBuf::from("/models/custom.onnx"));
        assert_eq!(config.model_url, "https://mirror.example/nmp.onnx");
        assert!(!config.allow_download);
        assert_eq!(config.threads, Some(2));
    }

    #[test]
    fn bad_environment_values_ignored() {
        let mut config = DaemonConfig::new();
        config.apply_vars(vars(&[
            ("BASICPITCH_OFFLINE", "maybe"),
            ("BASICPITCH_THREADS", "lots"),
            ("BASICPITCH_MODEL_PATH", ""),
        ]));
        assert_eq!(config, DaemonConfig::new());
    }

    #[test]
    fn json_file_with_partial_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"threads": 3, "allow_download": false, "transcription": {"tempo_bpm": 90.0}}"#,
        )
        .unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.threads, Some(3));
        assert!(!config.allow_download);
        assert_eq!(config.transcription.tempo_bpm, 90.0);
        assert_eq!(config.transcription.onset_threshold, 0.5);
        assert_eq!(config.model_url, DEFAULT_MODEL_URL);
    }

    #[test]
    fn malformed_file_is_invalid_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ threads: ").unwrap();
        assert_eq!(
            DaemonConfig::from_file(&path).unwrap_err().code,
            ErrorCode::InvalidConfig
        );

        let missing = DaemonConfig::from_file(&dir.path().join("nope.json")).unwrap_err();
        assert_eq!(missing.code, ErrorCode::Io);
    }
}
