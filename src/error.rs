//! Error types for basicpitch-daemon.
//!
//! Every stage of a transcription job reports failures through
//! [`TranscribeError`], tagged with an [`ErrorCode`] so that all three
//! front-ends (batch, daemon, embedded guest) share one error vocabulary.

use std::fmt;

/// Error codes identifying the kind of failure.
///
/// Job-scoped codes abort a single job and leave the process (and the
/// engine handle) usable. Process-fatal codes stop the hosting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Bad channel count, zero sample rate, empty or unreadable audio data.
    InvalidAudioFormat,

    /// A configuration value is outside its documented range.
    InvalidConfig,

    /// Failed to create the inference environment or load the model.
    /// Trigger: missing/corrupt model file, ONNX Runtime init failure.
    EngineLoadFailed,

    /// Failed to fetch the model file.
    /// Trigger: network error, disk full during download.
    ModelDownloadFailed,

    /// The engine resource was initialized while a handle was still live.
    AlreadyInitialized,

    /// Model inference failed.
    InferenceFailed,

    /// Note decoding or MIDI serialization failed.
    EncodingFailed,

    /// File or directory access failed.
    Io,

    /// An output path exists but is not a directory.
    NotADirectory,

    /// A daemon command line could not be parsed.
    Protocol,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidAudioFormat => "INVALID_AUDIO_FORMAT",
            ErrorCode::InvalidConfig => "INVALID_CONFIG",
            ErrorCode::EngineLoadFailed => "ENGINE_LOAD_FAILED",
            ErrorCode::ModelDownloadFailed => "MODEL_DOWNLOAD_FAILED",
            ErrorCode::AlreadyInitialized => "ALREADY_INITIALIZED",
            ErrorCode::InferenceFailed => "INFERENCE_FAILED",
            ErrorCode::EncodingFailed => "ENCODING_FAILED",
            ErrorCode::Io => "IO_ERROR",
            ErrorCode::NotADirectory => "NOT_A_DIRECTORY",
            ErrorCode::Protocol => "PROTOCOL_ERROR",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::InvalidAudioFormat => "Audio data is not usable mono or stereo PCM",
            ErrorCode::InvalidConfig => "A configuration value is out of range",
            ErrorCode::EngineLoadFailed => "Failed to load the transcription model",
            ErrorCode::ModelDownloadFailed => "Failed to download the transcription model",
            ErrorCode::AlreadyInitialized => "The transcription engine is already initialized",
            ErrorCode::InferenceFailed => "Model inference failed",
            ErrorCode::EncodingFailed => "Failed to encode notes as MIDI",
            ErrorCode::Io => "File system access failed",
            ErrorCode::NotADirectory => "Output path is not a directory",
            ErrorCode::Protocol => "Malformed daemon command",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::InvalidAudioFormat => {
                "Provide a non-empty mono or stereo WAV file (PCM integer or float)"
            }
            ErrorCode::InvalidConfig => "Run with --help to see the accepted range of each option",
            ErrorCode::EngineLoadFailed => {
                "Check that the model file exists and is a valid ONNX model, \
                 or set BASICPITCH_MODEL_PATH to point at one"
            }
            ErrorCode::ModelDownloadFailed => {
                "Check the internet connection or download nmp.onnx manually \
                 and set BASICPITCH_MODEL_PATH"
            }
            ErrorCode::AlreadyInitialized => {
                "Shut the existing engine down before initializing a new one"
            }
            ErrorCode::InferenceFailed => {
                "Retry with a shorter file or check system memory; the engine stays usable"
            }
            ErrorCode::EncodingFailed => "Retry with different thresholds or a tempo in range",
            ErrorCode::Io => "Check that the path exists and is readable/writable",
            ErrorCode::NotADirectory => "Choose an output path that is a directory or does not exist",
            ErrorCode::Protocol => {
                "Send `process \"<input>\" [\"<output-dir>\"]`, `quit` or `exit`"
            }
        }
    }

    /// Returns true if the error only aborts the current job.
    pub fn is_job_scoped(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidAudioFormat
                | ErrorCode::InferenceFailed
                | ErrorCode::EncodingFailed
                | ErrorCode::Io
                | ErrorCode::NotADirectory
        )
    }

    /// Returns true if the hosting process cannot continue.
    pub fn is_process_fatal(&self) -> bool {
        matches!(
            self,
            ErrorCode::EngineLoadFailed | ErrorCode::ModelDownloadFailed
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for transcription operations.
#[derive(Debug)]
pub struct TranscribeError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TranscribeError {
    /// Creates a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new error with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Re-tags this error under a pipeline stage code, keeping it as the cause.
    ///
    /// Errors already carrying `code` are returned unchanged.
    pub fn into_stage(self, code: ErrorCode, stage: &str) -> Self {
        if self.code == code {
            return self;
        }
        let message = format!("{} stage failed: {}", stage, self.message);
        Self::with_source(code, message, self)
    }

    /// Creates an INVALID_AUDIO_FORMAT error.
    pub fn invalid_audio(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAudioFormat, reason)
    }

    /// Creates an INVALID_AUDIO_FORMAT error for an unsupported channel count.
    pub fn unsupported_channels(channels: u16) -> Self {
        Self::new(
            ErrorCode::InvalidAudioFormat,
            format!(
                "Unsupported channel count: {} (only mono and stereo are supported)",
                channels
            ),
        )
    }

    /// Creates an INVALID_CONFIG error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfig, reason)
    }

    /// Creates an ENGINE_LOAD_FAILED error.
    pub fn engine_load_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::EngineLoadFailed,
            format!("Failed to load engine: {}", reason.into()),
        )
    }

    /// Creates a MODEL_DOWNLOAD_FAILED error.
    pub fn model_download_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ModelDownloadFailed,
            format!("Failed to download model: {}", reason.into()),
        )
    }

    /// Creates an ALREADY_INITIALIZED error.
    pub fn already_initialized() -> Self {
        Self::new(
            ErrorCode::AlreadyInitialized,
            "Engine handle is already live; shut it down before initializing again",
        )
    }

    /// Creates an INFERENCE_FAILED error.
    pub fn inference_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InferenceFailed,
            format!("Inference failed: {}", reason.into()),
        )
    }

    /// Creates an ENCODING_FAILED error.
    pub fn encoding_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::EncodingFailed,
            format!("MIDI encoding failed: {}", reason.into()),
        )
    }

    /// Creates an IO_ERROR wrapping a `std::io::Error`.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        let context = context.into();
        let message = format!("{}: {}", context, source);
        Self::with_source(ErrorCode::Io, message, source)
    }

    /// Creates a NOT_A_DIRECTORY error.
    pub fn not_a_directory(path: &std::path::Path) -> Self {
        Self::new(
            ErrorCode::NotADirectory,
            format!("{} exists but is not a directory", path.display()),
        )
    }

    /// Creates a PROTOCOL_ERROR.
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Protocol, reason)
    }
}

impl fmt::Display for TranscribeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for TranscribeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using TranscribeError.
pub type Result<T> = std::result::Result<T, TranscribeError>;
