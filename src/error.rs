//! Error types for the muse orchestration layer.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`MuseError::code()`].

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// The HTTP request could not be sent or the connection failed.
    pub const REQUEST_FAILED: &str = "REQUEST_FAILED";

    /// The server answered with a non-success status.
    pub const HTTP_STATUS: &str = "HTTP_STATUS";

    /// A streaming body failed mid-read.
    pub const STREAM_FAILED: &str = "STREAM_FAILED";

    /// The server answered without a readable body.
    pub const EMPTY_BODY: &str = "EMPTY_BODY";

    /// The speech engine reported a failure for an utterance.
    pub const SPEECH_FAILED: &str = "SPEECH_FAILED";

    /// The recognition engine reported a failure.
    pub const RECOGNITION_FAILED: &str = "RECOGNITION_FAILED";

    /// A downstream generation provider failed.
    pub const GENERATION_FAILED: &str = "GENERATION_FAILED";

    /// An internal channel closed before a reply arrived.
    pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";

    /// Filesystem I/O failed.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Top-level error type for the orchestration layer.
#[derive(Debug, thiserror::Error)]
pub enum MuseError {
    /// Invalid or missing configuration.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// The HTTP request could not be sent.
    #[error("[{}] {}", error_codes::REQUEST_FAILED, .0)]
    Request(String),

    /// Non-success HTTP status.
    #[error("[{}] HTTP {status}: {body}", error_codes::HTTP_STATUS)]
    Status {
        /// Numeric status code.
        status: u16,
        /// Response body (or the provider's error message).
        body: String,
    },

    /// Streaming body failed mid-read.
    #[error("[{}] {}", error_codes::STREAM_FAILED, .0)]
    Stream(String),

    /// The response carried no readable body.
    #[error("[{}] {}", error_codes::EMPTY_BODY, .0)]
    EmptyBody(String),

    /// Speech synthesis failed for one utterance.
    #[error("[{}] {}", error_codes::SPEECH_FAILED, .0)]
    Speech(String),

    /// Speech recognition failed.
    #[error("[{}] {}", error_codes::RECOGNITION_FAILED, .0)]
    Recognition(String),

    /// A generation provider failed.
    #[error("[{}] {}", error_codes::GENERATION_FAILED, .0)]
    Generation(String),

    /// Internal channel closed.
    #[error("[{}] {}", error_codes::CHANNEL_CLOSED, .0)]
    Channel(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl MuseError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Request(_) => error_codes::REQUEST_FAILED,
            Self::Status { .. } => error_codes::HTTP_STATUS,
            Self::Stream(_) => error_codes::STREAM_FAILED,
            Self::EmptyBody(_) => error_codes::EMPTY_BODY,
            Self::Speech(_) => error_codes::SPEECH_FAILED,
            Self::Recognition(_) => error_codes::RECOGNITION_FAILED,
            Self::Generation(_) => error_codes::GENERATION_FAILED,
            Self::Channel(_) => error_codes::CHANNEL_CLOSED,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Config(m)
            | Self::Request(m)
            | Self::Stream(m)
            | Self::EmptyBody(m)
            | Self::Speech(m)
            | Self::Recognition(m)
            | Self::Generation(m)
            | Self::Channel(m) => m.clone(),
            Self::Status { status, body } => format!("HTTP {status}: {body}"),
            Self::Io(e) => e.to_string(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MuseError>;
