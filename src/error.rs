use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    // Transport errors
    #[error("Request failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        attempts: u32,
        last_status: Option<u16>,
        message: String,
    },

    #[error("Sandbox returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request timed out: {0}")]
    Timeout(String),

    // Protocol errors
    #[error("Failed to decode {context} response: {message}")]
    Decode { context: String, message: String },

    #[error("Sandbox reported an error: {0}")]
    Remote(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Stream closed before completion")]
    StreamClosed,

    // Sandbox state errors
    #[error("Port {current_port} is already bound (requested {requested}); unbind it first")]
    PortInUse { requested: u16, current_port: u16 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),
}

// A timed-out request may already have run on the sandbox.
impl From<reqwest::Error> for SandboxError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Http(e)
        }
    }
}

impl SandboxError {
    pub(crate) fn decode(context: &str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            context: context.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether retrying the whole operation later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RetriesExhausted { .. } | Self::StreamClosed => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Http(e) => e.is_connect(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// HTTP status observed from the sandbox, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::RetriesExhausted { last_status, .. } => *last_status,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, SandboxError>;
