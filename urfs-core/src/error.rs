use thiserror::Error;

pub type Result<T> = std::result::Result<T, UrfsError>;

#[derive(Error, Debug)]
pub enum UrfsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File name already in use: {0}")]
    FileNameInUse(String),

    #[error("File already exists with hash {0}")]
    FileAlreadyExists(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UrfsError {
    /// Stable identifier carried in error responses so remote callers can
    /// rebuild the typed failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "io",
            Self::Database(_) => "database",
            Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::FileNotFound(_) => "file_not_found",
            Self::FileNameInUse(_) => "file_name_in_use",
            Self::FileAlreadyExists(_) => "file_already_exists",
            Self::InvalidReference(_) => "invalid_reference",
            Self::InvalidChunk(_) => "invalid_chunk",
            Self::SessionNotFound(_) => "session_not_found",
            Self::EventBus(_) => "event_bus",
            Self::Http(_) => "http",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal",
        }
    }

    /// The bare payload of a domain failure (name, hash, id), without the
    /// display prefix.
    pub fn detail(&self) -> String {
        match self {
            Self::Config(detail)
            | Self::FileNotFound(detail)
            | Self::FileNameInUse(detail)
            | Self::FileAlreadyExists(detail)
            | Self::InvalidReference(detail)
            | Self::InvalidChunk(detail)
            | Self::SessionNotFound(detail)
            | Self::EventBus(detail)
            | Self::Http(detail)
            | Self::InvalidRequest(detail)
            | Self::Internal(detail) => detail.clone(),
            other => other.to_string(),
        }
    }

    /// Rebuild an error from a remote `{kind, detail}` response body.
    pub fn from_remote(kind: &str, detail: String) -> Self {
        match kind {
            "config" => Self::Config(detail),
            "file_not_found" => Self::FileNotFound(detail),
            "file_name_in_use" => Self::FileNameInUse(detail),
            "file_already_exists" => Self::FileAlreadyExists(detail),
            "invalid_reference" => Self::InvalidReference(detail),
            "invalid_chunk" => Self::InvalidChunk(detail),
            "session_not_found" => Self::SessionNotFound(detail),
            "event_bus" => Self::EventBus(detail),
            "invalid_request" => Self::InvalidRequest(detail),
            "internal" => Self::Internal(detail),
            _ => Self::Http(detail),
        }
    }
}

impl From<redis::RedisError> for UrfsError {
    fn from(err: redis::RedisError) -> Self {
        UrfsError::EventBus(err.to_string())
    }
}

impl From<reqwest::Error> for UrfsError {
    fn from(err: reqwest::Error) -> Self {
        UrfsError::Http(err.to_string())
    }
}
