use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedcronError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    #[error("Invalid timezone offset: {0}")]
    InvalidTimezone(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FeedcronError {
    /// Short, stable error code for CLI output and logs.
    pub fn code(&self) -> &'static str {
        match self {
            FeedcronError::Config(_) => "CONFIG_ERROR",
            FeedcronError::InvalidTime(_) => "INVALID_TIME",
            FeedcronError::InvalidTimezone(_) => "INVALID_TIMEZONE",
            FeedcronError::Serialization(_) => "SERIALIZATION_ERROR",
            FeedcronError::Io(_) => "IO_ERROR",
            FeedcronError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, FeedcronError>;
