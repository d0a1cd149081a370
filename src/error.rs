// error.rs
// Description: Error taxonomy for the playground engine. Reason strings are stable
//              snake_case codes so callers and logs can match on them.
// History:
// - 2026-10-12: Replace ad hoc String errors with a typed enum.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaygroundError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("index {index} out of range for {len} layers")]
    OutOfRange { index: usize, len: usize },

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PlaygroundError {
    pub fn invalid_input(s_reason: &str) -> Self {
        Self::InvalidInput(s_reason.to_string())
    }

    pub fn not_ready(s_reason: &str) -> Self {
        Self::NotReady(s_reason.to_string())
    }

    pub fn persistence(s_reason: impl Into<String>) -> Self {
        Self::Persistence(s_reason.into())
    }

    // Errors the UI should surface but that never end the session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

impl From<serde_json::Error> for PlaygroundError {
    fn from(e: serde_json::Error) -> Self {
        Self::Persistence(format!("record_json_error: {}", e))
    }
}

impl From<std::io::Error> for PlaygroundError {
    fn from(e: std::io::Error) -> Self {
        Self::Persistence(format!("record_io_error: {}", e))
    }
}

impl From<toml::de::Error> for PlaygroundError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(format!("config_toml_error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, PlaygroundError>;
