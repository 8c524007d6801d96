use std::io;
use thiserror::Error;

/// Custom error type for the roscope engine
#[derive(Error, Debug)]
pub enum RoscopeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("Inspector error: {0}")]
    Inspector(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Telemetry error: {0}")]
    Telemetry(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for the roscope engine
pub type Result<T> = std::result::Result<T, RoscopeError>;

impl RoscopeError {
    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        RoscopeError::Config(msg.into())
    }

    /// Create a command error
    pub fn command<S: Into<String>>(msg: S) -> Self {
        RoscopeError::Command(msg.into())
    }

    /// Create an inspector error
    pub fn inspector<S: Into<String>>(msg: S) -> Self {
        RoscopeError::Inspector(msg.into())
    }

    /// Create a remote error
    pub fn remote<S: Into<String>>(msg: S) -> Self {
        RoscopeError::Remote(msg.into())
    }

    /// Create a snapshot error
    pub fn snapshot<S: Into<String>>(msg: S) -> Self {
        RoscopeError::Snapshot(msg.into())
    }

    /// Create a session error
    pub fn session<S: Into<String>>(msg: S) -> Self {
        RoscopeError::Session(msg.into())
    }

    /// Create a generic error
    pub fn other<S: Into<String>>(msg: S) -> Self {
        RoscopeError::Other(msg.into())
    }
}
