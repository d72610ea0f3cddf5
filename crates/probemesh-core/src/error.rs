//! Error types for the probemesh engine.

use thiserror::Error;

/// Failure result delivered to a request's waiter
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// No response within the class timeout
    #[error("request timed out")]
    Timeout,

    /// Probe has no direct link and no repeater reports it
    #[error("no route to probe {0:08x}")]
    NoRoute(u32),

    /// The link carrying the request went away
    #[error("link disconnected")]
    Disconnected,

    /// Device answered with its failure flag set
    #[error("request rejected by device")]
    Rejected,

    /// A newer request of the same class to the same target replaced this one
    #[error("superseded by a newer request")]
    Superseded,

    /// Response decoded to a different class than expected
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Engine task is no longer running
    #[error("engine stopped")]
    EngineStopped,
}

/// Engine API error type
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
