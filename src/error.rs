//! Error types for the execution engine

use thiserror::Error;

/// Errors that can occur while executing queries, agents, teams and tools
#[derive(Debug, Error)]
pub enum EngineError {
    /// A referenced resource does not exist
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// A dependency exists but its address has not been resolved yet
    #[error("{kind} {name} address not yet resolved")]
    Unresolved { kind: &'static str, name: String },

    /// Bad configuration, parse failure, or missing required annotation
    #[error("validation error: {0}")]
    Validation(String),

    /// An upstream provider (model, tool, memory, engine) reported an error
    #[error("dependency error: {0}")]
    Dependency(String),

    /// Network or HTTP failure talking to a collaborator
    #[error("transport error: {0}")]
    Transport(String),

    /// A collaborator returned a response the engine could not interpret
    #[error("protocol parse error: {0}")]
    ProtocolParse(String),

    /// Execution was cancelled through the query scope
    #[error("operation cancelled")]
    Cancelled,

    /// Cooperative early termination of the enclosing team
    #[error("team terminated")]
    Terminate,
}

impl EngineError {
    /// Create a `NotFound` error for a named resource
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create an `Unresolved` error for a named resource
    pub fn unresolved(kind: &'static str, name: impl Into<String>) -> Self {
        Self::Unresolved {
            kind,
            name: name.into(),
        }
    }

    /// Whether this error is the terminate-team sentinel
    pub fn is_terminate(&self) -> bool {
        matches!(self, Self::Terminate)
    }

    /// Whether this error is a cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Transport(format!("request timed out: {}", err))
        } else if err.is_connect() {
            EngineError::Transport(format!("connection error: {}", err))
        } else if err.is_decode() {
            EngineError::ProtocolParse(err.to_string())
        } else {
            EngineError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::ProtocolParse(err.to_string())
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
