// Central Error Type for the Invoker

use thiserror::Error;

/// Invocation error type
#[derive(Error, Debug)]
pub enum InvokeError {
    /// openssl ran but the outcome was not a success. The message is the raw
    /// stderr text, possibly empty.
    #[error("{stderr}")]
    Process { code: Option<i32>, stderr: String },

    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Execution error: {0}")]
    Execution(#[from] crate::port::ExecutionError),

    #[error("Invocation task ended without reporting a result")]
    Abandoned,

    #[error("Invocation requires a Tokio runtime")]
    NoRuntime,
}

impl InvokeError {
    /// Subprocess exit code, when the error came from a finished process
    pub fn code(&self) -> Option<i32> {
        match self {
            InvokeError::Process { code, .. } => *code,
            _ => None,
        }
    }

    /// Subprocess stderr text, when the error came from a finished process
    pub fn stderr(&self) -> Option<&str> {
        match self {
            InvokeError::Process { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

/// Result type alias using InvokeError
pub type Result<T> = std::result::Result<T, InvokeError>;
