//! Request-level failures. Per-case failures never show up here; they are
//! folded into the case's `TestResult` instead.

use arbiter_common::types::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Rejected before any workspace or container was allocated
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("invalid request: {0}")]
    InvalidRequest(#[from] ValidationError),

    /// The scratch directory could not be created or populated
    #[error("workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    /// The container runtime kept refusing to start sandboxes
    #[error("sandbox runtime unavailable after {attempts} attempt(s): {message}")]
    RuntimeUnavailable { attempts: u32, message: String },

    #[error("language registry error: {0}")]
    Registry(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
