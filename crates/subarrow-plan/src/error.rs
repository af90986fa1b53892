//! Errors raised while building or binding native plans

use arrow::error::ArrowError;
use thiserror::Error;

/// Broad classification shared by every error in the workspace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The input is malformed
    Invalid,
    /// The input is well formed but uses something we do not support
    NotImplemented,
    /// A lookup by name, anchor or id failed
    NotFound,
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PlanError::Invalid(_) | PlanError::Arrow(_) => ErrorKind::Invalid,
            PlanError::NotImplemented(_) => ErrorKind::NotImplemented,
            PlanError::NotFound(_) => ErrorKind::NotFound,
        }
    }
}

pub type Result<T, E = PlanError> = std::result::Result<T, E>;
