//! Errors raised while running declarations

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use subarrow_plan::{ErrorKind, PlanError};
use subarrow_substrait::SubstraitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Substrait(#[from] SubstraitError),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::NotImplemented(_) => ErrorKind::NotImplemented,
            ExecError::Plan(e) => e.kind(),
            ExecError::Substrait(e) => e.kind(),
            ExecError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            ExecError::Invalid(_)
            | ExecError::Arrow(_)
            | ExecError::Parquet(_)
            | ExecError::Io(_) => ErrorKind::Invalid,
        }
    }
}

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

pub(crate) fn invalid(message: impl Into<String>) -> ExecError {
    ExecError::Invalid(message.into())
}

pub(crate) fn not_implemented(message: impl Into<String>) -> ExecError {
    ExecError::NotImplemented(message.into())
}
