//! Error type for the Substrait translators

use arrow::error::ArrowError;
use subarrow_plan::{ErrorKind, PlanError};
use subarrow_registry::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubstraitError {
    #[error("Invalid: {0}")]
    Invalid(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Failed to decode Substrait message: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("Failed to parse Substrait JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubstraitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubstraitError::NotImplemented(_) => ErrorKind::NotImplemented,
            SubstraitError::NotFound(_) => ErrorKind::NotFound,
            SubstraitError::Plan(e) => e.kind(),
            SubstraitError::Invalid(_)
            | SubstraitError::Registry(_)
            | SubstraitError::Decode(_)
            | SubstraitError::Json(_) => ErrorKind::Invalid,
        }
    }
}

impl From<ArrowError> for SubstraitError {
    fn from(e: ArrowError) -> Self {
        SubstraitError::Plan(PlanError::Arrow(e))
    }
}

pub type Result<T, E = SubstraitError> = std::result::Result<T, E>;

pub(crate) fn invalid(message: impl Into<String>) -> SubstraitError {
    SubstraitError::Invalid(message.into())
}

pub(crate) fn not_implemented(message: impl Into<String>) -> SubstraitError {
    SubstraitError::NotImplemented(message.into())
}
