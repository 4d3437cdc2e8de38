use std::error::Error as StdError;

use thiserror::Error;

use crate::{config::LoadError, infra::error::InfraError};

/// Top-level failure of a CLI command.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("{0}")]
    Rejected(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// The command ran but its outcome counts as a failure (for example a
    /// strict render that produced an error panel).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Rejected(_) => 1,
            AppError::Config(_) => 2,
            AppError::Infra(_) | AppError::Unexpected(_) => 3,
        }
    }
}

/// The error message followed by its chain of sources.
pub fn error_chain(error: &dyn StdError) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages
}
