use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::repos::RepoError, cache::CacheError, domain::error::DomainError,
    infra::error::InfraError,
};

/// Flattened error chain for top-level reporting.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    /// All messages joined outermost first.
    pub fn chain(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Domain(_) | AppError::Validation(_) => 2,
            AppError::Infra(InfraError::Configuration { .. }) => 78,
            AppError::Infra(_) | AppError::Repo(_) => 74,
            AppError::Cache(_) | AppError::Unexpected(_) => 1,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_walks_the_source_chain() {
        let io = std::io::Error::other("snapshot unreadable");
        let error = AppError::from(InfraError::from(io));
        let report = error.report();
        assert_eq!(
            report.messages.first().map(String::as_str),
            Some("io error: snapshot unreadable")
        );
        assert_eq!(error.exit_code(), 74);
    }

    #[test]
    fn validation_errors_exit_with_usage_code() {
        assert_eq!(AppError::validation("bad --where").exit_code(), 2);
        assert_eq!(
            AppError::from(DomainError::validation("unknown property")).exit_code(),
            2
        );
        assert_eq!(
            AppError::from(InfraError::configuration("missing snapshot")).exit_code(),
            78
        );
    }
}
