use thiserror::Error;

/// Errors surfaced while building or configuring the observability core.
///
/// None of these are ever returned from a tracing call; they only come out of
/// construction paths such as `ObservabilityService::get_instance`.
#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Secure random source unavailable: {0}")]
    Entropy(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid traceparent header: {0}")]
    InvalidTraceparent(String),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

/// Errors raised by an individual provider call.
///
/// These are always absorbed at the fan-out boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Network failure: {0}")]
    Network(String),

    #[error("Serialization failure: {0}")]
    Serialization(String),

    #[error("Request rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Circuit breaker is open")]
    CircuitOpen,

    #[error("Record not found: {0}")]
    NotFound(String),
}

impl From<crate::services::database::DatabaseError> for ProviderError {
    fn from(err: crate::services::database::DatabaseError) -> Self {
        match err {
            crate::services::database::DatabaseError::NotFound(msg) => ProviderError::NotFound(msg),
            crate::services::database::DatabaseError::Serialization(msg) => {
                ProviderError::Serialization(msg)
            }
            other => ProviderError::Storage(other.to_string()),
        }
    }
}

impl From<crate::services::database::DatabaseError> for ObservabilityError {
    fn from(err: crate::services::database::DatabaseError) -> Self {
        ObservabilityError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Serialization(err.to_string())
    }
}

impl From<figment::Error> for ObservabilityError {
    fn from(err: figment::Error) -> Self {
        ObservabilityError::Config(err.to_string())
    }
}

impl From<garde::Report> for ObservabilityError {
    fn from(report: garde::Report) -> Self {
        ObservabilityError::Config(report.to_string())
    }
}
