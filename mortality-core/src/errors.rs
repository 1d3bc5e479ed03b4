//! Error types for the mortality pipeline

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MortalityError>;

#[derive(Error, Debug)]
pub enum MortalityError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Regression service error: {0}")]
    RegressionService(String),

    #[error("Regression service returned status {status}: {body}")]
    ServiceStatus { status: u16, body: String },

    #[error("Invalid label '{label}' for {granularity} data")]
    InvalidLabel { label: String, granularity: String },

    #[error("Unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },

    #[error("Regression service timeout")]
    Timeout,
}

impl MortalityError {
    /// Timeouts are final for a call; everything else may be retried.
    pub fn is_timeout(&self) -> bool {
        match self {
            MortalityError::Timeout => true,
            MortalityError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Whether another attempt could succeed. Timeouts and 4xx answers are
    /// final.
    pub fn is_retryable(&self) -> bool {
        match self {
            MortalityError::ServiceStatus { status, .. } => !(400..500).contains(status),
            other => !other.is_timeout(),
        }
    }
}

impl From<tokio::time::error::Elapsed> for MortalityError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        MortalityError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        assert!(MortalityError::Timeout.is_timeout());
        assert!(!MortalityError::RegressionService("503".into()).is_timeout());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let status = |status| MortalityError::ServiceStatus {
            status,
            body: String::new(),
        };
        assert!(!status(400).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!MortalityError::Timeout.is_retryable());
        assert!(MortalityError::RegressionService("reset".into()).is_retryable());
    }

    #[tokio::test]
    async fn test_elapsed_maps_to_timeout() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        let err: MortalityError = elapsed.into();
        assert!(matches!(err, MortalityError::Timeout));
    }
}
