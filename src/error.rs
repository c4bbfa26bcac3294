use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("seed deserialization error: {0}")]
    SeedFormat(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SimResult<T> = Result<T, SimError>;

impl SimError {
    /// Stable snake_case kind token carried on the wire envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            SimError::InvalidSeed(_) => "invalid_seed",
            SimError::InvalidConfig(_) => "invalid_config",
            SimError::NotFound(_) => "not_found",
            SimError::InvalidParameter(_) => "invalid_parameter",
            SimError::Conflict(_) => "conflict",
            SimError::Cancelled(_) => "cancelled",
            SimError::SeedFormat(_) => "invalid_seed",
            SimError::Internal(_) => "internal",
        }
    }
}

/// Error shape handed to the HTTP collaborator. No stack traces cross this
/// boundary; the message is the human-readable half of the pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&SimError> for ErrorEnvelope {
    fn from(err: &SimError) -> Self {
        ErrorEnvelope {
            error: err.kind().to_string(),
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl From<SimError> for ErrorEnvelope {
    fn from(err: SimError) -> Self {
        ErrorEnvelope::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_tokens() {
        assert_eq!(SimError::InvalidSeed("x".into()).kind(), "invalid_seed");
        assert_eq!(SimError::Conflict("x".into()).kind(), "conflict");
        assert_eq!(
            SimError::InvalidParameter("bad date".into()).kind(),
            "invalid_parameter"
        );
    }

    #[test]
    fn envelope_carries_kind_and_message() {
        let env: ErrorEnvelope = SimError::NotFound("pr 42".into()).into();
        assert_eq!(env.error, "not_found");
        assert!(env.message.contains("pr 42"));
    }
}
