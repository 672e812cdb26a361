//! # AppError
//!
//! Centralized error handling for the CRM core.
//! Maps domain-specific failures to actionable error types.

use thiserror::Error;

/// The primary error type for all crm-core and crm-services operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., Segment, Campaign, Customer)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., unknown rule field, empty message content)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Order status change outside the allowed transition graph
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Resource already exists or is busy (e.g., duplicate email, campaign already dispatching)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Failure outside the per-recipient loop; the campaign has been marked failed
    #[error("campaign dispatch failed: {0}")]
    Dispatch(String),

    /// Infrastructure failure (e.g., store unavailable)
    #[error("internal service error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        Self::NotFound(entity.to_string(), id.to_string())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }
}

/// Raised by a store when a write collides with a uniqueness constraint.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct DuplicateKey(pub String);

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<DuplicateKey>() {
            Ok(dup) => Self::Conflict(dup.0),
            Err(err) => Self::Internal(format!("{err:#}")),
        }
    }
}

/// A specialized Result type for CRM logic.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_entity_and_id() {
        let err = AppError::not_found("Campaign", "42");
        assert_eq!(err.to_string(), "Campaign not found with ID 42");
    }

    #[test]
    fn port_failures_become_internal() {
        let err: AppError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, AppError::Internal(msg) if msg == "disk full"));
    }

    #[test]
    fn duplicate_keys_become_conflicts() {
        let err: AppError = anyhow::Error::new(DuplicateKey("email taken".into())).into();
        assert!(matches!(err, AppError::Conflict(msg) if msg == "email taken"));
    }
}
