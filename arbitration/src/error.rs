//! Arbiter error types
//!
//! Intake errors are reported synchronously to the caller and are locally
//! recoverable; nothing here crashes the arbitration loop.

use thiserror::Error;

/// Result type alias for intake, registry, and queue operations
pub type ArbiterResult<T> = Result<T, ArbiterError>;

/// Errors raised at the intake boundary
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArbiterError {
    /// A pending case with this id is already registered
    #[error("Case already registered: {case_id}")]
    DuplicateCaseId { case_id: String },

    /// Link attempted against an unknown or evicted case
    #[error("Case not found: {case_id}")]
    CaseNotFound { case_id: String },

    /// Severity outside the configured ordinal range
    #[error("Severity {value} outside accepted range {min}..={max}")]
    InvalidSeverity { value: i64, min: u8, max: u8 },

    /// A required identifier was empty
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },
}

impl ArbiterError {
    /// Stable machine-readable code for intake responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateCaseId { .. } => "DUPLICATE_CASE_ID",
            Self::CaseNotFound { .. } => "CASE_NOT_FOUND",
            Self::InvalidSeverity { .. } => "INVALID_SEVERITY",
            Self::MissingField { .. } => "MISSING_FIELD",
        }
    }

    /// Short hint for the caller on how to recover.
    pub fn recovery_action(&self) -> &'static str {
        match self {
            Self::DuplicateCaseId { .. } => "Use a fresh case id or link the existing case",
            Self::CaseNotFound { .. } => {
                "Register the case again or submit the claim directly"
            }
            Self::InvalidSeverity { .. } => "Resubmit with a severity inside the accepted range",
            Self::MissingField { .. } => "Resubmit with every required field populated",
        }
    }
}

/// Reject empty identifiers before they reach the registry or queue.
pub(crate) fn require_non_empty(field: &'static str, value: &str) -> ArbiterResult<()> {
    if value.trim().is_empty() {
        return Err(ArbiterError::MissingField { field });
    }
    Ok(())
}
