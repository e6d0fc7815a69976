//! Errors for malformed identifiers.

use thiserror::Error;

/// An identifier could not be built from its input.
///
/// Raised at parse boundaries (CLI arguments, stored text, request paths);
/// everything past them works with already-valid ids.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid {kind}: {reason}")]
    InvalidId { kind: &'static str, reason: String },

    #[error("{0} must not be blank")]
    Blank(&'static str),
}

impl DomainError {
    pub fn invalid_id(kind: &'static str, reason: impl ToString) -> Self {
        Self::InvalidId {
            kind,
            reason: reason.to_string(),
        }
    }
}
