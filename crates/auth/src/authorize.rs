use std::time::Instant;

use serde::Serialize;
use thiserror::Error;

use crate::{Action, Actor, SessionClaims, TokenValidationError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("you don't have permission for `{action}` on `{resource}`")]
    Forbidden { resource: String, action: Action },

    #[error("permission store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("authorization check exceeded the request deadline")]
    DeadlineExceeded,
}

impl AuthzError {
    pub fn forbidden(resource: impl Into<String>, action: Action) -> Self {
        Self::Forbidden {
            resource: resource.into(),
            action,
        }
    }

    /// Message safe to show an end user.
    ///
    /// Denials name the action and resource only; infrastructure detail is
    /// left to the logs.
    pub fn user_message(&self) -> String {
        match self {
            AuthzError::Unauthenticated(_) => "authentication required".to_string(),
            AuthzError::Forbidden { .. } => self.to_string(),
            AuthzError::StoreUnavailable(_) | AuthzError::DeadlineExceeded => {
                "the request could not be authorized right now; please try again".to_string()
            }
        }
    }

    /// Transient infrastructure failures may be retried with backoff.
    /// Denials never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthzError::StoreUnavailable(_) | AuthzError::DeadlineExceeded)
    }
}

impl From<TokenValidationError> for AuthzError {
    fn from(value: TokenValidationError) -> Self {
        AuthzError::Unauthenticated(value.to_string())
    }
}

/// Everything the façade needs from the incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Claims established by the session middleware, if any.
    pub session: Option<SessionClaims>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Request deadline; permission checks past it fail closed.
    pub deadline: Option<Instant>,
}

impl RequestContext {
    pub fn with_session(session: SessionClaims) -> Self {
        Self {
            session: Some(session),
            ..Default::default()
        }
    }

    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// A successful authorization: who is acting, on what, and from where.
///
/// Handlers pass this straight into the audit recorder so the audited actor
/// is always the one that was checked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizedActor {
    pub actor: Actor,
    pub resource: String,
    pub action: Action,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_message_names_action_and_resource() {
        let err = AuthzError::forbidden("students", Action::Delete);
        assert_eq!(
            err.user_message(),
            "you don't have permission for `delete` on `students`"
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn store_failures_hide_detail_from_users() {
        let err = AuthzError::StoreUnavailable("connection refused to 10.0.0.4:5432".into());
        assert!(!err.user_message().contains("10.0.0.4"));
        assert!(err.is_retryable());
    }
}
