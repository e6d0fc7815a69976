use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use edugate_core::UserId;

use crate::{Actor, Role};

/// Session claims as handed over by the session/auth middleware.
///
/// Signature verification and cookie/token decoding happen outside this
/// crate; only the time window is validated here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject / user identifier.
    pub sub: UserId,

    pub display_name: String,

    /// The single role the user acts under for this session.
    pub role: Role,

    pub issued_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

impl SessionClaims {
    pub fn actor(&self) -> Actor {
        Actor::new(self.sub, self.display_name.clone(), self.role.clone())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("session has expired")]
    Expired,

    #[error("session not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid session time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate session claims against `now`.
pub fn validate_claims(claims: &SessionClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(issued_offset: i64, ttl: i64) -> SessionClaims {
        let issued_at = Utc::now() + Duration::seconds(issued_offset);
        SessionClaims {
            sub: UserId::new(),
            display_name: "Alice".to_string(),
            role: Role::new("teacher"),
            issued_at,
            expires_at: issued_at + Duration::seconds(ttl),
        }
    }

    #[test]
    fn accepts_claims_inside_window() {
        assert_eq!(validate_claims(&claims(-10, 3600), Utc::now()), Ok(()));
    }

    #[test]
    fn rejects_expired_and_future_claims() {
        assert_eq!(
            validate_claims(&claims(-7200, 3600), Utc::now()),
            Err(TokenValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&claims(600, 3600), Utc::now()),
            Err(TokenValidationError::NotYetValid)
        );
        assert_eq!(
            validate_claims(&claims(-10, 0), Utc::now()),
            Err(TokenValidationError::InvalidTimeWindow)
        );
    }
}
