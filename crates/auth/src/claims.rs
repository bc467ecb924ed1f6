use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use keystone_core::SubjectId;

/// Access-credential claims (transport-agnostic).
///
/// The access token is short-lived and stateless; the refresh token carries the
/// durable session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject identifier.
    pub sub: SubjectId,

    /// Unique token id.
    pub jti: Uuid,

    /// Issued-at timestamp.
    pub issued_at: DateTime<Utc>,

    /// Expiration timestamp.
    pub expires_at: DateTime<Utc>,
}

impl AccessClaims {
    pub fn new(sub: SubjectId, issued_at: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            sub,
            jti: Uuid::now_v7(),
            issued_at,
            expires_at,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Deterministically validate access claims.
///
/// Note: this validates the *claims* only. Signature verification lives in
/// [`crate::jwt`].
pub fn validate_claims(
    claims: &AccessClaims,
    now: DateTime<Utc>,
) -> Result<(), ClaimsValidationError> {
    if claims.expires_at <= claims.issued_at {
        return Err(ClaimsValidationError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(ClaimsValidationError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(ClaimsValidationError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn claims_window_is_half_open() {
        let now = Utc::now();
        let claims = AccessClaims::new(SubjectId::new(3), now, now + Duration::minutes(5));

        assert_eq!(validate_claims(&claims, now), Ok(()));
        assert_eq!(
            validate_claims(&claims, claims.expires_at),
            Err(ClaimsValidationError::Expired)
        );
        assert_eq!(
            validate_claims(&claims, now - Duration::seconds(1)),
            Err(ClaimsValidationError::NotYetValid)
        );
    }

    #[test]
    fn inverted_window_is_rejected() {
        let now = Utc::now();
        let claims = AccessClaims::new(SubjectId::new(3), now, now);
        assert_eq!(
            validate_claims(&claims, now),
            Err(ClaimsValidationError::InvalidTimeWindow)
        );
    }
}
