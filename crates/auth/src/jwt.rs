//! HS256 access-token encoding and verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use keystone_core::SubjectId;

use crate::claims::{AccessClaims, ClaimsValidationError, validate_claims};

#[derive(Debug, Error)]
pub enum AccessTokenError {
    #[error("malformed or forged access token: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),

    #[error(transparent)]
    Claims(#[from] ClaimsValidationError),
}

/// A freshly minted access credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Mints access credentials for an authenticated subject.
pub trait AccessTokenIssuer: Send + Sync {
    fn issue(
        &self,
        subject: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<IssuedAccessToken, AccessTokenError>;
}

/// Verifies access credentials presented on requests.
pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AccessTokenError>;
}

/// Symmetric HS256 issuer + validator.
#[derive(Clone)]
pub struct Hs256AccessTokens {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl core::fmt::Debug for Hs256AccessTokens {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hs256AccessTokens")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl Hs256AccessTokens {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }
}

impl AccessTokenIssuer for Hs256AccessTokens {
    fn issue(
        &self,
        subject: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<IssuedAccessToken, AccessTokenError> {
        let expires_at = now
            .checked_add_signed(self.ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let claims = AccessClaims::new(subject, now, expires_at);
        let token =
            jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        Ok(IssuedAccessToken {
            token,
            expires_at: claims.expires_at,
        })
    }
}

impl JwtValidator for Hs256AccessTokens {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AccessTokenError> {
        // Time checks run against `AccessClaims` (and the injected clock), not
        // the registered `exp` claim.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.decoding, &validation)?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_validate_until_expiry() {
        let tokens = Hs256AccessTokens::new(b"test-secret", Duration::minutes(15));
        let now = Utc::now();

        let issued = tokens.issue(SubjectId::new(9), now).unwrap();
        let claims = tokens.validate(&issued.token, now).unwrap();
        assert_eq!(claims.sub, SubjectId::new(9));
        assert_eq!(claims.expires_at, issued.expires_at);

        let err = tokens
            .validate(&issued.token, issued.expires_at)
            .unwrap_err();
        assert!(matches!(
            err,
            AccessTokenError::Claims(ClaimsValidationError::Expired)
        ));
    }

    #[test]
    fn tokens_signed_with_another_key_are_rejected() {
        let ours = Hs256AccessTokens::new(b"ours", Duration::minutes(15));
        let theirs = Hs256AccessTokens::new(b"theirs", Duration::minutes(15));
        let now = Utc::now();

        let forged = theirs.issue(SubjectId::new(1), now).unwrap();
        assert!(matches!(
            ours.validate(&forged.token, now),
            Err(AccessTokenError::Decode(_))
        ));
    }
}
