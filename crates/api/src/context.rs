use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use keystone_auth::AccessClaims;
use keystone_core::SubjectId;

use crate::gate::GateRejection;

/// Authenticated subject for a request, resolved from the bearer credential.
///
/// Inserted by the session middleware only when the credential validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubjectContext {
    subject_id: SubjectId,
    token_id: Uuid,
    expires_at: DateTime<Utc>,
}

impl SubjectContext {
    pub fn from_claims(claims: &AccessClaims) -> Self {
        Self {
            subject_id: claims.sub,
            token_id: claims.jti,
            expires_at: claims.expires_at,
        }
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    pub fn token_id(&self) -> Uuid {
        self.token_id
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Handlers taking `SubjectContext` reject with 401 when there is no session.
#[axum::async_trait]
impl<S> FromRequestParts<S> for SubjectContext
where
    S: Send + Sync,
{
    type Rejection = GateRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<SubjectContext>()
            .copied()
            .ok_or(GateRejection::Unauthenticated)
    }
}
