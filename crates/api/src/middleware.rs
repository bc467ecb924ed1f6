use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use keystone_auth::JwtValidator;
use keystone_core::Clock;

use crate::context::SubjectContext;

#[derive(Clone)]
pub struct SessionState {
    pub access_tokens: Arc<dyn JwtValidator>,
    pub clock: Arc<dyn Clock>,
}

/// Resolve the subject from a bearer credential, if any.
///
/// Never rejects: requests without a valid credential continue without a
/// [`SubjectContext`], and the gate or the handler decides what that means.
pub async fn session_middleware(
    State(state): State<SessionState>,
    mut req: Request,
    next: Next,
) -> Response {
    let validated = extract_bearer(req.headers())
        .map(|token| state.access_tokens.validate(token, state.clock.now()));
    match validated {
        Some(Ok(claims)) => {
            req.extensions_mut().insert(SubjectContext::from_claims(&claims));
        }
        Some(Err(e)) => debug!(error = %e, "bearer credential rejected"),
        None => {}
    }

    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then_some(token)
}
