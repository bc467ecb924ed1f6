//! Request-time authorization gate.
//!
//! Decision order, first match wins:
//!
//! 1. Route registered as exempt, or path under a public prefix → pass.
//! 2. `X-Resource-Id` absent or not an integer → `MissingResourceContext` (403).
//! 3. No authenticated subject → `Unauthenticated` (401).
//! 4. `X-Action-Type-Id` (integer), else `X-Action-Type` (name); neither →
//!    `MissingActionContext` (403).
//! 5. Permission graph denies → `Forbidden` (403); allows → pass.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, warn};

use keystone_auth::ActionRef;
use keystone_core::{ActionTypeId, ResourceId};

use crate::app::errors::json_error;
use crate::app::services::Resolver;
use crate::context::SubjectContext;

pub const RESOURCE_ID_HEADER: &str = "X-Resource-Id";
pub const ACTION_TYPE_ID_HEADER: &str = "X-Action-Type-Id";
pub const ACTION_TYPE_HEADER: &str = "X-Action-Type";

/// Path trees that never require authorization. Matched per segment:
/// `/docs` covers `/docs` and `/docs/...`, never `/docsign`.
pub const PUBLIC_PATH_PREFIXES: &[&str] = &["/health", "/auth/login", "/docs", "/swagger"];

/// Paths that never require authorization (exact match).
pub const PUBLIC_PATHS: &[&str] = &["/openapi.json"];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateRejection {
    #[error("missing or invalid resource header")]
    MissingResourceContext,

    #[error("missing action header")]
    MissingActionContext,

    #[error("user not authenticated")]
    Unauthenticated,

    #[error("permission denied")]
    Forbidden,
}

impl IntoResponse for GateRejection {
    fn into_response(self) -> Response {
        match self {
            GateRejection::Unauthenticated => {
                json_error(StatusCode::UNAUTHORIZED, "User not authenticated")
            }
            GateRejection::MissingResourceContext => json_error(
                StatusCode::FORBIDDEN,
                format!(
                    "Missing or invalid '{RESOURCE_ID_HEADER}' header. \
                     The endpoint requires a numeric resource identifier."
                ),
            ),
            GateRejection::MissingActionContext => json_error(
                StatusCode::FORBIDDEN,
                format!(
                    "Missing or invalid '{ACTION_TYPE_ID_HEADER}' header. \
                     Provide '{ACTION_TYPE_ID_HEADER}' or '{ACTION_TYPE_HEADER}'."
                ),
            ),
            GateRejection::Forbidden => json_error(
                StatusCode::FORBIDDEN,
                "You do not have permission to perform this action on this resource.",
            ),
        }
    }
}

/// Route templates that skip authorization, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct ExemptRoutes {
    paths: Arc<HashSet<String>>,
}

impl ExemptRoutes {
    pub fn new(paths: HashSet<String>) -> Self {
        Self {
            paths: Arc::new(paths),
        }
    }

    pub fn contains(&self, route: &str) -> bool {
        self.paths.contains(route)
    }
}

#[derive(Clone)]
pub struct GateState {
    pub exempt: ExemptRoutes,
    pub resolver: Arc<Resolver>,
}

/// Resource and action read from request headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTarget {
    pub resource: ResourceId,
    pub action: ActionRef,
}

pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
        || PUBLIC_PATH_PREFIXES.iter().any(|prefix| {
            path.strip_prefix(prefix)
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
}

pub fn resource_from_headers(headers: &HeaderMap) -> Option<ResourceId> {
    header_str(headers, RESOURCE_ID_HEADER)?.parse().ok()
}

/// An unparseable action id counts as absent, falling through to the name.
pub fn action_from_headers(headers: &HeaderMap) -> Option<ActionRef> {
    let id = header_str(headers, ACTION_TYPE_ID_HEADER)
        .and_then(|v| v.parse::<ActionTypeId>().ok());
    if let Some(id) = id {
        return Some(ActionRef::Id(id));
    }
    header_str(headers, ACTION_TYPE_HEADER).map(ActionRef::name)
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Everything before the permission lookup; `Ok(None)` means exempt.
pub fn precheck(
    exempt: &ExemptRoutes,
    matched: Option<&str>,
    path: &str,
    headers: &HeaderMap,
    subject: Option<&SubjectContext>,
) -> Result<Option<(SubjectContext, RequestTarget)>, GateRejection> {
    if matched.is_some_and(|m| exempt.contains(m)) || is_public_path(path) {
        return Ok(None);
    }

    let resource =
        resource_from_headers(headers).ok_or(GateRejection::MissingResourceContext)?;
    let subject = subject.copied().ok_or(GateRejection::Unauthenticated)?;
    let action = action_from_headers(headers).ok_or(GateRejection::MissingActionContext)?;

    Ok(Some((subject, RequestTarget { resource, action })))
}

/// Middleware form of the gate. Installed with `route_layer` so that
/// [`MatchedPath`] is available.
pub async fn authorization_gate(
    State(gate): State<GateState>,
    req: Request,
    next: Next,
) -> Response {
    let matched = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned());
    let checked = precheck(
        &gate.exempt,
        matched.as_deref(),
        req.uri().path(),
        req.headers(),
        req.extensions().get::<SubjectContext>(),
    );

    let (subject, target) = match checked {
        Ok(None) => return next.run(req).await,
        Ok(Some(found)) => found,
        Err(rejection) => {
            debug!(path = %req.uri().path(), %rejection, "request rejected by authorization gate");
            return rejection.into_response();
        }
    };

    let allowed = gate
        .resolver
        .has_permission(subject.subject_id(), target.resource, &target.action)
        .await;
    if !allowed {
        warn!(
            subject_id = %subject.subject_id(),
            resource_id = %target.resource,
            action = %target.action,
            "permission denied"
        );
        return GateRejection::Forbidden.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderName, HeaderValue};
    use chrono::Utc;
    use keystone_auth::AccessClaims;
    use keystone_core::SubjectId;

    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    fn subject() -> SubjectContext {
        let now = Utc::now();
        let claims = AccessClaims::new(SubjectId::new(1), now, now + chrono::Duration::minutes(5));
        SubjectContext::from_claims(&claims)
    }

    fn exempt() -> ExemptRoutes {
        ExemptRoutes::new(HashSet::from(["/auth/refresh".to_string()]))
    }

    #[test]
    fn exempt_and_public_routes_pass_without_headers() {
        let empty = HeaderMap::new();
        assert_eq!(
            precheck(&exempt(), Some("/auth/refresh"), "/auth/refresh", &empty, None),
            Ok(None)
        );
        assert_eq!(precheck(&exempt(), None, "/health", &empty, None), Ok(None));
        assert_eq!(
            precheck(&exempt(), None, "/docs/index.html", &empty, None),
            Ok(None)
        );
        assert_eq!(
            precheck(&exempt(), None, "/openapi.json", &empty, None),
            Ok(None)
        );
    }

    #[test]
    fn public_prefixes_match_whole_segments_only() {
        let empty = HeaderMap::new();
        for path in [
            "/healthcare/records",
            "/docsign",
            "/swagger-admin",
            "/auth/login-as",
            "/openapi.json/extra",
        ] {
            assert_eq!(
                precheck(&ExemptRoutes::default(), Some(path), path, &empty, None),
                Err(GateRejection::MissingResourceContext),
                "{path} must go through the gate"
            );
        }
        assert!(is_public_path("/health/ready"));
        assert!(is_public_path("/swagger"));
    }

    #[test]
    fn resource_header_is_checked_before_authentication() {
        let h = headers(&[(ACTION_TYPE_HEADER, "Read")]);
        assert_eq!(
            precheck(&exempt(), Some("/x"), "/x", &h, None),
            Err(GateRejection::MissingResourceContext)
        );

        let h = headers(&[(RESOURCE_ID_HEADER, "five")]);
        assert_eq!(
            precheck(&exempt(), Some("/x"), "/x", &h, Some(&subject())),
            Err(GateRejection::MissingResourceContext)
        );
    }

    #[test]
    fn missing_subject_is_unauthenticated() {
        let h = headers(&[(RESOURCE_ID_HEADER, "5")]);
        assert_eq!(
            precheck(&exempt(), Some("/x"), "/x", &h, None),
            Err(GateRejection::Unauthenticated)
        );
    }

    #[test]
    fn missing_action_is_reported_after_authentication() {
        let h = headers(&[(RESOURCE_ID_HEADER, "5")]);
        assert_eq!(
            precheck(&exempt(), Some("/x"), "/x", &h, Some(&subject())),
            Err(GateRejection::MissingActionContext)
        );
    }

    #[test]
    fn action_id_takes_priority_over_name() {
        let h = headers(&[
            (RESOURCE_ID_HEADER, "5"),
            (ACTION_TYPE_ID_HEADER, "4"),
            (ACTION_TYPE_HEADER, "Read"),
        ]);
        let (_, target) = precheck(&exempt(), Some("/x"), "/x", &h, Some(&subject()))
            .unwrap()
            .unwrap();
        assert_eq!(target.resource, ResourceId::new(5));
        assert_eq!(target.action, ActionRef::Id(ActionTypeId::new(4)));

        let h = headers(&[
            (RESOURCE_ID_HEADER, "5"),
            (ACTION_TYPE_ID_HEADER, "x"),
            (ACTION_TYPE_HEADER, "Read"),
        ]);
        let (_, target) = precheck(&exempt(), Some("/x"), "/x", &h, Some(&subject()))
            .unwrap()
            .unwrap();
        assert_eq!(target.action, ActionRef::name("Read"));
    }
}
