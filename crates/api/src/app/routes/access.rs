use axum::{Json, http::HeaderMap};

use crate::app::dto::AccessCheckResponse;
use crate::context::SubjectContext;
use crate::gate::{GateRejection, resource_from_headers};

/// Reached only after the gate granted the request; echoes what was checked.
pub async fn check(
    subject: SubjectContext,
    headers: HeaderMap,
) -> Result<Json<AccessCheckResponse>, GateRejection> {
    let resource_id =
        resource_from_headers(&headers).ok_or(GateRejection::MissingResourceContext)?;
    Ok(Json(AccessCheckResponse {
        allowed: true,
        subject_id: subject.subject_id(),
        resource_id,
    }))
}
