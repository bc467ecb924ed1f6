use axum::{Json, http::StatusCode};

use crate::app::dto::WhoAmIResponse;
use crate::context::SubjectContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(subject: SubjectContext) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        subject_id: subject.subject_id(),
        token_id: subject.token_id(),
        expires_at: subject.expires_at(),
    })
}
