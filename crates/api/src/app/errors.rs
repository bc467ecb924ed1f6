use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;

/// The error envelope every rejection uses:
/// `{ "StatusCode": 401, "Message": "...", "Timestamp": "<RFC 3339>" }`.
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "StatusCode": status.as_u16(),
            "Message": message.into(),
            "Timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

/// Failures of the token-exchange endpoints.
///
/// Unknown and terminal refresh tokens share one variant so responses do not
/// reveal whether a token ever existed.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("internal error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidRefreshToken => json_error(
                StatusCode::UNAUTHORIZED,
                "Invalid or expired refresh token",
            ),
            ApiError::Internal => {
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}
