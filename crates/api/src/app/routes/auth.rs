use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, State},
    http::HeaderMap,
};

use crate::app::dto::{RefreshTokenRequest, SessionView, SuccessResponse, TokenPair};
use crate::app::errors::ApiError;
use crate::app::routes::common::{client_origin, device};
use crate::app::services::AppState;
use crate::context::SubjectContext;

pub async fn refresh(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let origin = client_origin(&headers, peer, state.trust_forwarded_for);
    let pair = state
        .sessions
        .refresh(&body.refresh_token, origin, device(&headers))
        .await?;
    Ok(Json(pair))
}

/// Unknown, foreign and already-terminal tokens all answer `Success: false`.
pub async fn revoke(
    State(state): State<AppState>,
    subject: SubjectContext,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(body): Json<RefreshTokenRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    let origin = client_origin(&headers, peer, state.trust_forwarded_for);
    let success = state
        .sessions
        .revoke(subject.subject_id(), &body.refresh_token, origin)
        .await?;
    Ok(Json(SuccessResponse { success }))
}

pub async fn revoke_all(
    State(state): State<AppState>,
    subject: SubjectContext,
) -> Result<Json<SuccessResponse>, ApiError> {
    let success = state.sessions.revoke_all(subject.subject_id()).await?;
    Ok(Json(SuccessResponse { success }))
}

pub async fn sessions(
    State(state): State<AppState>,
    subject: SubjectContext,
) -> Result<Json<Vec<SessionView>>, ApiError> {
    Ok(Json(state.sessions.sessions(subject.subject_id()).await?))
}
