//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: backend wiring and the session service
//! - `routes/`: HTTP handlers, registered with their authorization flag
//! - `dto.rs`: request/response DTOs
//! - `errors.rs`: the shared JSON error envelope

use axum::Router;
use tower::ServiceBuilder;

use crate::gate::{self, GateState};
use crate::middleware::{self, SessionState};

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppState, build_state};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Layer order per request: session resolution, routing, authorization gate,
/// handler.
pub fn build_app(state: AppState) -> Router {
    let (router, exempt) = routes::registry().into_parts();

    let gate_state = GateState {
        exempt,
        resolver: state.resolver.clone(),
    };
    let session_state = SessionState {
        access_tokens: state.access_tokens.clone(),
        clock: state.clock.clone(),
    };

    router
        .route_layer(axum::middleware::from_fn_with_state(
            gate_state,
            gate::authorization_gate,
        ))
        .layer(
            ServiceBuilder::new().layer(axum::middleware::from_fn_with_state(
                session_state,
                middleware::session_middleware,
            )),
        )
        .with_state(state)
}
