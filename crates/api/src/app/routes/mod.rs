use axum::routing::{get, post};

use crate::app::services::AppState;
use crate::routes::{Access, RouteRegistry};

pub mod access;
pub mod auth;
pub mod common;
pub mod system;

/// Every API route with its authorization flag.
pub fn registry() -> RouteRegistry<AppState> {
    RouteRegistry::new()
        .route("/health", get(system::health), Access::Exempt)
        .route("/auth/refresh", post(auth::refresh), Access::Exempt)
        .route("/auth/revoke", post(auth::revoke), Access::Exempt)
        .route("/auth/revoke-all", post(auth::revoke_all), Access::Exempt)
        .route("/auth/sessions", get(auth::sessions), Access::Exempt)
        .route("/whoami", get(system::whoami), Access::Exempt)
        .route("/access/check", get(access::check), Access::Protected)
}
