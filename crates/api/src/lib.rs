//! HTTP surface: token exchange endpoints and the authorization gate.

pub mod app;
pub mod context;
pub mod gate;
pub mod middleware;
pub mod routes;
