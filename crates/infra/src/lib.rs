//! Infrastructure layer: stores, lifecycle orchestration, background workers, config.

pub mod config;
pub mod permissions;
pub mod tokens;
pub mod workers;

/// Log target of security-relevant events (token reuse, evictions,
/// fail-closed authorization).
pub const SECURITY_TARGET: &str = "keystone::security";

pub use config::{ConfigError, KeystoneConfig};
pub use permissions::{
    InMemoryPermissionGraph, PermissionGraphResolver, PermissionGraphStore, PermissionStoreError,
    PostgresPermissionGraph,
};
pub use tokens::{
    InMemoryTokenStore, LifecycleError, PostgresTokenStore, TokenLifecycleManager, TokenStore,
    TokenStoreError, TokenUnitOfWork,
};
pub use workers::token_cleanup::{CleanupHandle, TokenCleanupWorker};
