//! Permission-graph storage and resolution.

pub mod in_memory;
pub mod postgres;
pub mod resolver;
pub mod store;

pub use in_memory::InMemoryPermissionGraph;
pub use postgres::PostgresPermissionGraph;
pub use resolver::PermissionGraphResolver;
pub use store::{PermissionGraphStore, PermissionStoreError};
