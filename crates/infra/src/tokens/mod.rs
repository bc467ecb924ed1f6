//! Refresh-token persistence and lifecycle.

pub mod in_memory;
pub mod lifecycle;
pub mod postgres;
pub mod store;

pub use in_memory::InMemoryTokenStore;
pub use lifecycle::{LifecycleError, TokenLifecycleManager};
pub use postgres::PostgresTokenStore;
pub use store::{TokenStore, TokenStoreError, TokenUnitOfWork};
