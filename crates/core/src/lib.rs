//! `keystone-core`: foundation building blocks shared by every Keystone crate.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::DomainError;
pub use id::{ActionTypeId, PermissionId, RecordId, ResourceId, RoleId, SubjectId};
