use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use keystone_auth::{PermissionEdge, RoleMembership};
use keystone_core::{ResourceId, RoleId, SubjectId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionStoreError {
    #[error("permission storage error: {0}")]
    Storage(String),
}

/// Read-only access to the authorization graph.
///
/// Implementations return edges with their activity flags intact; filtering on
/// those flags is the resolver's job.
#[async_trait]
pub trait PermissionGraphStore: Send + Sync {
    /// All role memberships of the subject, active or not.
    async fn memberships(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RoleMembership>, PermissionStoreError>;

    /// Role → permission edges from any of `roles` to a permission targeting
    /// `resource`.
    async fn edges_for(
        &self,
        roles: &[RoleId],
        resource: ResourceId,
    ) -> Result<Vec<PermissionEdge>, PermissionStoreError>;
}

#[async_trait]
impl<G> PermissionGraphStore for Arc<G>
where
    G: PermissionGraphStore + ?Sized,
{
    async fn memberships(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RoleMembership>, PermissionStoreError> {
        (**self).memberships(subject).await
    }

    async fn edges_for(
        &self,
        roles: &[RoleId],
        resource: ResourceId,
    ) -> Result<Vec<PermissionEdge>, PermissionStoreError> {
        (**self).edges_for(roles, resource).await
    }
}
