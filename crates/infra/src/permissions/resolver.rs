use tracing::{Level, debug, error, instrument};

use keystone_auth::{ActionRef, active_role_ids, explain, is_granted};
use keystone_core::{ActionTypeId, ResourceId, RoleId, SubjectId};

use super::store::PermissionGraphStore;
use crate::SECURITY_TARGET;

/// Allow/deny decisions over the role → permission graph.
///
/// Every call reads the store of record; nothing is cached between calls.
/// Storage failures deny.
#[derive(Debug, Clone)]
pub struct PermissionGraphResolver<G> {
    graph: G,
}

impl<G> PermissionGraphResolver<G>
where
    G: PermissionGraphStore,
{
    pub fn new(graph: G) -> Self {
        Self { graph }
    }

    pub async fn has_permission_by_name(
        &self,
        subject: SubjectId,
        resource: ResourceId,
        action: &str,
    ) -> bool {
        self.has_permission(subject, resource, &ActionRef::name(action))
            .await
    }

    pub async fn has_permission_by_id(
        &self,
        subject: SubjectId,
        resource: ResourceId,
        action: ActionTypeId,
    ) -> bool {
        self.has_permission(subject, resource, &ActionRef::Id(action))
            .await
    }

    #[instrument(
        skip(self),
        fields(subject_id = %subject, resource_id = %resource, action = %action)
    )]
    pub async fn has_permission(
        &self,
        subject: SubjectId,
        resource: ResourceId,
        action: &ActionRef,
    ) -> bool {
        let memberships = match self.graph.memberships(subject).await {
            Ok(m) => m,
            Err(e) => {
                error!(
                    target: SECURITY_TARGET,
                    error = %e,
                    "membership lookup failed, denying"
                );
                return false;
            }
        };

        let roles: Vec<RoleId> = active_role_ids(&memberships).into_iter().collect();
        if roles.is_empty() {
            debug!("no active role memberships, denying");
            return false;
        }

        let edges = match self.graph.edges_for(&roles, resource).await {
            Ok(e) => e,
            Err(e) => {
                error!(
                    target: SECURITY_TARGET,
                    error = %e,
                    "permission edge lookup failed, denying"
                );
                return false;
            }
        };

        let granted = is_granted(&memberships, &edges, resource, action);
        if tracing::enabled!(Level::DEBUG) {
            let explanation = explain(&memberships, &edges, resource, action);
            debug!(granted, explanation = ?explanation, "permission decision");
        }
        granted
    }
}
