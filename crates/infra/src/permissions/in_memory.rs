use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use keystone_auth::{PermissionEdge, RoleMembership};
use keystone_core::{ActionTypeId, PermissionId, ResourceId, RoleId, SubjectId};

use super::store::{PermissionGraphStore, PermissionStoreError};

#[derive(Debug, Clone)]
struct Node {
    active: bool,
}

#[derive(Debug, Clone)]
struct ActionNode {
    title: String,
    active: bool,
}

#[derive(Debug, Clone)]
struct PermissionNode {
    resource_id: ResourceId,
    action_type_id: ActionTypeId,
    active: bool,
}

#[derive(Debug, Default)]
struct Graph {
    roles: HashMap<RoleId, Node>,
    resources: HashMap<ResourceId, Node>,
    actions: HashMap<ActionTypeId, ActionNode>,
    permissions: HashMap<PermissionId, PermissionNode>,
    /// subject → role → membership active
    memberships: HashMap<SubjectId, BTreeMap<RoleId, bool>>,
    /// role → permission → edge active
    grants: HashMap<RoleId, BTreeMap<PermissionId, bool>>,
}

/// In-memory authorization graph for tests/dev.
///
/// Built with the `with_*` methods; `set_*_active` flips flags afterwards.
/// Edges referencing unknown nodes are treated as inactive.
#[derive(Debug, Default)]
pub struct InMemoryPermissionGraph {
    graph: RwLock<Graph>,
}

impl InMemoryPermissionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Graph> {
        self.graph.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_role(self, role: RoleId) -> Self {
        self.write().roles.insert(role, Node { active: true });
        self
    }

    pub fn with_resource(self, resource: ResourceId) -> Self {
        self.write().resources.insert(resource, Node { active: true });
        self
    }

    pub fn with_action(self, action: ActionTypeId, title: impl Into<String>) -> Self {
        self.write().actions.insert(
            action,
            ActionNode {
                title: title.into(),
                active: true,
            },
        );
        self
    }

    pub fn with_permission(
        self,
        permission: PermissionId,
        resource: ResourceId,
        action: ActionTypeId,
    ) -> Self {
        self.write().permissions.insert(
            permission,
            PermissionNode {
                resource_id: resource,
                action_type_id: action,
                active: true,
            },
        );
        self
    }

    pub fn with_membership(self, subject: SubjectId, role: RoleId) -> Self {
        self.write()
            .memberships
            .entry(subject)
            .or_default()
            .insert(role, true);
        self
    }

    pub fn with_grant(self, role: RoleId, permission: PermissionId) -> Self {
        self.write()
            .grants
            .entry(role)
            .or_default()
            .insert(permission, true);
        self
    }

    pub fn set_role_active(&self, role: RoleId, active: bool) {
        if let Some(n) = self.write().roles.get_mut(&role) {
            n.active = active;
        }
    }

    pub fn set_resource_active(&self, resource: ResourceId, active: bool) {
        if let Some(n) = self.write().resources.get_mut(&resource) {
            n.active = active;
        }
    }

    pub fn set_action_active(&self, action: ActionTypeId, active: bool) {
        if let Some(n) = self.write().actions.get_mut(&action) {
            n.active = active;
        }
    }

    pub fn set_permission_active(&self, permission: PermissionId, active: bool) {
        if let Some(n) = self.write().permissions.get_mut(&permission) {
            n.active = active;
        }
    }

    pub fn set_membership_active(&self, subject: SubjectId, role: RoleId, active: bool) {
        if let Some(flag) = self
            .write()
            .memberships
            .get_mut(&subject)
            .and_then(|m| m.get_mut(&role))
        {
            *flag = active;
        }
    }

    pub fn set_grant_active(&self, role: RoleId, permission: PermissionId, active: bool) {
        if let Some(flag) = self
            .write()
            .grants
            .get_mut(&role)
            .and_then(|g| g.get_mut(&permission))
        {
            *flag = active;
        }
    }
}

#[async_trait]
impl PermissionGraphStore for InMemoryPermissionGraph {
    async fn memberships(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RoleMembership>, PermissionStoreError> {
        let graph = self
            .graph
            .read()
            .map_err(|_| PermissionStoreError::Storage("permission graph lock poisoned".into()))?;

        Ok(graph
            .memberships
            .get(&subject)
            .map(|roles| {
                roles
                    .iter()
                    .map(|(role_id, active)| RoleMembership {
                        role_id: *role_id,
                        membership_active: *active,
                        role_active: graph.roles.get(role_id).is_some_and(|r| r.active),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn edges_for(
        &self,
        roles: &[RoleId],
        resource: ResourceId,
    ) -> Result<Vec<PermissionEdge>, PermissionStoreError> {
        let graph = self
            .graph
            .read()
            .map_err(|_| PermissionStoreError::Storage("permission graph lock poisoned".into()))?;

        let resource_active = graph.resources.get(&resource).is_some_and(|r| r.active);
        let mut edges = Vec::new();
        for role_id in roles {
            let Some(grants) = graph.grants.get(role_id) else {
                continue;
            };
            for (permission_id, grant_active) in grants {
                let Some(permission) = graph.permissions.get(permission_id) else {
                    continue;
                };
                if permission.resource_id != resource {
                    continue;
                }
                let (action_title, action_active) = graph
                    .actions
                    .get(&permission.action_type_id)
                    .map(|a| (a.title.clone(), a.active))
                    .unwrap_or_default();

                edges.push(PermissionEdge {
                    role_id: *role_id,
                    role_permission_active: *grant_active,
                    permission_id: *permission_id,
                    permission_active: permission.active,
                    resource_id: resource,
                    resource_active,
                    action_type_id: permission.action_type_id,
                    action_title,
                    action_active,
                });
            }
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn edges_carry_every_flag() {
        let graph = InMemoryPermissionGraph::new()
            .with_role(RoleId::new(1))
            .with_resource(ResourceId::new(5))
            .with_action(ActionTypeId::new(1), "Read")
            .with_permission(PermissionId::new(10), ResourceId::new(5), ActionTypeId::new(1))
            .with_membership(SubjectId::new(1), RoleId::new(1))
            .with_grant(RoleId::new(1), PermissionId::new(10));
        graph.set_resource_active(ResourceId::new(5), false);

        let edges = graph.edges_for(&[RoleId::new(1)], ResourceId::new(5)).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert!(!edges[0].resource_active);
        assert!(edges[0].permission_active);
        assert_eq!(edges[0].action_title, "Read");

        assert!(graph
            .edges_for(&[RoleId::new(1)], ResourceId::new(6))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unknown_role_node_reads_as_inactive() {
        let graph =
            InMemoryPermissionGraph::new().with_membership(SubjectId::new(1), RoleId::new(9));
        let memberships = graph.memberships(SubjectId::new(1)).await.unwrap();
        assert_eq!(memberships.len(), 1);
        assert!(memberships[0].membership_active);
        assert!(!memberships[0].role_active);
    }
}
