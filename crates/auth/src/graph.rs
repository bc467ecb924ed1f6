//! Permission-graph traversal.
//!
//! ```text
//! Subject ─(membership)─▶ Role ─(role-permission)─▶ Permission ─▶ (Resource, ActionType)
//! ```
//!
//! A path counts only when every node and every edge on it is active. There is
//! no wildcard, no inheritance and no role hierarchy: membership is flat.
//!
//! Everything here is pure; callers materialize the edge sets from their store.

use std::collections::BTreeSet;

use serde::Serialize;

use keystone_core::{ActionTypeId, PermissionId, ResourceId, RoleId};

/// A subject's membership in a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleMembership {
    pub role_id: RoleId,
    pub membership_active: bool,
    pub role_active: bool,
}

impl RoleMembership {
    pub fn is_active(&self) -> bool {
        self.membership_active && self.role_active
    }
}

/// A role → permission grant, flattened with the permission's fixed target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionEdge {
    pub role_id: RoleId,
    pub role_permission_active: bool,

    pub permission_id: PermissionId,
    pub permission_active: bool,

    pub resource_id: ResourceId,
    pub resource_active: bool,

    pub action_type_id: ActionTypeId,
    pub action_title: String,
    pub action_active: bool,
}

impl PermissionEdge {
    /// Edge, permission, resource and action flags all set.
    pub fn is_active(&self) -> bool {
        self.role_permission_active
            && self.permission_active
            && self.resource_active
            && self.action_active
    }

    fn inactive_links(&self) -> Vec<InactiveLink> {
        let mut links = Vec::new();
        if !self.role_permission_active {
            links.push(InactiveLink::RolePermission);
        }
        if !self.permission_active {
            links.push(InactiveLink::Permission);
        }
        if !self.resource_active {
            links.push(InactiveLink::Resource);
        }
        if !self.action_active {
            links.push(InactiveLink::ActionType);
        }
        links
    }
}

/// The requested action, by id or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRef {
    Id(ActionTypeId),
    /// Compared case-insensitively against the action title.
    Name(String),
}

impl ActionRef {
    pub fn name(name: impl Into<String>) -> Self {
        Self::Name(name.into())
    }

    pub fn matches(&self, edge: &PermissionEdge) -> bool {
        match self {
            ActionRef::Id(id) => edge.action_type_id == *id,
            ActionRef::Name(name) => edge.action_title.to_lowercase() == name.to_lowercase(),
        }
    }
}

impl core::fmt::Display for ActionRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ActionRef::Id(id) => write!(f, "action#{id}"),
            ActionRef::Name(name) => f.write_str(name),
        }
    }
}

/// Roles reachable through active memberships of active roles.
pub fn active_role_ids(memberships: &[RoleMembership]) -> BTreeSet<RoleId> {
    memberships
        .iter()
        .filter(|m| m.is_active())
        .map(|m| m.role_id)
        .collect()
}

/// Decide whether a fully-active path to `(resource, action)` exists.
///
/// Empty active role set ⇒ deny.
pub fn is_granted(
    memberships: &[RoleMembership],
    edges: &[PermissionEdge],
    resource: ResourceId,
    action: &ActionRef,
) -> bool {
    let roles = active_role_ids(memberships);
    if roles.is_empty() {
        return false;
    }

    edges.iter().any(|e| {
        roles.contains(&e.role_id)
            && e.resource_id == resource
            && action.matches(e)
            && e.is_active()
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Which link of an otherwise matching path was switched off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveLink {
    Membership,
    Role,
    RolePermission,
    Permission,
    Resource,
    ActionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// The subject has no active role membership at all.
    NoActiveRoles,
    /// No role of the subject is granted `(resource, action)`, active or not.
    NoGrantForResourceAction,
    /// Matching paths exist but each passes through an inactive link.
    InactivePath { inactive: Vec<InactiveLink> },
}

/// Detailed explanation of a permission decision.
///
/// Produced for logging and debugging only; [`is_granted`] is the decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub resource_id: ResourceId,
    pub action: ActionRef,
    pub granted: bool,
    pub active_roles: Vec<RoleId>,
    /// Permissions that satisfied the request (empty on deny).
    pub granting_permissions: Vec<PermissionId>,
    pub denial: Option<DenialKind>,
}

/// Explain the decision [`is_granted`] makes for the same inputs.
pub fn explain(
    memberships: &[RoleMembership],
    edges: &[PermissionEdge],
    resource: ResourceId,
    action: &ActionRef,
) -> AuthorizationExplanation {
    let roles = active_role_ids(memberships);
    let mut explanation = AuthorizationExplanation {
        resource_id: resource,
        action: action.clone(),
        granted: false,
        active_roles: roles.iter().copied().collect(),
        granting_permissions: Vec::new(),
        denial: None,
    };

    if roles.is_empty() {
        explanation.denial = Some(DenialKind::NoActiveRoles);
        return explanation;
    }

    let candidates: Vec<&PermissionEdge> = edges
        .iter()
        .filter(|e| e.resource_id == resource && action.matches(e))
        .collect();

    explanation.granting_permissions = candidates
        .iter()
        .filter(|e| roles.contains(&e.role_id) && e.is_active())
        .map(|e| e.permission_id)
        .collect();

    if !explanation.granting_permissions.is_empty() {
        explanation.granted = true;
        return explanation;
    }

    // Collect the switched-off links across every candidate path, including
    // grants to roles the subject holds only through inactive memberships.
    let mut inactive: BTreeSet<InactiveLink> = BTreeSet::new();
    for edge in &candidates {
        let membership = memberships.iter().find(|m| m.role_id == edge.role_id);
        let Some(membership) = membership else {
            continue;
        };
        if !membership.membership_active {
            inactive.insert(InactiveLink::Membership);
        }
        if !membership.role_active {
            inactive.insert(InactiveLink::Role);
        }
        for link in edge.inactive_links() {
            inactive.insert(link);
        }
    }

    explanation.denial = Some(if inactive.is_empty() {
        DenialKind::NoGrantForResourceAction
    } else {
        DenialKind::InactivePath {
            inactive: inactive.into_iter().collect(),
        }
    });
    explanation
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ADMIN: RoleId = RoleId::new(1);
    const READ: ActionTypeId = ActionTypeId::new(1);
    const DELETE: ActionTypeId = ActionTypeId::new(4);
    const REPORTS: ResourceId = ResourceId::new(5);

    fn admin_membership() -> Vec<RoleMembership> {
        vec![RoleMembership {
            role_id: ADMIN,
            membership_active: true,
            role_active: true,
        }]
    }

    fn read_edge(resource: ResourceId) -> PermissionEdge {
        PermissionEdge {
            role_id: ADMIN,
            role_permission_active: true,
            permission_id: PermissionId::new(10),
            permission_active: true,
            resource_id: resource,
            resource_active: true,
            action_type_id: READ,
            action_title: "Read".to_string(),
            action_active: true,
        }
    }

    #[test]
    fn admin_read_scenario() {
        let memberships = admin_membership();
        let edges = vec![read_edge(REPORTS)];
        let other = ResourceId::new(6);

        assert!(is_granted(&memberships, &edges, REPORTS, &ActionRef::name("read")));
        assert!(is_granted(&memberships, &edges, REPORTS, &ActionRef::Id(READ)));
        assert!(!is_granted(&memberships, &edges, REPORTS, &ActionRef::name("Delete")));
        assert!(!is_granted(&memberships, &edges, REPORTS, &ActionRef::Id(DELETE)));
        assert!(!is_granted(&memberships, &edges, other, &ActionRef::name("Read")));
    }

    #[test]
    fn no_active_roles_denies_regardless_of_edges() {
        let edges = vec![read_edge(REPORTS)];
        assert!(!is_granted(&[], &edges, REPORTS, &ActionRef::Id(READ)));

        let explanation = explain(&[], &edges, REPORTS, &ActionRef::Id(READ));
        assert_eq!(explanation.denial, Some(DenialKind::NoActiveRoles));
    }

    #[test]
    fn each_inactive_link_breaks_the_path() {
        type Toggle = fn(&mut Vec<RoleMembership>, &mut PermissionEdge);
        let cases: [(InactiveLink, Toggle); 6] = [
            (InactiveLink::Membership, |m, _| m[0].membership_active = false),
            (InactiveLink::Role, |m, _| m[0].role_active = false),
            (InactiveLink::RolePermission, |_, e| {
                e.role_permission_active = false
            }),
            (InactiveLink::Permission, |_, e| e.permission_active = false),
            (InactiveLink::Resource, |_, e| e.resource_active = false),
            (InactiveLink::ActionType, |_, e| e.action_active = false),
        ];

        for (link, toggle) in cases {
            let mut memberships = admin_membership();
            let mut edge = read_edge(REPORTS);
            toggle(&mut memberships, &mut edge);
            let edges = vec![edge];

            assert!(
                !is_granted(&memberships, &edges, REPORTS, &ActionRef::Id(READ)),
                "{link:?} inactive must deny"
            );

            let explanation = explain(&memberships, &edges, REPORTS, &ActionRef::Id(READ));
            assert!(!explanation.granted);
            match (link, explanation.denial) {
                // Inactive membership/role leaves no active role at all.
                (
                    InactiveLink::Membership | InactiveLink::Role,
                    Some(DenialKind::NoActiveRoles),
                ) => {}
                (_, Some(DenialKind::InactivePath { inactive })) => {
                    assert_eq!(inactive, vec![link])
                }
                (_, other) => panic!("unexpected denial for {link:?}: {other:?}"),
            }
        }
    }

    #[test]
    fn a_second_active_path_still_grants() {
        let mut memberships = admin_membership();
        memberships.push(RoleMembership {
            role_id: RoleId::new(2),
            membership_active: true,
            role_active: true,
        });
        let mut dead = read_edge(REPORTS);
        dead.permission_active = false;
        let mut live = read_edge(REPORTS);
        live.role_id = RoleId::new(2);
        live.permission_id = PermissionId::new(11);

        let edges = vec![dead, live];
        let explanation = explain(&memberships, &edges, REPORTS, &ActionRef::name("READ"));
        assert!(explanation.granted);
        assert_eq!(explanation.granting_permissions, vec![PermissionId::new(11)]);
    }

    #[test]
    fn grants_to_roles_the_subject_lacks_do_not_count() {
        let mut edge = read_edge(REPORTS);
        edge.role_id = RoleId::new(99);
        let edges = vec![edge];
        let memberships = admin_membership();

        assert!(!is_granted(&memberships, &edges, REPORTS, &ActionRef::Id(READ)));
        let explanation = explain(&memberships, &edges, REPORTS, &ActionRef::Id(READ));
        assert_eq!(
            explanation.denial,
            Some(DenialKind::NoGrantForResourceAction)
        );
    }

    proptest! {
        #[test]
        fn granted_iff_every_flag_is_active(flags in proptest::array::uniform6(any::<bool>())) {
            let memberships = vec![RoleMembership {
                role_id: ADMIN,
                membership_active: flags[0],
                role_active: flags[1],
            }];
            let mut edge = read_edge(REPORTS);
            edge.role_permission_active = flags[2];
            edge.permission_active = flags[3];
            edge.resource_active = flags[4];
            edge.action_active = flags[5];
            let edges = [edge];

            let granted = is_granted(&memberships, &edges, REPORTS, &ActionRef::Id(READ));
            prop_assert_eq!(granted, flags.iter().all(|f| *f));

            let explanation = explain(&memberships, &edges, REPORTS, &ActionRef::Id(READ));
            prop_assert_eq!(explanation.granted, granted);
        }
    }
}
