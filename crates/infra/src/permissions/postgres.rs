//! Postgres-backed permission graph.
//!
//! Expected tables (each node and edge carries `is_active BOOLEAN NOT NULL`):
//!
//! ```text
//! user_roles(user_id, role_id, is_active)
//! roles(id, is_active)
//! role_permissions(role_id, permission_id, is_active)
//! permissions(id, resource_id, action_type_id, is_active)
//! resources(id, is_active)
//! action_types(id, title, is_active)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use keystone_auth::{PermissionEdge, RoleMembership};
use keystone_core::{ActionTypeId, PermissionId, ResourceId, RoleId, SubjectId};

use super::store::{PermissionGraphStore, PermissionStoreError};

#[derive(Debug, Clone)]
pub struct PostgresPermissionGraph {
    pool: Arc<PgPool>,
}

impl PostgresPermissionGraph {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl PermissionGraphStore for PostgresPermissionGraph {
    #[instrument(skip(self), err)]
    async fn memberships(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RoleMembership>, PermissionStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT ur.role_id,
                   ur.is_active AS membership_active,
                   COALESCE(r.is_active, FALSE) AS role_active
            FROM user_roles ur
            LEFT JOIN roles r ON r.id = ur.role_id
            WHERE ur.user_id = $1
            ORDER BY ur.role_id
            "#,
        )
        .bind(subject.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("memberships", e))?;

        rows.iter()
            .map(|row| {
                Ok(RoleMembership {
                    role_id: RoleId::new(row.try_get("role_id").map_err(decode)?),
                    membership_active: row.try_get("membership_active").map_err(decode)?,
                    role_active: row.try_get("role_active").map_err(decode)?,
                })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn edges_for(
        &self,
        roles: &[RoleId],
        resource: ResourceId,
    ) -> Result<Vec<PermissionEdge>, PermissionStoreError> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let role_ids: Vec<i64> = roles.iter().map(|r| r.get()).collect();

        let rows = sqlx::query(
            r#"
            SELECT rp.role_id,
                   rp.is_active AS role_permission_active,
                   p.id AS permission_id,
                   p.is_active AS permission_active,
                   p.resource_id,
                   COALESCE(res.is_active, FALSE) AS resource_active,
                   p.action_type_id,
                   COALESCE(a.title, '') AS action_title,
                   COALESCE(a.is_active, FALSE) AS action_active
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            LEFT JOIN resources res ON res.id = p.resource_id
            LEFT JOIN action_types a ON a.id = p.action_type_id
            WHERE rp.role_id = ANY($1) AND p.resource_id = $2
            "#,
        )
        .bind(&role_ids)
        .bind(resource.get())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("edges_for", e))?;

        rows.iter().map(edge_from_row).collect()
    }
}

fn edge_from_row(row: &PgRow) -> Result<PermissionEdge, PermissionStoreError> {
    Ok(PermissionEdge {
        role_id: RoleId::new(row.try_get("role_id").map_err(decode)?),
        role_permission_active: row.try_get("role_permission_active").map_err(decode)?,
        permission_id: PermissionId::new(row.try_get("permission_id").map_err(decode)?),
        permission_active: row.try_get("permission_active").map_err(decode)?,
        resource_id: ResourceId::new(row.try_get("resource_id").map_err(decode)?),
        resource_active: row.try_get("resource_active").map_err(decode)?,
        action_type_id: ActionTypeId::new(row.try_get("action_type_id").map_err(decode)?),
        action_title: row.try_get("action_title").map_err(decode)?,
        action_active: row.try_get("action_active").map_err(decode)?,
    })
}

fn decode(err: sqlx::Error) -> PermissionStoreError {
    map_sqlx_error("decode_permission_row", err)
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> PermissionStoreError {
    PermissionStoreError::Storage(format!("{} failed: {}", operation, err))
}
