//! Postgres-backed refresh-token store.
//!
//! Expected relational layout:
//!
//! | Column | Type | Notes |
//! |--------|------|-------|
//! | `id` | `BIGSERIAL` | primary key |
//! | `token` | `TEXT NOT NULL` | `UNIQUE` |
//! | `subject_id` | `BIGINT NOT NULL` | indexed with `(issued_at, id)` |
//! | `issued_at`, `expires_at` | `TIMESTAMPTZ NOT NULL` | |
//! | `device`, `origin` | `TEXT NULL` | |
//! | `used` | `BOOLEAN NOT NULL DEFAULT FALSE` | |
//! | `used_at` | `TIMESTAMPTZ NULL` | |
//! | `successor_token` | `TEXT NULL` | |
//! | `revoked` | `BOOLEAN NOT NULL DEFAULT FALSE` | |
//! | `revoked_at` | `TIMESTAMPTZ NULL` | |
//! | `revoked_by_origin` | `TEXT NULL` | |
//!
//! ## Concurrency
//!
//! - A unit of work is one SQL transaction; dropping it rolls back.
//! - `lock_subject` takes `pg_advisory_xact_lock(subject_id)`, released at
//!   commit/rollback. Callers take it before touching any token row of that
//!   subject, so lock order is always advisory lock → rows.
//! - `active_for_subject` reads `FOR UPDATE`, so eviction and revoke-all hold
//!   the rows they are about to revoke. A row revoked by a concurrent commit
//!   drops out of the result on re-check.
//! - Terminal updates only match rows that are still neither used nor
//!   revoked; zero matched rows is [`TokenStoreError::Conflict`].
//! - Inserts use `ON CONFLICT (token) DO NOTHING` so a collision surfaces as
//!   [`TokenStoreError::Duplicate`] without aborting the transaction.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use keystone_auth::{NewRefreshToken, RefreshTokenRecord};
use keystone_core::{RecordId, SubjectId};

use super::store::{TokenStore, TokenStoreError, TokenUnitOfWork};

const SELECT_COLUMNS: &str = r#"
    id, token, subject_id, issued_at, expires_at, device, origin,
    used, used_at, successor_token, revoked, revoked_at, revoked_by_origin
"#;

/// Postgres-backed token store.
#[derive(Debug, Clone)]
pub struct PostgresTokenStore {
    pool: Arc<PgPool>,
}

impl PostgresTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    #[instrument(skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn TokenUnitOfWork>, TokenStoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        Ok(Box::new(PostgresUnitOfWork { tx: Some(tx) }))
    }

    #[instrument(skip(self, token), err)]
    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE token = $1");
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_by_token", e))?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    #[instrument(skip(self), fields(subject_id = %subject), err)]
    async fn list_for_subject(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM refresh_tokens
            WHERE subject_id = $1
            ORDER BY issued_at ASC, id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(subject.get())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_for_subject", e))?;
        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self), err)]
    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM refresh_tokens
            WHERE (used AND COALESCE(used_at, issued_at) < $1)
               OR (revoked AND NOT used AND COALESCE(revoked_at, issued_at) < $1)
               OR (NOT used AND NOT revoked AND expires_at <= $2 AND expires_at < $1)
            "#,
        )
        .bind(cutoff)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("delete_terminal_before", e))?;
        Ok(result.rows_affected())
    }
}

struct PostgresUnitOfWork {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresUnitOfWork {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, TokenStoreError> {
        self.tx.as_mut().ok_or(TokenStoreError::Finished)
    }

    async fn select_one(
        &mut self,
        token: &str,
        for_update: bool,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        let suffix = if for_update { " FOR UPDATE" } else { "" };
        let sql =
            format!("SELECT {SELECT_COLUMNS} FROM refresh_tokens WHERE token = $1{suffix}");
        let tx = self.tx()?;
        let row = sqlx::query(&sql)
            .bind(token)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("select_token", e))?;
        row.map(|r| record_from_row(&r)).transpose()
    }
}

#[async_trait]
impl TokenUnitOfWork for PostgresUnitOfWork {
    async fn lock_subject(&mut self, subject: SubjectId) -> Result<(), TokenStoreError> {
        let tx = self.tx()?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(subject.get())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_subject", e))?;
        Ok(())
    }

    async fn find_by_token(
        &mut self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        self.select_one(token, false).await
    }

    async fn find_by_token_for_update(
        &mut self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        self.select_one(token, true).await
    }

    async fn active_for_subject(
        &mut self,
        subject: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError> {
        let sql = format!(
            r#"
            SELECT {SELECT_COLUMNS} FROM refresh_tokens
            WHERE subject_id = $1 AND NOT used AND NOT revoked AND expires_at > $2
            ORDER BY issued_at ASC, id ASC
            FOR UPDATE
            "#
        );
        let tx = self.tx()?;
        let rows = sqlx::query(&sql)
            .bind(subject.get())
            .bind(now)
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("active_for_subject", e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn insert(
        &mut self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, TokenStoreError> {
        let tx = self.tx()?;
        let row = sqlx::query(
            r#"
            INSERT INTO refresh_tokens (token, subject_id, issued_at, expires_at, device, origin)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (token) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&token.token)
        .bind(token.subject_id.get())
        .bind(token.issued_at)
        .bind(token.expires_at)
        .bind(&token.device)
        .bind(&token.origin)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_token", e))?;

        let Some(row) = row else {
            return Err(TokenStoreError::Duplicate);
        };
        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert_token", e))?;
        Ok(token.into_record(RecordId::new(id)))
    }

    async fn update(&mut self, record: &RefreshTokenRecord) -> Result<(), TokenStoreError> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET used = $2, used_at = $3, successor_token = $4,
                revoked = $5, revoked_at = $6, revoked_by_origin = $7
            WHERE id = $1 AND NOT used AND NOT revoked
            "#,
        )
        .bind(record.id.get())
        .bind(record.used)
        .bind(record.used_at)
        .bind(&record.successor_token)
        .bind(record.revoked)
        .bind(record.revoked_at)
        .bind(&record.revoked_by_origin)
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("update_token", e))?;

        // Callers hold the row lock, so no match means the row is already
        // terminal rather than missing.
        if result.rows_affected() == 0 {
            return Err(TokenStoreError::Conflict);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TokenStoreError> {
        let tx = self.tx.take().ok_or(TokenStoreError::Finished)?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

fn record_from_row(row: &PgRow) -> Result<RefreshTokenRecord, TokenStoreError> {
    let map = |e: sqlx::Error| map_sqlx_error("decode_token_row", e);
    Ok(RefreshTokenRecord {
        id: RecordId::new(row.try_get("id").map_err(map)?),
        token: row.try_get("token").map_err(map)?,
        subject_id: SubjectId::new(row.try_get("subject_id").map_err(map)?),
        issued_at: row.try_get("issued_at").map_err(map)?,
        expires_at: row.try_get("expires_at").map_err(map)?,
        device: row.try_get("device").map_err(map)?,
        origin: row.try_get("origin").map_err(map)?,
        used: row.try_get("used").map_err(map)?,
        used_at: row.try_get("used_at").map_err(map)?,
        successor_token: row.try_get("successor_token").map_err(map)?,
        revoked: row.try_get("revoked").map_err(map)?,
        revoked_at: row.try_get("revoked_at").map_err(map)?,
        revoked_by_origin: row.try_get("revoked_by_origin").map_err(map)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> TokenStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if db_err.code().as_deref() == Some("23505") {
                return TokenStoreError::Duplicate;
            }
            TokenStoreError::Storage(format!(
                "database error in {}: {}",
                operation,
                db_err.message()
            ))
        }
        other => TokenStoreError::Storage(format!("{} failed: {}", operation, other)),
    }
}
