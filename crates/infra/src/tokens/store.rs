use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use keystone_auth::{NewRefreshToken, RefreshTokenRecord};
use keystone_core::SubjectId;

/// Token store operation error.
///
/// These are **infrastructure errors**; lifecycle outcomes (not found, not
/// active) are decided by the lifecycle manager from the records it reads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenStoreError {
    /// The token string is already stored (uniqueness violation).
    #[error("refresh token string already exists")]
    Duplicate,

    /// An update targeted a record that does not exist.
    #[error("refresh token record not found")]
    NotFound,

    /// A transition targeted a record another writer already made terminal.
    #[error("refresh token record was changed concurrently")]
    Conflict,

    /// The unit of work was used after commit.
    #[error("unit of work already finished")]
    Finished,

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable store of refresh-token records.
///
/// Reads that are not part of a state transition go straight to the store;
/// every mutation goes through a [`TokenUnitOfWork`] obtained from
/// [`TokenStore::begin`].
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Open a transactional unit of work. Dropping it without `commit`
    /// discards every staged write.
    async fn begin(&self) -> Result<Box<dyn TokenUnitOfWork>, TokenStoreError>;

    /// Exact-match lookup by token string.
    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError>;

    /// Every record owned by the subject, in any state.
    async fn list_for_subject(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError>;

    /// Physically delete records whose terminal transition (or natural expiry)
    /// happened strictly before `cutoff`. Returns the number deleted.
    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenStoreError>;
}

/// Transactional boundary for token state transitions.
///
/// All writes staged here become visible together on [`commit`](Self::commit)
/// or not at all.
#[async_trait]
pub trait TokenUnitOfWork: Send {
    /// Serialize with every other unit of work touching the same subject until
    /// this one finishes.
    async fn lock_subject(&mut self, subject: SubjectId) -> Result<(), TokenStoreError>;

    /// Lookup that sees staged writes. Does not lock the row.
    async fn find_by_token(
        &mut self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError>;

    /// Lookup that locks the row against concurrent transitions.
    async fn find_by_token_for_update(
        &mut self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError>;

    /// Active records of a subject at `now`, oldest first (`issued_at`, then
    /// id). The rows stay locked against concurrent transitions.
    async fn active_for_subject(
        &mut self,
        subject: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError>;

    /// Insert a new record, assigning its id. Fails with
    /// [`TokenStoreError::Duplicate`] if the token string exists.
    async fn insert(
        &mut self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, TokenStoreError>;

    /// Persist a terminal transition (consume or revoke) of a record that is
    /// still neither used nor revoked in storage. Fails with
    /// [`TokenStoreError::Conflict`] otherwise, so a stamp is never
    /// overwritten.
    async fn update(&mut self, record: &RefreshTokenRecord) -> Result<(), TokenStoreError>;

    async fn commit(&mut self) -> Result<(), TokenStoreError>;
}

#[async_trait]
impl<S> TokenStore for Arc<S>
where
    S: TokenStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn TokenUnitOfWork>, TokenStoreError> {
        (**self).begin().await
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        (**self).find_by_token(token).await
    }

    async fn list_for_subject(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError> {
        (**self).list_for_subject(subject).await
    }

    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenStoreError> {
        (**self).delete_terminal_before(cutoff, now).await
    }
}
