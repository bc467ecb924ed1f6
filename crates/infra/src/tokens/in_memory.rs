use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use keystone_auth::{NewRefreshToken, RefreshTokenRecord};
use keystone_core::{RecordId, SubjectId};

use super::store::{TokenStore, TokenStoreError, TokenUnitOfWork};

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, RefreshTokenRecord>,
    next_id: i64,
}

/// In-memory token store for tests/dev.
///
/// A unit of work holds the store lock for its whole lifetime, so transitions
/// are fully serialized (single writer). Staged writes are applied on commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of stored records, in any state.
    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn begin(&self) -> Result<Box<dyn TokenUnitOfWork>, TokenStoreError> {
        let guard = self.state.clone().lock_owned().await;
        let next_id = guard.next_id;
        Ok(Box::new(InMemoryUnitOfWork {
            guard: Some(guard),
            staged: HashMap::new(),
            next_id,
        }))
    }

    async fn find_by_token(
        &self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        let state = self.state.lock().await;
        Ok(state.records.get(token).cloned())
    }

    async fn list_for_subject(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError> {
        let state = self.state.lock().await;
        let mut records: Vec<_> = state
            .records
            .values()
            .filter(|r| r.subject_id == subject)
            .cloned()
            .collect();
        records.sort_by_key(|r| (r.issued_at, r.id));
        Ok(records)
    }

    async fn delete_terminal_before(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, TokenStoreError> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state
            .records
            .retain(|_, r| r.terminal_since(now).is_none_or(|since| since >= cutoff));
        Ok((before - state.records.len()) as u64)
    }
}

/// Unit of work over the in-memory store.
struct InMemoryUnitOfWork {
    guard: Option<OwnedMutexGuard<State>>,
    staged: HashMap<String, RefreshTokenRecord>,
    next_id: i64,
}

impl InMemoryUnitOfWork {
    fn state(&self) -> Result<&State, TokenStoreError> {
        self.guard.as_deref().ok_or(TokenStoreError::Finished)
    }

    fn lookup(&self, token: &str) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        if let Some(r) = self.staged.get(token) {
            return Ok(Some(r.clone()));
        }
        Ok(self.state()?.records.get(token).cloned())
    }
}

#[async_trait]
impl TokenUnitOfWork for InMemoryUnitOfWork {
    async fn lock_subject(&mut self, _subject: SubjectId) -> Result<(), TokenStoreError> {
        // The store-wide lock is already held.
        self.state().map(|_| ())
    }

    async fn find_by_token(
        &mut self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        self.lookup(token)
    }

    async fn find_by_token_for_update(
        &mut self,
        token: &str,
    ) -> Result<Option<RefreshTokenRecord>, TokenStoreError> {
        self.lookup(token)
    }

    async fn active_for_subject(
        &mut self,
        subject: SubjectId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RefreshTokenRecord>, TokenStoreError> {
        let state = self.state()?;
        let mut merged: HashMap<&str, &RefreshTokenRecord> = state
            .records
            .iter()
            .filter(|(_, r)| r.subject_id == subject)
            .map(|(k, r)| (k.as_str(), r))
            .collect();
        for (k, r) in self.staged.iter().filter(|(_, r)| r.subject_id == subject) {
            merged.insert(k.as_str(), r);
        }

        let mut active: Vec<RefreshTokenRecord> = merged
            .into_values()
            .filter(|r| r.is_active_at(now))
            .cloned()
            .collect();
        active.sort_by_key(|r| (r.issued_at, r.id));
        Ok(active)
    }

    async fn insert(
        &mut self,
        token: NewRefreshToken,
    ) -> Result<RefreshTokenRecord, TokenStoreError> {
        if self.lookup(&token.token)?.is_some() {
            return Err(TokenStoreError::Duplicate);
        }
        self.next_id += 1;
        let record = token.into_record(RecordId::new(self.next_id));
        self.staged.insert(record.token.clone(), record.clone());
        Ok(record)
    }

    async fn update(&mut self, record: &RefreshTokenRecord) -> Result<(), TokenStoreError> {
        let current = self
            .lookup(&record.token)?
            .ok_or(TokenStoreError::NotFound)?;
        if current.used || current.revoked {
            return Err(TokenStoreError::Conflict);
        }
        self.staged.insert(record.token.clone(), record.clone());
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), TokenStoreError> {
        let mut guard = self.guard.take().ok_or(TokenStoreError::Finished)?;
        guard.next_id = self.next_id;
        for (token, record) in self.staged.drain() {
            guard.records.insert(token, record);
        }
        Ok(())
    }
}
