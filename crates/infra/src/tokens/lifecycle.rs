//! Refresh-token lifecycle orchestration.
//!
//! The manager is the only writer of refresh-token records. Every transition
//! runs inside one [`TokenUnitOfWork`]:
//!
//! ```text
//! generate_for:  begin → lock subject → evict oldest over cap → insert → commit
//! rotate:        begin → lock subject → lock old row → check Active
//!                      → evict (old excluded) → insert new → consume old → commit
//! revoke:        begin → lock row → check Active → revoke → commit
//! revoke_all:    begin → lock subject → revoke every Active → commit
//! ```
//!
//! A unit of work dropped before `commit` (error, cancellation) leaves no trace.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use keystone_auth::{
    NewRefreshToken, RefreshTokenRecord, SecureTokenGenerator, TokenPolicy, TokenState,
};
use keystone_core::{Clock, RecordId, SubjectId};

use super::store::{TokenStore, TokenStoreError, TokenUnitOfWork};
use crate::SECURITY_TARGET;

/// Attempts at drawing a unique token string before giving up.
const GENERATION_ATTEMPTS: usize = 2;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Unknown token string.
    #[error("refresh token not found")]
    NotFound,

    /// Known token in a terminal state.
    #[error("refresh token is {state}")]
    NotActive {
        state: TokenState,
        subject_id: SubjectId,
    },

    /// Two consecutive token strings collided with stored ones.
    #[error("could not generate a unique refresh token")]
    GenerationFailed,

    #[error(transparent)]
    Store(#[from] TokenStoreError),
}

impl LifecycleError {
    /// Presenting a consumed or revoked token is a replay of a credential that
    /// should no longer exist in the client's hands.
    pub fn is_reuse(&self) -> bool {
        matches!(
            self,
            LifecycleError::NotActive {
                state: TokenState::Used | TokenState::Revoked,
                ..
            }
        )
    }
}

/// Orchestrates generation, validation, rotation, revocation, the per-subject
/// concurrency cap, and cleanup of refresh tokens.
pub struct TokenLifecycleManager<S> {
    store: S,
    generator: Arc<dyn SecureTokenGenerator>,
    clock: Arc<dyn Clock>,
    policy: TokenPolicy,
}

impl<S> core::fmt::Debug for TokenLifecycleManager<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenLifecycleManager")
            .field("generator", &self.generator)
            .field("clock", &self.clock)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<S> TokenLifecycleManager<S>
where
    S: TokenStore,
{
    pub fn new(
        store: S,
        generator: Arc<dyn SecureTokenGenerator>,
        clock: Arc<dyn Clock>,
        policy: TokenPolicy,
    ) -> Self {
        Self {
            store,
            generator,
            clock,
            policy,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Derived state of a record at the manager's current time.
    pub fn state_of(&self, record: &RefreshTokenRecord) -> TokenState {
        record.state_at(self.clock.now())
    }

    /// Issue a new refresh token for `subject`, evicting its oldest active
    /// sessions first if the cap would otherwise be exceeded.
    #[instrument(skip(self, origin, device), fields(subject_id = %subject), err)]
    pub async fn generate_for(
        &self,
        subject: SubjectId,
        origin: Option<String>,
        device: Option<String>,
    ) -> Result<RefreshTokenRecord, LifecycleError> {
        let mut uow = self.store.begin().await?;
        uow.lock_subject(subject).await?;

        let record = self
            .generate_in(uow.as_mut(), subject, origin, device, None)
            .await?;

        uow.commit().await?;
        info!(record_id = %record.id, "refresh token issued");
        Ok(record)
    }

    /// Exact-match lookup. Returns terminal records too; no state change.
    pub async fn validate(&self, token: &str) -> Result<RefreshTokenRecord, LifecycleError> {
        self.store
            .find_by_token(token)
            .await?
            .ok_or(LifecycleError::NotFound)
    }

    /// Consume `old_token` and mint its successor atomically.
    ///
    /// Origin and device default to the old token's when not supplied.
    #[instrument(skip_all, err)]
    pub async fn rotate(
        &self,
        old_token: &str,
        origin: Option<String>,
        device: Option<String>,
    ) -> Result<RefreshTokenRecord, LifecycleError> {
        let mut uow = self.store.begin().await?;

        let subject = match uow.find_by_token(old_token).await? {
            Some(r) => r.subject_id,
            None => return Err(LifecycleError::NotFound),
        };
        uow.lock_subject(subject).await?;

        let mut old = uow
            .find_by_token_for_update(old_token)
            .await?
            .ok_or(LifecycleError::NotFound)?;

        let now = self.clock.now();
        let state = old.state_at(now);
        if state.is_terminal() {
            if matches!(state, TokenState::Used | TokenState::Revoked) {
                warn!(
                    target: SECURITY_TARGET,
                    subject_id = %old.subject_id,
                    record_id = %old.id,
                    state = %state,
                    "refresh token reuse detected"
                );
            }
            return Err(LifecycleError::NotActive {
                state,
                subject_id: old.subject_id,
            });
        }

        let origin = origin.or_else(|| old.origin.clone());
        let device = device.or_else(|| old.device.clone());
        let new = self
            .generate_in(uow.as_mut(), old.subject_id, origin, device, Some(old.id))
            .await?;

        old.consume(new.token.clone(), now)
            .map_err(|e| LifecycleError::NotActive {
                state: e.0,
                subject_id: old.subject_id,
            })?;
        uow.update(&old).await?;
        uow.commit().await?;

        info!(
            subject_id = %old.subject_id,
            old_record_id = %old.id,
            new_record_id = %new.id,
            "refresh token rotated"
        );
        Ok(new)
    }

    /// Revoke one token. `false` when it is unknown or already terminal.
    #[instrument(skip(self, token), err)]
    pub async fn revoke(
        &self,
        token: &str,
        origin: Option<String>,
    ) -> Result<bool, LifecycleError> {
        let mut uow = self.store.begin().await?;
        let Some(mut record) = uow.find_by_token_for_update(token).await? else {
            return Ok(false);
        };

        let now = self.clock.now();
        if record.revoke(now, origin).is_err() {
            debug!(record_id = %record.id, "revoke ignored for non-active token");
            return Ok(false);
        }

        uow.update(&record).await?;
        uow.commit().await?;
        info!(
            subject_id = %record.subject_id,
            record_id = %record.id,
            "refresh token revoked"
        );
        Ok(true)
    }

    /// Revoke every active token of `subject`. `false` when there were none.
    #[instrument(skip(self), fields(subject_id = %subject), err)]
    pub async fn revoke_all_for_subject(
        &self,
        subject: SubjectId,
    ) -> Result<bool, LifecycleError> {
        let mut uow = self.store.begin().await?;
        uow.lock_subject(subject).await?;

        let now = self.clock.now();
        let active = uow.active_for_subject(subject, now).await?;
        if active.is_empty() {
            return Ok(false);
        }

        let count = active.len();
        for mut record in active {
            if record.revoke(now, None).is_ok() {
                uow.update(&record).await?;
            }
        }
        uow.commit().await?;

        info!(revoked = count, "all refresh tokens revoked for subject");
        Ok(true)
    }

    /// Active sessions of `subject`, oldest first.
    pub async fn active_sessions(
        &self,
        subject: SubjectId,
    ) -> Result<Vec<RefreshTokenRecord>, LifecycleError> {
        let now = self.clock.now();
        let mut records = self.store.list_for_subject(subject).await?;
        records.retain(|r| r.is_active_at(now));
        records.sort_by_key(|r| (r.issued_at, r.id));
        Ok(records)
    }

    /// Delete terminal records older than the retention window.
    #[instrument(skip(self), err)]
    pub async fn cleanup_expired(&self) -> Result<u64, LifecycleError> {
        let now = self.clock.now();
        // Nothing can be older than an unrepresentable cutoff.
        let Some(cutoff) = now.checked_sub_signed(self.policy.retention) else {
            return Ok(0);
        };
        let deleted = self.store.delete_terminal_before(cutoff, now).await?;
        if deleted > 0 {
            info!(deleted, %cutoff, "expired refresh tokens cleaned up");
        }
        Ok(deleted)
    }

    /// Evict, then insert with one regeneration on collision. The caller holds
    /// the subject lock.
    async fn generate_in(
        &self,
        uow: &mut dyn TokenUnitOfWork,
        subject: SubjectId,
        origin: Option<String>,
        device: Option<String>,
        exclude: Option<RecordId>,
    ) -> Result<RefreshTokenRecord, LifecycleError> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(self.policy.refresh_token_ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.enforce_concurrency_cap(uow, subject, exclude).await?;

        for attempt in 1..=GENERATION_ATTEMPTS {
            let candidate = NewRefreshToken {
                token: self.generator.generate(),
                subject_id: subject,
                issued_at: now,
                expires_at,
                device: device.clone(),
                origin: origin.clone(),
            };
            match uow.insert(candidate).await {
                Ok(record) => return Ok(record),
                Err(TokenStoreError::Duplicate) => {
                    warn!(
                        subject_id = %subject,
                        attempt,
                        "refresh token collision, regenerating"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(LifecycleError::GenerationFailed)
    }

    /// Revoke the oldest active tokens so that, after one more insert, the
    /// subject holds exactly `max_active_tokens`. `exclude` is the token being
    /// rotated away, which stops counting once the rotation commits.
    async fn enforce_concurrency_cap(
        &self,
        uow: &mut dyn TokenUnitOfWork,
        subject: SubjectId,
        exclude: Option<RecordId>,
    ) -> Result<(), LifecycleError> {
        let now = self.clock.now();
        let mut active = uow.active_for_subject(subject, now).await?;
        active.retain(|r| Some(r.id) != exclude);

        let cap = self.policy.max_active_tokens;
        if active.len() < cap {
            return Ok(());
        }

        let evict = active.len() + 1 - cap;
        for mut record in active.into_iter().take(evict) {
            if record.revoke(now, None).is_err() {
                continue;
            }
            uow.update(&record).await?;
            warn!(
                target: SECURITY_TARGET,
                subject_id = %subject,
                record_id = %record.id,
                cap,
                "session limit reached, oldest refresh token evicted"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration, Utc};
    use keystone_auth::OsTokenGenerator;
    use keystone_core::ManualClock;

    use super::*;
    use crate::tokens::InMemoryTokenStore;

    struct Harness {
        manager: TokenLifecycleManager<Arc<InMemoryTokenStore>>,
        store: Arc<InMemoryTokenStore>,
        clock: Arc<ManualClock>,
    }

    fn harness_with(policy: TokenPolicy, generator: Arc<dyn SecureTokenGenerator>) -> Harness {
        let store = InMemoryTokenStore::arc();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let manager = TokenLifecycleManager::new(store.clone(), generator, clock.clone(), policy);
        Harness { manager, store, clock }
    }

    fn harness() -> Harness {
        harness_with(TokenPolicy::default(), Arc::new(OsTokenGenerator))
    }

    const ALICE: SubjectId = SubjectId::new(1);

    /// Replays a fixed script of strings.
    #[derive(Debug)]
    struct ScriptedGenerator {
        script: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(script: &[&str]) -> Self {
            Self {
                script: Mutex::new(script.iter().rev().map(|s| s.to_string()).collect()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl SecureTokenGenerator for ScriptedGenerator {
        fn generate(&self) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script.lock().unwrap().pop().expect("script exhausted")
        }
    }

    #[tokio::test]
    async fn generated_token_is_active_until_expiry_boundary() {
        let h = harness();
        let record = h
            .manager
            .generate_for(ALICE, Some("10.0.0.1".into()), Some("laptop".into()))
            .await
            .unwrap();

        assert_eq!(h.manager.state_of(&record), TokenState::Active);
        assert_eq!(record.expires_at - record.issued_at, Duration::days(7));
        assert_eq!(record.origin.as_deref(), Some("10.0.0.1"));

        h.clock.set(record.expires_at - Duration::milliseconds(1));
        assert_eq!(h.manager.state_of(&record), TokenState::Active);
        h.clock.set(record.expires_at);
        assert_eq!(h.manager.state_of(&record), TokenState::Expired);
    }

    #[tokio::test]
    async fn validate_returns_terminal_records_without_mutation() {
        let h = harness();
        let record = h.manager.generate_for(ALICE, None, None).await.unwrap();
        assert!(h.manager.revoke(&record.token, None).await.unwrap());

        let found = h.manager.validate(&record.token).await.unwrap();
        assert_eq!(h.manager.state_of(&found), TokenState::Revoked);

        assert_eq!(
            h.manager.validate("no-such-token").await.unwrap_err(),
            LifecycleError::NotFound
        );
    }

    #[tokio::test]
    async fn rotation_links_successor_and_consumes_old() {
        let h = harness();
        let old = h
            .manager
            .generate_for(ALICE, Some("1.1.1.1".into()), Some("phone".into()))
            .await
            .unwrap();

        let new = h.manager.rotate(&old.token, None, None).await.unwrap();
        assert_ne!(new.token, old.token);
        assert_eq!(new.subject_id, ALICE);
        assert_eq!(new.origin.as_deref(), Some("1.1.1.1"));
        assert_eq!(new.device.as_deref(), Some("phone"));

        let old_after = h.manager.validate(&old.token).await.unwrap();
        assert_eq!(h.manager.state_of(&old_after), TokenState::Used);
        assert_eq!(old_after.successor_token.as_deref(), Some(new.token.as_str()));
        assert_eq!(h.manager.state_of(&new), TokenState::Active);
    }

    #[tokio::test]
    async fn rotation_overrides_origin_and_device_when_given() {
        let h = harness();
        let old = h
            .manager
            .generate_for(ALICE, Some("1.1.1.1".into()), Some("phone".into()))
            .await
            .unwrap();

        let new = h
            .manager
            .rotate(&old.token, Some("2.2.2.2".into()), Some("tablet".into()))
            .await
            .unwrap();
        assert_eq!(new.origin.as_deref(), Some("2.2.2.2"));
        assert_eq!(new.device.as_deref(), Some("tablet"));
    }

    #[tokio::test]
    async fn rotating_a_consumed_token_is_reuse_and_has_no_side_effects() {
        let h = harness();
        let old = h.manager.generate_for(ALICE, None, None).await.unwrap();
        let new = h.manager.rotate(&old.token, None, None).await.unwrap();
        let records_before = h.store.len().await;

        let err = h.manager.rotate(&old.token, None, None).await.unwrap_err();
        assert_eq!(
            err,
            LifecycleError::NotActive {
                state: TokenState::Used,
                subject_id: ALICE
            }
        );
        assert!(err.is_reuse());
        assert_eq!(h.store.len().await, records_before);

        let new_after = h.manager.validate(&new.token).await.unwrap();
        assert_eq!(h.manager.state_of(&new_after), TokenState::Active);
    }

    #[tokio::test]
    async fn rotating_revoked_or_expired_tokens_fails() {
        let h = harness();
        let revoked = h.manager.generate_for(ALICE, None, None).await.unwrap();
        h.manager.revoke(&revoked.token, None).await.unwrap();

        let err = h.manager.rotate(&revoked.token, None, None).await.unwrap_err();
        assert!(err.is_reuse());

        let expiring = h.manager.generate_for(ALICE, None, None).await.unwrap();
        h.clock.set(expiring.expires_at);
        let err = h.manager.rotate(&expiring.token, None, None).await.unwrap_err();
        assert!(matches!(
            err,
            LifecycleError::NotActive {
                state: TokenState::Expired,
                ..
            }
        ));
        assert!(!err.is_reuse());
        assert_eq!(h.store.len().await, 2);
    }

    #[tokio::test]
    async fn rotating_unknown_token_is_not_found() {
        let h = harness();
        assert_eq!(
            h.manager.rotate("missing", None, None).await.unwrap_err(),
            LifecycleError::NotFound
        );
    }

    #[tokio::test]
    async fn revoke_is_idempotent_and_ignores_unknown_tokens() {
        let h = harness();
        let record = h.manager.generate_for(ALICE, None, None).await.unwrap();

        assert!(h.manager.revoke(&record.token, Some("9.9.9.9".into())).await.unwrap());
        let revoked = h.manager.validate(&record.token).await.unwrap();
        assert_eq!(revoked.revoked_by_origin.as_deref(), Some("9.9.9.9"));
        assert!(revoked.successor_token.is_none());

        assert!(!h.manager.revoke(&record.token, Some("8.8.8.8".into())).await.unwrap());
        let unchanged = h.manager.validate(&record.token).await.unwrap();
        assert_eq!(unchanged, revoked);

        assert!(!h.manager.revoke("missing", None).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_all_leaves_no_active_tokens() {
        let h = harness();
        let mut tokens = Vec::new();
        for _ in 0..3 {
            tokens.push(h.manager.generate_for(ALICE, None, None).await.unwrap());
        }
        let bob = h.manager.generate_for(SubjectId::new(2), None, None).await.unwrap();

        assert!(h.manager.revoke_all_for_subject(ALICE).await.unwrap());
        assert!(h.manager.active_sessions(ALICE).await.unwrap().is_empty());
        for t in &tokens {
            let r = h.manager.validate(&t.token).await.unwrap();
            assert!(r.revoked_at.is_some());
        }

        assert!(!h.manager.revoke_all_for_subject(ALICE).await.unwrap());
        assert_eq!(h.manager.active_sessions(SubjectId::new(2)).await.unwrap(), vec![bob]);
    }

    #[tokio::test]
    async fn cap_evicts_exactly_the_oldest_session() {
        let policy = TokenPolicy {
            max_active_tokens: 3,
            ..TokenPolicy::default()
        };
        let h = harness_with(policy, Arc::new(OsTokenGenerator));

        let mut issued = Vec::new();
        for _ in 0..3 {
            issued.push(h.manager.generate_for(ALICE, None, None).await.unwrap());
            h.clock.advance(Duration::seconds(1));
        }

        let newest = h.manager.generate_for(ALICE, None, None).await.unwrap();
        let active = h.manager.active_sessions(ALICE).await.unwrap();
        assert_eq!(active.len(), 3);
        assert_eq!(active.last().unwrap().id, newest.id);

        let oldest = h.manager.validate(&issued[0].token).await.unwrap();
        assert_eq!(h.manager.state_of(&oldest), TokenState::Revoked);
        for survivor in &issued[1..] {
            let r = h.manager.validate(&survivor.token).await.unwrap();
            assert_eq!(h.manager.state_of(&r), TokenState::Active);
        }
    }

    #[tokio::test]
    async fn cap_tie_break_prefers_lower_record_id() {
        let policy = TokenPolicy {
            max_active_tokens: 2,
            ..TokenPolicy::default()
        };
        let h = harness_with(policy, Arc::new(OsTokenGenerator));

        // Same issuance instant for both.
        let first = h.manager.generate_for(ALICE, None, None).await.unwrap();
        let second = h.manager.generate_for(ALICE, None, None).await.unwrap();
        assert_eq!(first.issued_at, second.issued_at);

        h.manager.generate_for(ALICE, None, None).await.unwrap();
        let first = h.manager.validate(&first.token).await.unwrap();
        let second = h.manager.validate(&second.token).await.unwrap();
        assert!(first.revoked);
        assert!(!second.revoked);
    }

    #[tokio::test]
    async fn rotation_at_cap_does_not_evict_other_sessions() {
        let policy = TokenPolicy {
            max_active_tokens: 2,
            ..TokenPolicy::default()
        };
        let h = harness_with(policy, Arc::new(OsTokenGenerator));

        let a = h.manager.generate_for(ALICE, None, None).await.unwrap();
        h.clock.advance(Duration::seconds(1));
        let b = h.manager.generate_for(ALICE, None, None).await.unwrap();

        h.manager.rotate(&b.token, None, None).await.unwrap();
        let a = h.manager.validate(&a.token).await.unwrap();
        assert_eq!(h.manager.state_of(&a), TokenState::Active);
        assert_eq!(h.manager.active_sessions(ALICE).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn collision_is_retried_once_then_fatal() {
        let generator = Arc::new(ScriptedGenerator::new(&["dup", "dup", "fresh", "dup", "dup"]));
        let h = harness_with(TokenPolicy::default(), generator.clone());

        h.manager.generate_for(ALICE, None, None).await.unwrap();
        let retried = h.manager.generate_for(ALICE, None, None).await.unwrap();
        assert_eq!(retried.token, "fresh");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 3);

        assert_eq!(
            h.manager.generate_for(ALICE, None, None).await.unwrap_err(),
            LifecycleError::GenerationFailed
        );
        assert_eq!(h.store.len().await, 2);
    }

    #[tokio::test]
    async fn cleanup_respects_retention_window() {
        let h = harness();
        let used = h.manager.generate_for(ALICE, None, None).await.unwrap();
        h.manager.rotate(&used.token, None, None).await.unwrap();
        let revoked = h.manager.generate_for(ALICE, None, None).await.unwrap();
        h.manager.revoke(&revoked.token, None).await.unwrap();

        // Inside retention: nothing is deleted.
        h.clock.advance(Duration::days(29));
        assert_eq!(h.manager.cleanup_expired().await.unwrap(), 0);

        // Used and revoked pass retention; the successor expired too recently.
        h.clock.advance(Duration::days(2));
        assert_eq!(h.manager.cleanup_expired().await.unwrap(), 2);
        assert_eq!(h.store.len().await, 1);

        // Successor expired at day 7 and is deleted 30 days later.
        h.clock.advance(Duration::days(7));
        assert_eq!(h.manager.cleanup_expired().await.unwrap(), 1);
        assert!(h.store.is_empty().await);
    }

    #[tokio::test]
    async fn unvalidated_extreme_lifetimes_saturate_instead_of_panicking() {
        let policy = TokenPolicy {
            refresh_token_ttl: Duration::MAX,
            retention: Duration::MAX,
            ..TokenPolicy::default()
        };
        let h = harness_with(policy, Arc::new(OsTokenGenerator));

        let record = h.manager.generate_for(ALICE, None, None).await.unwrap();
        assert_eq!(record.expires_at, DateTime::<Utc>::MAX_UTC);
        assert_eq!(h.manager.state_of(&record), TokenState::Active);

        h.manager.revoke(&record.token, None).await.unwrap();
        assert_eq!(h.manager.cleanup_expired().await.unwrap(), 0);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_active_tokens() {
        let h = harness();
        h.manager.generate_for(ALICE, None, None).await.unwrap();
        h.clock.advance(Duration::days(6));
        assert_eq!(h.manager.cleanup_expired().await.unwrap(), 0);
        assert_eq!(h.store.len().await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_generation_yields_distinct_tokens() {
        let policy = TokenPolicy {
            max_active_tokens: 1_000,
            ..TokenPolicy::default()
        };
        let h = Arc::new(harness_with(policy, Arc::new(OsTokenGenerator)));

        let mut handles = Vec::new();
        for i in 0..100 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.manager
                    .generate_for(SubjectId::new(i % 7), None, None)
                    .await
                    .unwrap()
                    .token
            }));
        }

        let mut tokens = HashSet::new();
        for handle in handles {
            tokens.insert(handle.await.unwrap());
        }
        assert_eq!(tokens.len(), 100);
        assert_eq!(h.store.len().await, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_logins_never_exceed_the_cap() {
        let policy = TokenPolicy {
            max_active_tokens: 3,
            ..TokenPolicy::default()
        };
        let h = Arc::new(harness_with(policy, Arc::new(OsTokenGenerator)));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let h = h.clone();
            handles.push(tokio::spawn(async move {
                h.manager.generate_for(ALICE, None, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(h.manager.active_sessions(ALICE).await.unwrap().len(), 3);
    }

    proptest::proptest! {
        #[test]
        fn active_sessions_never_exceed_cap_and_keep_the_newest(
            cap in 1usize..6,
            logins in 1usize..15,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let policy = TokenPolicy { max_active_tokens: cap, ..TokenPolicy::default() };
                let h = harness_with(policy, Arc::new(OsTokenGenerator));

                let mut issued = Vec::new();
                for _ in 0..logins {
                    issued.push(h.manager.generate_for(ALICE, None, None).await.unwrap().id);
                    h.clock.advance(Duration::seconds(1));
                }

                let active: Vec<RecordId> = h
                    .manager
                    .active_sessions(ALICE)
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|r| r.id)
                    .collect();
                let expected = issued[logins.saturating_sub(cap)..].to_vec();
                proptest::prop_assert_eq!(active, expected);
                Ok::<(), proptest::test_runner::TestCaseError>(())
            })?;
        }
    }
}
