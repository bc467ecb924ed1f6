//! Refresh-token record and its lifecycle state machine.
//!
//! ```text
//! Issued ──▶ Active ──rotate──▶ Used      (terminal)
//!              │
//!              ├──revoke──▶ Revoked       (terminal)
//!              │
//!              └──now ≥ expiry──▶ Expired (terminal, computed on read)
//! ```
//!
//! `used` and `revoked` are each set at most once and never cleared. The
//! successor link is written only by rotation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keystone_core::{RecordId, SubjectId};

/// Lifecycle state of a refresh token, derived from its flags and `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Active,
    Used,
    Revoked,
    Expired,
}

impl TokenState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TokenState::Active)
    }
}

impl core::fmt::Display for TokenState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TokenState::Active => write!(f, "active"),
            TokenState::Used => write!(f, "used"),
            TokenState::Revoked => write!(f, "revoked"),
            TokenState::Expired => write!(f, "expired"),
        }
    }
}

/// Attempted transition out of a non-active state.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("refresh token is {0}, not active")]
pub struct TokenTransitionError(pub TokenState);

/// A refresh token about to be persisted (the store assigns the record id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRefreshToken {
    pub token: String,
    pub subject_id: SubjectId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device: Option<String>,
    pub origin: Option<String>,
}

impl NewRefreshToken {
    pub fn into_record(self, id: RecordId) -> RefreshTokenRecord {
        RefreshTokenRecord {
            id,
            token: self.token,
            subject_id: self.subject_id,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            device: self.device,
            origin: self.origin,
            used: false,
            used_at: None,
            successor_token: None,
            revoked: false,
            revoked_at: None,
            revoked_by_origin: None,
        }
    }
}

/// Durable refresh-token record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenRecord {
    pub id: RecordId,
    /// Opaque token string (primary lookup key).
    pub token: String,
    pub subject_id: SubjectId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub device: Option<String>,
    pub origin: Option<String>,

    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    /// Token minted when this one was rotated.
    pub successor_token: Option<String>,

    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by_origin: Option<String>,
}

// Token strings are bearer credentials; keep them out of debug output.
impl core::fmt::Debug for RefreshTokenRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RefreshTokenRecord")
            .field("id", &self.id)
            .field("subject_id", &self.subject_id)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("device", &self.device)
            .field("origin", &self.origin)
            .field("used", &self.used)
            .field("used_at", &self.used_at)
            .field("has_successor", &self.successor_token.is_some())
            .field("revoked", &self.revoked)
            .field("revoked_at", &self.revoked_at)
            .finish_non_exhaustive()
    }
}

impl RefreshTokenRecord {
    /// Derived state at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.used {
            TokenState::Used
        } else if self.revoked {
            TokenState::Revoked
        } else if now >= self.expires_at {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }

    /// `not revoked AND not used AND now < expiry`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.used && now < self.expires_at
    }

    /// When the record entered its terminal state, if it has.
    ///
    /// Naturally expired tokens report their expiry timestamp.
    pub fn terminal_since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.state_at(now) {
            TokenState::Active => None,
            TokenState::Used => Some(self.used_at.unwrap_or(self.issued_at)),
            TokenState::Revoked => Some(self.revoked_at.unwrap_or(self.issued_at)),
            TokenState::Expired => Some(self.expires_at),
        }
    }

    /// Consume the token by rotation, linking it to its successor.
    pub fn consume(
        &mut self,
        successor: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), TokenTransitionError> {
        self.ensure_active(at)?;
        self.used = true;
        self.used_at = Some(at);
        self.successor_token = Some(successor.into());
        Ok(())
    }

    /// Revoke the token, stamping time and origin.
    pub fn revoke(
        &mut self,
        at: DateTime<Utc>,
        origin: Option<String>,
    ) -> Result<(), TokenTransitionError> {
        self.ensure_active(at)?;
        self.revoked = true;
        self.revoked_at = Some(at);
        self.revoked_by_origin = origin;
        Ok(())
    }

    fn ensure_active(&self, now: DateTime<Utc>) -> Result<(), TokenTransitionError> {
        match self.state_at(now) {
            TokenState::Active => Ok(()),
            other => Err(TokenTransitionError(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn record(now: DateTime<Utc>) -> RefreshTokenRecord {
        NewRefreshToken {
            token: "tok".to_string(),
            subject_id: SubjectId::new(1),
            issued_at: now,
            expires_at: now + Duration::days(7),
            device: Some("firefox".to_string()),
            origin: Some("10.0.0.1".to_string()),
        }
        .into_record(RecordId::new(1))
    }

    #[test]
    fn fresh_record_is_active_until_exactly_expiry() {
        let now = Utc::now();
        let r = record(now);

        assert!(r.is_active_at(now));
        assert!(r.is_active_at(r.expires_at - Duration::milliseconds(1)));
        assert!(!r.is_active_at(r.expires_at));
        assert_eq!(r.state_at(r.expires_at), TokenState::Expired);
    }

    #[test]
    fn consume_links_successor_and_is_one_shot() {
        let now = Utc::now();
        let mut r = record(now);

        r.consume("next", now).unwrap();
        assert_eq!(r.state_at(now), TokenState::Used);
        assert_eq!(r.successor_token.as_deref(), Some("next"));
        assert_eq!(r.used_at, Some(now));

        let err = r.consume("again", now).unwrap_err();
        assert_eq!(err, TokenTransitionError(TokenState::Used));
        assert_eq!(r.successor_token.as_deref(), Some("next"));
    }

    #[test]
    fn revoke_does_not_link_a_successor() {
        let now = Utc::now();
        let mut r = record(now);

        r.revoke(now, Some("192.168.1.9".to_string())).unwrap();
        assert_eq!(r.state_at(now), TokenState::Revoked);
        assert!(r.successor_token.is_none());
        assert_eq!(r.revoked_by_origin.as_deref(), Some("192.168.1.9"));

        assert!(r.revoke(now, None).is_err());
        assert!(r.consume("x", now).is_err());
    }

    #[test]
    fn expired_tokens_cannot_transition() {
        let now = Utc::now();
        let mut r = record(now);
        let later = r.expires_at + Duration::seconds(1);

        assert_eq!(r.revoke(later, None).unwrap_err(), TokenTransitionError(TokenState::Expired));
        assert!(!r.revoked);
        assert_eq!(r.terminal_since(later), Some(r.expires_at));
    }

    #[test]
    fn debug_output_hides_token_strings() {
        let now = Utc::now();
        let mut r = record(now);
        r.consume("secret-successor", now).unwrap();

        let dbg = format!("{r:?}");
        assert!(!dbg.contains("tok\""));
        assert!(!dbg.contains("secret-successor"));
    }

    proptest! {
        #[test]
        fn active_iff_unexpired_unused_unrevoked(
            used in any::<bool>(),
            revoked in any::<bool>(),
            offset_secs in -100_000i64..100_000,
        ) {
            let now = Utc::now();
            let mut r = record(now);
            r.used = used;
            r.revoked = revoked;
            let probe = r.expires_at + Duration::seconds(offset_secs);

            let expected = !used && !revoked && probe < r.expires_at;
            prop_assert_eq!(r.is_active_at(probe), expected);
            prop_assert_eq!(r.state_at(probe) == TokenState::Active, expected);
        }
    }
}
