//! Token lifetimes and session limits.

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("max active refresh tokens must be at least 1")]
    ZeroConcurrencyCap,

    #[error("{0} must be a positive duration")]
    NonPositiveDuration(&'static str),

    #[error("{name} must not exceed {max_days} days")]
    DurationTooLong { name: &'static str, max_days: i64 },
}

/// Upper bound on the access token lifetime.
pub const MAX_ACCESS_TOKEN_TTL_DAYS: i64 = 1;

/// Upper bound on refresh token lifetime and record retention.
pub const MAX_LONG_LIVED_DAYS: i64 = 3650;

/// Lifetimes and limits applied by the token lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPolicy {
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Maximum simultaneously active refresh tokens per subject.
    pub max_active_tokens: usize,
    /// How long terminal records are kept before cleanup deletes them.
    pub retention: Duration,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self {
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(7),
            max_active_tokens: 5,
            retention: Duration::days(30),
        }
    }
}

impl TokenPolicy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.max_active_tokens == 0 {
            return Err(PolicyError::ZeroConcurrencyCap);
        }
        if self.access_token_ttl <= Duration::zero() {
            return Err(PolicyError::NonPositiveDuration("access token ttl"));
        }
        if self.refresh_token_ttl <= Duration::zero() {
            return Err(PolicyError::NonPositiveDuration("refresh token ttl"));
        }
        if self.retention < Duration::zero() {
            return Err(PolicyError::NonPositiveDuration("retention"));
        }
        at_most(
            "access token ttl",
            self.access_token_ttl,
            MAX_ACCESS_TOKEN_TTL_DAYS,
        )?;
        at_most(
            "refresh token ttl",
            self.refresh_token_ttl,
            MAX_LONG_LIVED_DAYS,
        )?;
        at_most("retention", self.retention, MAX_LONG_LIVED_DAYS)
    }
}

fn at_most(name: &'static str, value: Duration, max_days: i64) -> Result<(), PolicyError> {
    if value > Duration::days(max_days) {
        return Err(PolicyError::DurationTooLong { name, max_days });
    }
    Ok(())
}
