//! Environment-driven configuration.
//!
//! | Variable | Default |
//! |---|---|
//! | `KEYSTONE_BIND_ADDR` | `0.0.0.0:8080` |
//! | `JWT_SECRET` | insecure dev default (warned) |
//! | `ACCESS_TOKEN_TTL_MINUTES` | `15` |
//! | `REFRESH_TOKEN_TTL_DAYS` | `7` |
//! | `MAX_ACTIVE_REFRESH_TOKENS` | `5` |
//! | `REFRESH_TOKEN_RETENTION_DAYS` | `30` |
//! | `TOKEN_CLEANUP_INTERVAL_SECS` | `3600`, `0` disables |
//! | `REVOKE_ALL_ON_REUSE` | `true` |
//! | `TRUST_FORWARDED_FOR` | `false`, set only behind a proxy that overwrites it |
//! | `USE_PERSISTENT_STORES` | `false` |
//! | `DATABASE_URL` | required when persistent |

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use keystone_auth::{PolicyError, TokenPolicy};

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

#[derive(Clone)]
pub struct KeystoneConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub policy: TokenPolicy,
    /// `None` disables the background cleanup worker.
    pub cleanup_interval: Option<StdDuration>,
    pub revoke_all_on_reuse: bool,
    /// Take the client address from `X-Forwarded-For` instead of the peer.
    pub trust_forwarded_for: bool,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
}

impl core::fmt::Debug for KeystoneConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("KeystoneConfig")
            .field("bind_addr", &self.bind_addr)
            .field("jwt_secret", &"<redacted>")
            .field("policy", &self.policy)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("revoke_all_on_reuse", &self.revoke_all_on_reuse)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("use_persistent_stores", &self.use_persistent_stores)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Default for KeystoneConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            policy: TokenPolicy::default(),
            cleanup_interval: Some(StdDuration::from_secs(3600)),
            revoke_all_on_reuse: true,
            trust_forwarded_for: false,
            use_persistent_stores: false,
            database_url: None,
        }
    }
}

impl KeystoneConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables take
    /// their default; malformed ones are an error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let default_policy = TokenPolicy::default();

        let bind_addr = parse_or(
            "KEYSTONE_BIND_ADDR",
            get("KEYSTONE_BIND_ADDR"),
            defaults.bind_addr,
        )?;

        let jwt_secret = get("JWT_SECRET").unwrap_or_else(|| {
            warn!("JWT_SECRET not set; using insecure dev default");
            DEV_JWT_SECRET.to_string()
        });

        let policy = TokenPolicy {
            access_token_ttl: parse_duration(
                "ACCESS_TOKEN_TTL_MINUTES",
                get("ACCESS_TOKEN_TTL_MINUTES"),
                default_policy.access_token_ttl,
                Duration::try_minutes,
            )?,
            refresh_token_ttl: parse_duration(
                "REFRESH_TOKEN_TTL_DAYS",
                get("REFRESH_TOKEN_TTL_DAYS"),
                default_policy.refresh_token_ttl,
                Duration::try_days,
            )?,
            max_active_tokens: parse_or(
                "MAX_ACTIVE_REFRESH_TOKENS",
                get("MAX_ACTIVE_REFRESH_TOKENS"),
                default_policy.max_active_tokens,
            )?,
            retention: parse_duration(
                "REFRESH_TOKEN_RETENTION_DAYS",
                get("REFRESH_TOKEN_RETENTION_DAYS"),
                default_policy.retention,
                Duration::try_days,
            )?,
        };
        policy.validate()?;

        let cleanup_secs: u64 = parse_or(
            "TOKEN_CLEANUP_INTERVAL_SECS",
            get("TOKEN_CLEANUP_INTERVAL_SECS"),
            3600,
        )?;
        let cleanup_interval = (cleanup_secs > 0).then(|| StdDuration::from_secs(cleanup_secs));

        let revoke_all_on_reuse =
            parse_bool("REVOKE_ALL_ON_REUSE", get("REVOKE_ALL_ON_REUSE"), true)?;
        let trust_forwarded_for =
            parse_bool("TRUST_FORWARDED_FOR", get("TRUST_FORWARDED_FOR"), false)?;
        let use_persistent_stores =
            parse_bool("USE_PERSISTENT_STORES", get("USE_PERSISTENT_STORES"), false)?;

        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        Ok(Self {
            bind_addr,
            jwt_secret,
            policy,
            cleanup_interval,
            revoke_all_on_reuse,
            trust_forwarded_for,
            use_persistent_stores,
            database_url,
        })
    }
}

fn parse_or<T>(var: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

/// Whole units through `unit` (e.g. [`Duration::try_days`]); values chrono
/// cannot represent are rejected rather than overflowing later.
fn parse_duration(
    var: &'static str,
    value: Option<String>,
    default: Duration,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, ConfigError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    let amount: i64 = parse_or(var, Some(raw.clone()), 0)?;
    unit(amount).ok_or_else(|| ConfigError::Invalid {
        var,
        value: raw,
        reason: "duration out of range".into(),
    })
}

fn parse_bool(
    var: &'static str,
    value: Option<String>,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = value else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw,
            reason: "expected a boolean".into(),
        }),
    }
}
