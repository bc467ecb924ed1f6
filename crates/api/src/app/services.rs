use std::sync::Arc;

use sqlx::PgPool;
use tracing::{error, info, warn};

use keystone_auth::{
    AccessTokenIssuer, Hs256AccessTokens, JwtValidator, OsTokenGenerator, TokenState,
};
use keystone_core::{Clock, SubjectId, SystemClock};
use keystone_infra::{
    InMemoryPermissionGraph, InMemoryTokenStore, KeystoneConfig, LifecycleError,
    PermissionGraphResolver, PermissionGraphStore, PostgresPermissionGraph, PostgresTokenStore,
    SECURITY_TARGET, TokenLifecycleManager, TokenStore,
};

use crate::app::dto::{SessionView, TokenPair};
use crate::app::errors::ApiError;

/// Lifecycle manager over whichever token backend is configured.
pub type TokenManager = TokenLifecycleManager<Arc<dyn TokenStore>>;

/// Resolver over whichever permission backend is configured.
pub type Resolver = PermissionGraphResolver<Arc<dyn PermissionGraphStore>>;

/// Shared request state.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionService>,
    pub resolver: Arc<Resolver>,
    pub access_tokens: Arc<dyn JwtValidator>,
    pub clock: Arc<dyn Clock>,
    pub trust_forwarded_for: bool,
}

impl AppState {
    /// Wire state over explicit backends.
    pub fn new(
        config: &KeystoneConfig,
        token_store: Arc<dyn TokenStore>,
        permission_graph: Arc<dyn PermissionGraphStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let access_tokens = Arc::new(Hs256AccessTokens::new(
            config.jwt_secret.as_bytes(),
            config.policy.access_token_ttl,
        ));
        let tokens = Arc::new(TokenLifecycleManager::new(
            token_store,
            Arc::new(OsTokenGenerator),
            clock.clone(),
            config.policy.clone(),
        ));

        Self {
            sessions: Arc::new(SessionService::new(
                tokens,
                access_tokens.clone(),
                config.revoke_all_on_reuse,
            )),
            resolver: Arc::new(PermissionGraphResolver::new(permission_graph)),
            access_tokens,
            clock,
            trust_forwarded_for: config.trust_forwarded_for,
        }
    }

    /// In-memory backends (dev/test).
    pub fn in_memory(
        config: &KeystoneConfig,
        permission_graph: Arc<InMemoryPermissionGraph>,
    ) -> Self {
        Self::new(
            config,
            InMemoryTokenStore::arc(),
            permission_graph,
            Arc::new(SystemClock),
        )
    }
}

/// Build state from configuration, connecting to Postgres when enabled.
pub async fn build_state(config: &KeystoneConfig) -> Result<AppState, sqlx::Error> {
    let database_url = config
        .database_url
        .as_deref()
        .filter(|_| config.use_persistent_stores);
    let Some(database_url) = database_url else {
        info!("using in-memory token and permission stores");
        return Ok(AppState::in_memory(config, Arc::new(InMemoryPermissionGraph::new())));
    };

    info!("using persistent stores (Postgres)");
    let pool = PgPool::connect(database_url).await?;
    Ok(AppState::new(
        config,
        Arc::new(PostgresTokenStore::new(pool.clone())),
        Arc::new(PostgresPermissionGraph::new(pool)),
        Arc::new(SystemClock),
    ))
}

/// Token exchange on top of the lifecycle manager: pairs every refresh token
/// with a fresh access credential and reacts to refresh-token reuse.
pub struct SessionService {
    tokens: Arc<TokenManager>,
    access_tokens: Arc<dyn AccessTokenIssuer>,
    revoke_all_on_reuse: bool,
}

impl SessionService {
    pub fn new(
        tokens: Arc<TokenManager>,
        access_tokens: Arc<dyn AccessTokenIssuer>,
        revoke_all_on_reuse: bool,
    ) -> Self {
        Self {
            tokens,
            access_tokens,
            revoke_all_on_reuse,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Open a session for a subject whose credentials were already verified.
    pub async fn login(
        &self,
        subject: SubjectId,
        origin: Option<String>,
        device: Option<String>,
    ) -> Result<TokenPair, ApiError> {
        let refresh = self
            .tokens
            .generate_for(subject, origin, device)
            .await
            .map_err(|e| {
                error!(error = %e, subject_id = %subject, "refresh token issuance failed");
                ApiError::Internal
            })?;
        self.pair(subject, refresh.token, refresh.expires_at)
    }

    /// Rotate `refresh_token` and issue a new pair.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        origin: Option<String>,
        device: Option<String>,
    ) -> Result<TokenPair, ApiError> {
        match self.tokens.rotate(refresh_token, origin, device).await {
            Ok(next) => self.pair(next.subject_id, next.token, next.expires_at),
            Err(LifecycleError::NotFound) => Err(ApiError::InvalidRefreshToken),
            Err(LifecycleError::NotActive { state, subject_id }) => {
                if state == TokenState::Used {
                    self.react_to_reuse(subject_id).await;
                }
                Err(ApiError::InvalidRefreshToken)
            }
            Err(e) => {
                error!(error = %e, "refresh token rotation failed");
                Err(ApiError::Internal)
            }
        }
    }

    /// Revoke a refresh token owned by `subject`. Tokens of other subjects
    /// report `false` like unknown ones.
    pub async fn revoke(
        &self,
        subject: SubjectId,
        refresh_token: &str,
        origin: Option<String>,
    ) -> Result<bool, ApiError> {
        match self.tokens.validate(refresh_token).await {
            Ok(record) if record.subject_id == subject => {}
            Ok(_) | Err(LifecycleError::NotFound) => return Ok(false),
            Err(e) => {
                error!(error = %e, "refresh token lookup failed");
                return Err(ApiError::Internal);
            }
        }

        self.tokens
            .revoke(refresh_token, origin)
            .await
            .map_err(|e| {
                error!(error = %e, "refresh token revocation failed");
                ApiError::Internal
            })
    }

    pub async fn revoke_all(&self, subject: SubjectId) -> Result<bool, ApiError> {
        self.tokens
            .revoke_all_for_subject(subject)
            .await
            .map_err(|e| {
                error!(error = %e, subject_id = %subject, "revoke-all failed");
                ApiError::Internal
            })
    }

    pub async fn sessions(&self, subject: SubjectId) -> Result<Vec<SessionView>, ApiError> {
        let records = self
            .tokens
            .active_sessions(subject)
            .await
            .map_err(|e| {
                error!(error = %e, subject_id = %subject, "session listing failed");
                ApiError::Internal
            })?;
        Ok(records.into_iter().map(SessionView::from).collect())
    }

    async fn react_to_reuse(&self, subject: SubjectId) {
        if !self.revoke_all_on_reuse {
            return;
        }
        match self.tokens.revoke_all_for_subject(subject).await {
            Ok(revoked) => warn!(
                target: SECURITY_TARGET,
                subject_id = %subject,
                revoked,
                "consumed refresh token replayed, all sessions of subject revoked"
            ),
            Err(e) => error!(
                target: SECURITY_TARGET,
                subject_id = %subject,
                error = %e,
                "consumed refresh token replayed, revoking sessions failed"
            ),
        }
    }

    fn pair(
        &self,
        subject: SubjectId,
        refresh_token: String,
        refresh_expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<TokenPair, ApiError> {
        let access = self
            .access_tokens
            .issue(subject, self.tokens.clock().now())
            .map_err(|e| {
                error!(error = %e, subject_id = %subject, "access token issuance failed");
                ApiError::Internal
            })?;
        Ok(TokenPair {
            access_token: access.token,
            refresh_token,
            expires_at: access.expires_at,
            refresh_token_expires_at: refresh_expires_at,
        })
    }
}
