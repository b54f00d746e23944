//! Auth service — the protocol state machine behind the HTTP surface.
//!
//! One instance owns all mutable state (config snapshot, discovery and
//! JWKS caches, session store), constructor-injected so tests never share
//! state. Created once at process start, discarded at exit; nothing is
//! persisted.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::jwks::JwksCache;
use super::jwt::{self, ClaimExpectations};
use super::oidc::{AuthUrlParams, OidcClient, TokenResponse};
use super::pkce::PkcePair;
use super::primitives::{now_epoch_secs, random_id};
use super::session::{PendingAuth, Session, SessionStore, SessionTokens, SessionUser};
use crate::config::{ConfigLoader, SsoConfig};
use crate::error::{AuthError, Result};

/// Cached configuration snapshot. `Unloaded` means "never read";
/// `Loaded(None)` means "read, SSO disabled".
enum ConfigSlot {
    Unloaded,
    Loaded(Option<Arc<SsoConfig>>),
}

/// Parameters for [`AuthService::begin_login`].
#[derive(Debug, Default)]
pub struct BeginLogin {
    /// Gateway origin (`scheme://host[:port]`) the browser hit.
    pub base_url: String,
    /// Path to return the browser to after login.
    pub return_to: Option<String>,
    /// Optional provider `prompt` value.
    pub prompt: Option<String>,
}

/// Result of a successful `begin_login`.
#[derive(Debug)]
pub struct LoginRedirect {
    /// The provider authorization URL to redirect the browser to.
    pub url: String,
    /// The `state` the pending authorization was stored under.
    pub state: String,
}

/// Result of a successful `handle_callback`.
#[derive(Debug)]
pub struct CallbackOutcome {
    /// The freshly created session id (cookie value).
    pub session_id: String,
    /// The verified user.
    pub user: SessionUser,
    /// Where to send the browser next.
    pub redirect_to: String,
    /// Resolved post-logout redirect, for later use.
    pub post_logout_redirect_uri: Option<String>,
    /// The tokens now held by the session.
    pub tokens: SessionTokens,
}

/// Token projection returned by `refresh_session` and `/auth/token`.
#[derive(Debug, Clone, Serialize)]
pub struct TokenInfo {
    /// Current access token.
    #[serde(rename = "accessToken")]
    pub access_token: String,
    /// Access expiry, epoch seconds.
    #[serde(rename = "expiresAt")]
    pub expires_at: u64,
    /// Granted scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Usually `Bearer`.
    #[serde(rename = "tokenType", skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Result of `logout`. Always produced, even for unknown sessions.
#[derive(Debug)]
pub struct LogoutOutcome {
    /// Provider logout URL, when one could be built.
    pub redirect: Option<String>,
}

/// Orchestrates PKCE, OIDC, JWT verification and the session store.
pub struct AuthService {
    loader: ConfigLoader,
    config: RwLock<ConfigSlot>,
    oidc: OidcClient,
    jwks: JwksCache,
    store: SessionStore,
}

impl AuthService {
    /// Build a service with a default session store.
    #[must_use]
    pub fn new(loader: ConfigLoader) -> Self {
        Self::with_store(loader, SessionStore::new())
    }

    /// Build a service around an explicit store (tests shorten TTLs).
    #[must_use]
    pub fn with_store(loader: ConfigLoader, store: SessionStore) -> Self {
        let http = OidcClient::default_http_client();
        Self {
            loader,
            config: RwLock::new(ConfigSlot::Unloaded),
            oidc: OidcClient::new(http.clone()),
            jwks: JwksCache::new(http),
            store,
        }
    }

    /// The session store (the HTTP layer reads TTLs and sessions).
    #[must_use]
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Whether SSO is configured. When false, the gate admits all traffic.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.config().is_some()
    }

    /// Force a fresh configuration read and drop the metadata and JWKS
    /// caches. Called when workspace configuration changes at runtime.
    pub fn reload_config(&self) {
        let fresh = self.loader.load().map(Arc::new);
        info!(configured = fresh.is_some(), "Reloaded SSO configuration");
        *self.config.write() = ConfigSlot::Loaded(fresh);
        self.oidc.clear_cache();
        self.jwks.clear();
    }

    /// Current configuration snapshot, loading it on first use.
    fn config(&self) -> Option<Arc<SsoConfig>> {
        if let ConfigSlot::Loaded(ref snapshot) = *self.config.read() {
            return snapshot.clone();
        }
        let fresh = self.loader.load().map(Arc::new);
        let mut slot = self.config.write();
        if let ConfigSlot::Loaded(ref snapshot) = *slot {
            // Another task loaded while we were waiting for the lock.
            return snapshot.clone();
        }
        *slot = ConfigSlot::Loaded(fresh.clone());
        fresh
    }

    fn require_config(&self) -> Result<Arc<SsoConfig>> {
        self.config().ok_or(AuthError::NotConfigured)
    }

    /// Start a login: generate PKCE + state + nonce, store the pending
    /// authorization, and return the provider authorization URL.
    pub async fn begin_login(&self, request: BeginLogin) -> Result<LoginRedirect> {
        let config = self.require_config()?;
        let metadata = self.oidc.discover(&config.base_url, &config.realm).await?;

        let pkce = PkcePair::generate(64);
        let state = random_id(16);
        let nonce = random_id(16);
        let redirect_uri = resolve_redirect_uri(&config, &request.base_url);

        // URL first: a failed build must not leave a pending entry behind.
        let url = self.oidc.build_auth_url(
            &metadata,
            &config,
            &AuthUrlParams {
                state: &state,
                redirect_uri: &redirect_uri,
                code_challenge: &pkce.challenge,
                nonce: Some(&nonce),
                prompt: request.prompt.as_deref(),
            },
        )?;

        self.store.create_pending(
            &state,
            PendingAuth {
                code_verifier: pkce.verifier,
                redirect_uri,
                return_to: request.return_to,
                nonce,
                created_at: now_epoch_secs(),
            },
        );

        debug!(state = %state, "Login started");
        Ok(LoginRedirect { url, state })
    }

    /// Complete a login: consume the pending authorization, exchange the
    /// code, verify the ID token end to end, and create a session.
    pub async fn handle_callback(
        &self,
        code: &str,
        state: &str,
        base_url: &str,
    ) -> Result<CallbackOutcome> {
        let config = self.require_config()?;

        // Single-use consumption is the CSRF/replay defense: a second
        // callback with the same state finds nothing.
        let pending = self
            .store
            .consume_pending(state)
            .ok_or(AuthError::InvalidState)?;

        let metadata = self.oidc.discover(&config.base_url, &config.realm).await?;

        let response = self
            .oidc
            .exchange_code_for_tokens(
                &metadata,
                &config,
                code,
                &pending.redirect_uri,
                &pending.code_verifier,
            )
            .await?;

        let id_token = response
            .id_token
            .clone()
            .ok_or(AuthError::MissingIdToken)?;

        let decoded = jwt::decode_jwt(&id_token)?;
        let kid = decoded
            .header
            .kid
            .clone()
            .ok_or_else(|| AuthError::UnresolvedSigningKey("(header has no kid)".to_string()))?;

        let key = self
            .jwks
            .get_key(&metadata.jwks_uri, &kid)
            .await?
            .ok_or(AuthError::UnresolvedSigningKey(kid))?;

        if !jwt::verify_signature(&decoded, &key)? {
            return Err(AuthError::InvalidSignature);
        }

        jwt::validate_claims(
            &decoded.payload,
            &ClaimExpectations {
                issuer: &metadata.issuer,
                client_id: &config.client_id,
                nonce: Some(&pending.nonce),
            },
        )?;

        let now = now_epoch_secs();
        let expires_at = response.expires_in.map(|secs| now + secs);
        let refresh_expires_at = response.refresh_expires_in.map(|secs| now + secs);

        let user = map_claims_to_user(&decoded.payload);
        let tokens = SessionTokens {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            id_token: Some(id_token),
            scope: response.scope.clone(),
            token_type: response.token_type.clone(),
        };

        let session_id =
            self.store
                .create_session(user.clone(), tokens.clone(), expires_at, refresh_expires_at);

        info!(user = %user.username, "Login completed");
        Ok(CallbackOutcome {
            session_id,
            user,
            redirect_to: pending.return_to.unwrap_or_else(|| "/".to_string()),
            post_logout_redirect_uri: resolve_post_logout(&config, base_url),
            tokens,
        })
    }

    /// Look up a live session. TTL handling lives in the store.
    #[must_use]
    pub fn get_session(&self, session_id: &str) -> Option<Session> {
        self.store.get(session_id)
    }

    /// Refresh a session's tokens in place via the provider's refresh
    /// grant. Two racing refreshes are last-write-wins.
    pub async fn refresh_session(&self, session_id: &str) -> Result<TokenInfo> {
        let config = self.require_config()?;
        let session = self
            .store
            .get_refreshable(session_id)
            .ok_or(AuthError::SessionNotFound)?;
        let refresh_token = session
            .tokens
            .refresh_token
            .clone()
            .ok_or(AuthError::NoRefreshToken)?;

        let metadata = self.oidc.discover(&config.base_url, &config.realm).await?;
        let response = self
            .oidc
            .refresh_tokens(&metadata, &config, &refresh_token)
            .await?;

        let now = now_epoch_secs();
        let expires_at = response.expires_in.map(|secs| now + secs);
        let refresh_expires_at = response.refresh_expires_in.map(|secs| now + secs);
        let tokens = merge_tokens(&session.tokens, &response, refresh_token);

        self.store
            .update_tokens(session_id, tokens.clone(), expires_at, refresh_expires_at);

        debug!("Session refreshed");
        Ok(TokenInfo {
            access_token: tokens.access_token,
            expires_at: expires_at.unwrap_or(now + self.store.session_ttl_secs()),
            scope: tokens.scope,
            token_type: tokens.token_type,
        })
    }

    /// Delete a session (if any) and build a provider logout redirect.
    /// Idempotent: an unknown id still yields an outcome.
    pub async fn logout(&self, session_id: Option<&str>, base_url: &str) -> LogoutOutcome {
        let removed = session_id.and_then(|id| self.store.revoke(id));

        let Some(config) = self.config() else {
            return LogoutOutcome { redirect: None };
        };

        let metadata = match self.oidc.discover(&config.base_url, &config.realm).await {
            Ok(metadata) => metadata,
            Err(error) => {
                warn!(error = %error, "Logout: discovery failed, skipping provider redirect");
                return LogoutOutcome { redirect: None };
            }
        };

        let id_token_hint = removed.as_ref().and_then(|s| s.tokens.id_token.clone());
        let post_logout = resolve_post_logout(&config, base_url);

        LogoutOutcome {
            redirect: self.oidc.build_logout_url(
                &metadata,
                &config,
                id_token_hint.as_deref(),
                post_logout.as_deref(),
            ),
        }
    }
}

/// Configured redirect URI wins; otherwise derive from the gateway origin.
fn resolve_redirect_uri(config: &SsoConfig, base_url: &str) -> String {
    config.redirect_uri.clone().unwrap_or_else(|| {
        format!("{}/auth/callback", base_url.trim_end_matches('/'))
    })
}

/// Configured post-logout redirect wins; otherwise the gateway root.
fn resolve_post_logout(config: &SsoConfig, base_url: &str) -> Option<String> {
    config
        .post_logout_redirect_uri
        .clone()
        .or_else(|| Some(format!("{}/", base_url.trim_end_matches('/'))))
}

/// Map verified ID-token claims to the session's user record.
fn map_claims_to_user(payload: &serde_json::Value) -> SessionUser {
    let get_str =
        |key: &str| payload.get(key).and_then(|v| v.as_str()).map(String::from);

    let id = get_str("sub").unwrap_or_default();
    let email = get_str("email");
    let username = get_str("preferred_username")
        .or_else(|| email.clone())
        .unwrap_or_else(|| id.clone());

    let roles = payload
        .get("realm_access")
        .and_then(|v| v.get("roles"))
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    SessionUser {
        id,
        username,
        name: get_str("name"),
        email,
        roles,
        raw: payload.clone(),
    }
}

/// Keycloak may omit fields on the refresh grant; keep the old values.
fn merge_tokens(
    current: &SessionTokens,
    response: &TokenResponse,
    used_refresh_token: String,
) -> SessionTokens {
    SessionTokens {
        access_token: response.access_token.clone(),
        refresh_token: response
            .refresh_token
            .clone()
            .or(Some(used_refresh_token)),
        id_token: response.id_token.clone().or_else(|| current.id_token.clone()),
        scope: response.scope.clone().or_else(|| current.scope.clone()),
        token_type: response
            .token_type
            .clone()
            .or_else(|| current.token_type.clone()),
    }
}
