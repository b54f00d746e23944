//! OIDC client: discovery, authorization/logout URL builders and the
//! token grants.
//!
//! Discovery documents are cached per `base_url|realm` for five minutes.
//! All grants are form-encoded POSTs to the discovered token endpoint;
//! a non-2xx answer surfaces as [`AuthError::Upstream`] with the status
//! and a truncated body.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::SsoConfig;
use crate::error::{AuthError, Result, truncate_body};

/// Default time a discovery document stays fresh.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(300);

/// Timeout applied to every provider round trip.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The subset of the OIDC discovery document this gateway uses.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer URL; ID token `iss` claims must match it exactly.
    pub issuer: String,
    /// Where browsers are sent to authenticate.
    pub authorization_endpoint: String,
    /// Where authorization codes and refresh tokens are redeemed.
    pub token_endpoint: String,
    /// Where the provider publishes its signing keys.
    pub jwks_uri: String,
    /// RP-initiated logout endpoint, if the provider offers one.
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Token endpoint response for both the code and refresh grants.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The access token.
    pub access_token: String,
    /// Usually `Bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token, when the provider issues one.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Refresh token lifetime in seconds (Keycloak extension).
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    /// The OIDC ID token; required on the code grant.
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scope string.
    #[serde(default)]
    pub scope: Option<String>,
}

/// Parameters for building an authorization URL.
#[derive(Debug)]
pub struct AuthUrlParams<'a> {
    /// Anti-CSRF state, also the pending-authorization key.
    pub state: &'a str,
    /// Redirect URI registered for this login.
    pub redirect_uri: &'a str,
    /// PKCE challenge (S256).
    pub code_challenge: &'a str,
    /// Nonce bound into the ID token.
    pub nonce: Option<&'a str>,
    /// Optional `prompt` value (e.g. `login`).
    pub prompt: Option<&'a str>,
}

struct CachedMetadata {
    document: ProviderMetadata,
    fetched_at: Instant,
}

/// HTTP client for the OIDC provider, with a discovery-document cache.
pub struct OidcClient {
    http: reqwest::Client,
    metadata: DashMap<String, CachedMetadata>,
    metadata_ttl: Duration,
}

impl OidcClient {
    /// Create a client around an existing `reqwest` client.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            metadata: DashMap::new(),
            metadata_ttl: DEFAULT_METADATA_TTL,
        }
    }

    /// Build the shared HTTP client with the standard provider timeout.
    #[must_use]
    pub fn default_http_client() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default()
    }

    /// Fetch (or serve from cache) the provider's discovery document.
    ///
    /// Keycloak layout: `{base}/realms/{realm}/.well-known/openid-configuration`.
    pub async fn discover(&self, base_url: &str, realm: &str) -> Result<ProviderMetadata> {
        let cache_key = format!("{base_url}|{realm}");
        if let Some(entry) = self.metadata.get(&cache_key) {
            if entry.fetched_at.elapsed() < self.metadata_ttl {
                return Ok(entry.document.clone());
            }
        }

        let url = format!(
            "{}/realms/{}/.well-known/openid-configuration",
            base_url.trim_end_matches('/'),
            realm
        );
        debug!(url = %url, "Fetching OIDC discovery document");

        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Upstream {
                context: "OIDC discovery",
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let document: ProviderMetadata = response
            .json()
            .await
            .map_err(|_| AuthError::Upstream {
                context: "OIDC discovery",
                status: status.as_u16(),
                body: "unparseable discovery document".to_string(),
            })?;

        self.metadata.insert(
            cache_key,
            CachedMetadata {
                document: document.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(document)
    }

    /// Drop cached discovery documents. Called on configuration reload.
    pub fn clear_cache(&self) {
        self.metadata.clear();
    }

    /// Build the provider authorization URL for a login attempt.
    pub fn build_auth_url(
        &self,
        metadata: &ProviderMetadata,
        config: &SsoConfig,
        params: &AuthUrlParams<'_>,
    ) -> Result<String> {
        let mut url = Url::parse(&metadata.authorization_endpoint)
            .map_err(|_| AuthError::Upstream {
                context: "OIDC discovery",
                status: 0,
                body: "invalid authorization_endpoint".to_string(),
            })?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("response_type", "code");
            query.append_pair("client_id", &config.client_id);
            query.append_pair("scope", &config.scope);
            query.append_pair("state", params.state);
            query.append_pair("redirect_uri", params.redirect_uri);
            query.append_pair("code_challenge", params.code_challenge);
            query.append_pair("code_challenge_method", super::pkce::CHALLENGE_METHOD);
            if let Some(nonce) = params.nonce {
                query.append_pair("nonce", nonce);
            }
            if let Some(prompt) = params.prompt {
                query.append_pair("prompt", prompt);
            }
        }

        Ok(url.into())
    }

    /// Redeem an authorization code for tokens.
    pub async fn exchange_code_for_tokens(
        &self,
        metadata: &ProviderMetadata,
        config: &SsoConfig,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &config.client_id),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        self.token_grant(&metadata.token_endpoint, &form, "Token exchange")
            .await
    }

    /// Redeem a refresh token for a fresh token set.
    pub async fn refresh_tokens(
        &self,
        metadata: &ProviderMetadata,
        config: &SsoConfig,
        refresh_token: &str,
    ) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &config.client_id),
        ];
        if let Some(secret) = config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }

        self.token_grant(&metadata.token_endpoint, &form, "Token refresh")
            .await
    }

    /// Build the provider logout URL, if the provider publishes an
    /// end-session endpoint.
    pub fn build_logout_url(
        &self,
        metadata: &ProviderMetadata,
        config: &SsoConfig,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: Option<&str>,
    ) -> Option<String> {
        let endpoint = metadata.end_session_endpoint.as_deref()?;
        let mut url = Url::parse(endpoint).ok()?;

        {
            let mut query = url.query_pairs_mut();
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            if let Some(redirect) = post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", redirect);
            }
            query.append_pair("client_id", &config.client_id);
        }

        Some(url.into())
    }

    async fn token_grant(
        &self,
        token_endpoint: &str,
        form: &[(&str, &str)],
        context: &'static str,
    ) -> Result<TokenResponse> {
        let response = self.http.post(token_endpoint).form(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Upstream {
                context,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        response.json().await.map_err(|_| AuthError::Upstream {
            context,
            status: status.as_u16(),
            body: "unparseable token response".to_string(),
        })
    }
}
