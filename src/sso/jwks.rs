//! JWKS cache — time-boxed mapping from signing-key id to key material.
//!
//! On a verification-time miss for a requested `kid`, exactly one forced
//! refetch is attempted before giving up; there is never a retry loop.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, Result, truncate_body};

/// Default time a fetched key set stays fresh.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(300);

/// A single JSON Web Key as published by the provider.
///
/// Only RSA fields are mapped; anything else fails closed at
/// verification time.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type, e.g. `RSA`.
    pub kty: String,
    /// Key id.
    #[serde(default)]
    pub kid: Option<String>,
    /// Intended algorithm, e.g. `RS256`.
    #[serde(default)]
    pub alg: Option<String>,
    /// Intended use, e.g. `sig`.
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus, base64url.
    #[serde(default)]
    pub n: Option<String>,
    /// RSA public exponent, base64url.
    #[serde(default)]
    pub e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwkSetDocument {
    #[serde(default)]
    keys: Vec<Jwk>,
}

struct CachedJwks {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
}

impl CachedJwks {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Cache of JWKS documents, keyed by JWKS URI.
pub struct JwksCache {
    inner: DashMap<String, CachedJwks>,
    http: reqwest::Client,
    ttl: Duration,
}

impl JwksCache {
    /// Create a cache with the default 5-minute TTL.
    #[must_use]
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_ttl(http, DEFAULT_JWKS_TTL)
    }

    /// Create a cache with an explicit TTL.
    #[must_use]
    pub fn with_ttl(http: reqwest::Client, ttl: Duration) -> Self {
        Self {
            inner: DashMap::new(),
            http,
            ttl,
        }
    }

    /// Resolve a signing key by `kid`.
    ///
    /// A fresh cache entry containing the key answers without network
    /// traffic. On staleness, or when the `kid` is absent from a fresh
    /// entry, one GET replaces the cache entry; if the `kid` is still
    /// absent afterwards the result is `None`.
    pub async fn get_key(&self, jwks_uri: &str, kid: &str) -> Result<Option<Jwk>> {
        if let Some(entry) = self.inner.get(jwks_uri) {
            if !entry.is_stale(self.ttl) {
                if let Some(key) = entry.keys.get(kid) {
                    return Ok(Some(key.clone()));
                }
                debug!(kid, "kid not in fresh JWKS entry, forcing one refetch");
            }
        }

        let keys = self.fetch(jwks_uri).await?;
        Ok(keys.get(kid).cloned())
    }

    /// Drop all cached key sets. Called on configuration reload.
    pub fn clear(&self) {
        self.inner.clear();
    }

    async fn fetch(&self, jwks_uri: &str) -> Result<HashMap<String, Jwk>> {
        debug!(uri = %jwks_uri, "Fetching JWKS");
        let response = self.http.get(jwks_uri).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Upstream {
                context: "JWKS fetch",
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let document: JwkSetDocument = response
            .json()
            .await
            .map_err(|_| AuthError::MalformedKey)?;

        let keys: HashMap<String, Jwk> = document
            .keys
            .into_iter()
            .filter_map(|key| key.kid.clone().map(|kid| (kid, key)))
            .collect();

        self.inner.insert(
            jwks_uri.to_string(),
            CachedJwks {
                keys: keys.clone(),
                fetched_at: Instant::now(),
            },
        );

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jwk_set_parses_and_ignores_unknown_fields() {
        let raw = r#"{
            "keys": [
                {"kty": "RSA", "kid": "a", "use": "sig", "alg": "RS256",
                 "n": "abc", "e": "AQAB", "x5c": ["ignored"]},
                {"kty": "EC", "crv": "P-256", "x": "x", "y": "y"}
            ]
        }"#;
        let doc: JwkSetDocument = serde_json::from_str(raw).unwrap();
        assert_eq!(doc.keys.len(), 2);
        assert_eq!(doc.keys[0].kid.as_deref(), Some("a"));
        assert_eq!(doc.keys[0].key_use.as_deref(), Some("sig"));
        // The EC key has no kid and would never be indexed.
        assert!(doc.keys[1].kid.is_none());
    }

    #[test]
    fn stale_check_respects_ttl() {
        let entry = CachedJwks {
            keys: HashMap::new(),
            fetched_at: Instant::now(),
        };
        assert!(!entry.is_stale(Duration::from_secs(300)));
        assert!(entry.is_stale(Duration::ZERO));
    }
}
