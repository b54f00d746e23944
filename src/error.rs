//! Error types for the Ploinky gateway SSO core.
//!
//! The variants form a closed set so callers branch on kind, never on
//! message text. Protocol failures (`InvalidState`, `InvalidSignature`, …)
//! are fatal to the specific login attempt; only the JWKS refetch-on-miss
//! retries anything.

use thiserror::Error;

/// Result type alias for the SSO core.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors produced by the SSO authentication subsystem.
#[derive(Error, Debug)]
pub enum AuthError {
    /// SSO is not configured. Not fatal: the authentication gate admits
    /// all traffic when this is the state of the world.
    #[error("SSO is not configured")]
    NotConfigured,

    /// A JWT did not have exactly three segments, or a segment failed to
    /// decode or parse.
    #[error("Malformed token")]
    MalformedToken,

    /// The callback carried a `state` with no matching pending
    /// authorization (expired, replayed, or forged).
    #[error("Invalid or expired authorization state")]
    InvalidState,

    /// The token endpoint response did not include an ID token.
    #[error("Token response did not include an id_token")]
    MissingIdToken,

    /// The token's `kid` was not present in the JWKS, even after one
    /// forced refetch.
    #[error("Unable to resolve signing key: {0}")]
    UnresolvedSigningKey(String),

    /// The ID token signature did not verify against the resolved key.
    #[error("ID token signature verification failed")]
    InvalidSignature,

    /// A JWKS entry could not be imported as a public key.
    #[error("Malformed signing key material")]
    MalformedKey,

    /// The token's `iss` claim did not match the discovered issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    InvalidIssuer {
        /// Issuer from the discovery document.
        expected: String,
        /// Issuer found in the token.
        actual: String,
    },

    /// The token's `aud` claim did not contain the configured client id.
    #[error("Audience mismatch: token not issued for {expected}")]
    AudienceMismatch {
        /// The expected audience (our client id).
        expected: String,
    },

    /// The token's `exp` claim is in the past (beyond clock skew).
    #[error("Token has expired")]
    TokenExpired,

    /// The token's `nbf` claim is in the future (beyond clock skew).
    #[error("Token is not yet valid")]
    NotYetValid,

    /// The token's `nonce` claim did not match the one stored for the
    /// pending authorization.
    #[error("Nonce mismatch")]
    NonceMismatch,

    /// The provider returned a non-2xx response.
    #[error("{context} failed: HTTP {status} - {body}")]
    Upstream {
        /// Which provider endpoint was called.
        context: &'static str,
        /// Upstream HTTP status code.
        status: u16,
        /// Truncated upstream response body.
        body: String,
    },

    /// Network-level failure talking to the provider.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// No session exists under the given id.
    #[error("Session not found or expired")]
    SessionNotFound,

    /// The session holds no refresh token, so it cannot be refreshed.
    #[error("Session has no refresh token")]
    NoRefreshToken,
}

impl AuthError {
    /// Stable machine-readable error code, used in JSON error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotConfigured => "sso_disabled",
            Self::MalformedToken => "malformed_token",
            Self::InvalidState => "invalid_state",
            Self::MissingIdToken => "missing_id_token",
            Self::UnresolvedSigningKey(_) => "unresolved_signing_key",
            Self::InvalidSignature => "invalid_signature",
            Self::MalformedKey => "malformed_key",
            Self::InvalidIssuer { .. } => "invalid_issuer",
            Self::AudienceMismatch { .. } => "audience_mismatch",
            Self::TokenExpired => "token_expired",
            Self::NotYetValid => "token_not_yet_valid",
            Self::NonceMismatch => "nonce_mismatch",
            Self::Upstream { .. } => "upstream_error",
            Self::Http(_) => "upstream_unreachable",
            Self::SessionNotFound => "session_not_found",
            Self::NoRefreshToken => "no_refresh_token",
        }
    }
}

/// Truncate an upstream response body for inclusion in an error.
#[must_use]
pub fn truncate_body(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        body.to_string()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_bodies() {
        assert_eq!(truncate_body("oops"), "oops");
    }

    #[test]
    fn truncate_caps_long_bodies() {
        let long = "x".repeat(1000);
        let truncated = truncate_body(&long);
        assert!(truncated.len() < long.len());
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(AuthError::InvalidState.code(), "invalid_state");
        assert_eq!(AuthError::NotConfigured.code(), "sso_disabled");
        assert_eq!(
            AuthError::UnresolvedSigningKey("abc".into()).code(),
            "unresolved_signing_key"
        );
    }
}
