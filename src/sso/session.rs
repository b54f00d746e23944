//! In-memory session store: pending authorizations and active sessions.
//!
//! Both maps are time-boxed. There is no background reaper: every create
//! and consume call performs an O(n) sweep, which is fine at the
//! cardinality of interactive browser sessions. A process restart drops
//! everything, forcing re-authentication.

use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::primitives::{now_epoch_secs, random_id};

/// Default pending-authorization lifetime.
pub const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(300);

/// Default session lifetime (matches the cookie `Max-Age`).
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(4 * 3600);

/// A login attempt awaiting its callback, keyed by the opaque `state`.
///
/// Consumed exactly once: the delete-on-read in
/// [`SessionStore::consume_pending`] is the subsystem's CSRF and replay
/// defense.
#[derive(Debug, Clone)]
pub struct PendingAuth {
    /// PKCE verifier to present at the token endpoint.
    pub code_verifier: String,
    /// Redirect URI the authorization request was built with.
    pub redirect_uri: String,
    /// Where to send the browser after a successful login.
    pub return_to: Option<String>,
    /// Nonce bound into the ID token.
    pub nonce: String,
    /// Creation time, epoch seconds.
    pub created_at: u64,
}

/// Identity extracted from a verified ID token.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUser {
    /// OIDC `sub` claim.
    pub id: String,
    /// `preferred_username`, falling back to email, falling back to `sub`.
    pub username: String,
    /// Display name, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Email, if present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Realm roles (`realm_access.roles`).
    pub roles: Vec<String>,
    /// The full ID token payload.
    #[serde(skip_serializing)]
    pub raw: Value,
}

/// Provider tokens held by a session.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    /// Bearer token forwarded to downstream agents.
    pub access_token: String,
    /// Refresh token, when issued.
    pub refresh_token: Option<String>,
    /// ID token, kept as the `id_token_hint` for logout.
    pub id_token: Option<String>,
    /// Granted scope.
    pub scope: Option<String>,
    /// Usually `Bearer`.
    pub token_type: Option<String>,
}

/// An authenticated browser session.
#[derive(Debug, Clone)]
pub struct Session {
    /// The verified user.
    pub user: SessionUser,
    /// Current provider tokens.
    pub tokens: SessionTokens,
    /// Creation time, epoch seconds.
    pub created_at: u64,
    /// Last access time; touched by every successful lookup.
    pub updated_at: u64,
    /// Access expiry, epoch seconds.
    pub expires_at: u64,
    /// Refresh-token expiry, when known.
    pub refresh_expires_at: Option<u64>,
}

impl Session {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    /// Whether a refresh grant could still revive this session.
    fn is_refreshable(&self, now: u64) -> bool {
        self.tokens.refresh_token.is_some()
            && self.refresh_expires_at.is_none_or(|at| now <= at)
    }
}

/// The two time-boxed maps behind the auth service.
pub struct SessionStore {
    pending: DashMap<String, PendingAuth>,
    sessions: DashMap<String, Session>,
    pending_ttl: u64,
    session_ttl: u64,
}

impl SessionStore {
    /// Store with default TTLs (5 min pending, 4 h sessions).
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttls(DEFAULT_PENDING_TTL, DEFAULT_SESSION_TTL)
    }

    /// Store with explicit TTLs.
    #[must_use]
    pub fn with_ttls(pending_ttl: Duration, session_ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            sessions: DashMap::new(),
            pending_ttl: pending_ttl.as_secs(),
            session_ttl: session_ttl.as_secs(),
        }
    }

    /// Default session lifetime in seconds; also the cookie `Max-Age`.
    #[must_use]
    pub fn session_ttl_secs(&self) -> u64 {
        self.session_ttl
    }

    // ── pending authorizations ───────────────────────────────────────────

    /// Store a pending authorization under the caller's `state`.
    pub fn create_pending(&self, state: &str, pending: PendingAuth) {
        let now = now_epoch_secs();
        self.sweep_pending(now);
        self.pending.insert(state.to_string(), pending);
    }

    /// Consume a pending authorization: delete-on-read, single use.
    pub fn consume_pending(&self, state: &str) -> Option<PendingAuth> {
        let now = now_epoch_secs();
        self.sweep_pending(now);
        let (_, pending) = self.pending.remove(state)?;
        if now.saturating_sub(pending.created_at) > self.pending_ttl {
            debug!("pending authorization expired at consumption");
            return None;
        }
        Some(pending)
    }

    // ── sessions ─────────────────────────────────────────────────────────

    /// Create a session and return its fresh random id.
    ///
    /// `expires_at` falls back to now + the store's default session TTL
    /// when the token response carried no lifetime.
    pub fn create_session(
        &self,
        user: SessionUser,
        tokens: SessionTokens,
        expires_at: Option<u64>,
        refresh_expires_at: Option<u64>,
    ) -> String {
        let now = now_epoch_secs();
        self.sweep_sessions(now);
        let session_id = random_id(32);
        self.sessions.insert(
            session_id.clone(),
            Session {
                user,
                tokens,
                created_at: now,
                updated_at: now,
                expires_at: expires_at.unwrap_or(now + self.session_ttl),
                refresh_expires_at,
            },
        );
        session_id
    }

    /// Look up a live session, touching `updated_at`.
    ///
    /// An expired session is invisible. One that can never be refreshed
    /// is removed outright; a refreshable one is kept so
    /// [`Self::get_refreshable`] can still revive it.
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let now = now_epoch_secs();
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.is_expired(now) {
            let refreshable = entry.is_refreshable(now);
            drop(entry);
            if !refreshable {
                self.sessions.remove(session_id);
                debug!("lazy-evicted expired session");
            }
            return None;
        }
        entry.updated_at = now;
        Some(entry.clone())
    }

    /// Look up a session for refreshing: expiry of the access token is
    /// ignored, but the refresh window must still be open.
    pub fn get_refreshable(&self, session_id: &str) -> Option<Session> {
        let now = now_epoch_secs();
        let entry = self.sessions.get(session_id)?;
        if entry.is_expired(now) && !entry.is_refreshable(now) {
            drop(entry);
            self.sessions.remove(session_id);
            return None;
        }
        Some(entry.clone())
    }

    /// Replace a session's tokens and expiries in place. Last write wins
    /// when two refreshes race; that is accepted behavior.
    pub fn update_tokens(
        &self,
        session_id: &str,
        tokens: SessionTokens,
        expires_at: Option<u64>,
        refresh_expires_at: Option<u64>,
    ) -> bool {
        let now = now_epoch_secs();
        let Some(mut entry) = self.sessions.get_mut(session_id) else {
            return false;
        };
        entry.tokens = tokens;
        entry.expires_at = expires_at.unwrap_or(now + self.session_ttl);
        entry.refresh_expires_at = refresh_expires_at;
        entry.updated_at = now;
        true
    }

    /// Delete a session, returning it if it existed.
    pub fn revoke(&self, session_id: &str) -> Option<Session> {
        self.sessions.remove(session_id).map(|(_, session)| session)
    }

    fn sweep_pending(&self, now: u64) {
        self.pending
            .retain(|_, pending| now.saturating_sub(pending.created_at) <= self.pending_ttl);
    }

    fn sweep_sessions(&self, now: u64) {
        self.sessions
            .retain(|_, session| !session.is_expired(now) || session.is_refreshable(now));
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
