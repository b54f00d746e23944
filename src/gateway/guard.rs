//! Per-request authentication gate and session cookie handling.
//!
//! Every non-`/auth` route in the gateway runs through
//! [`ensure_authenticated`]. When SSO is unconfigured the gate admits
//! everything (legacy mode). Otherwise the session cookie is resolved,
//! an expired session gets exactly one refresh attempt, identity is
//! attached to the request (extension + forwarded headers), and the
//! cookie is re-issued with a rolling expiration.

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::sso::service::AuthService;
use crate::sso::session::{Session, SessionUser};

/// Session cookie name.
pub const SESSION_COOKIE: &str = "ploinky_sso";

/// Identity attached to authenticated requests as an extension.
#[derive(Debug, Clone)]
pub struct RequestIdentity {
    /// The session id behind this request.
    pub session_id: String,
    /// The verified user.
    pub user: SessionUser,
}

/// Extract the session cookie value from the request headers.
#[must_use]
pub fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.trim().to_string())
    })
}

/// Whether the request arrived over HTTPS, directly or via a proxy.
#[must_use]
pub fn is_secure_request(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Build the session `Set-Cookie` value with a rolling `Max-Age`.
#[must_use]
pub fn issue_cookie(session_id: &str, max_age_secs: u64, secure: bool) -> String {
    let mut cookie = format!(
        "{SESSION_COOKIE}={session_id}; Max-Age={max_age_secs}; Path=/; HttpOnly; SameSite=Strict"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Build a `Set-Cookie` value that clears the session cookie.
#[must_use]
pub fn clear_cookie(secure: bool) -> String {
    issue_cookie("", 0, secure)
}

/// Reconstruct the gateway origin (`scheme://host[:port]`) from headers.
#[must_use]
pub fn request_base_url(headers: &HeaderMap) -> String {
    let scheme = if is_secure_request(headers) { "https" } else { "http" };
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

/// Append a `Set-Cookie` header to a response, if the value is valid.
pub fn append_set_cookie(response: &mut Response, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
}

/// The authentication gate.
pub async fn ensure_authenticated(
    State(service): State<Arc<AuthService>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    // Legacy mode: no SSO configured, admit everything.
    if !service.is_configured() {
        return next.run(request).await;
    }

    let secure = is_secure_request(request.headers());
    let path = request.uri().path().to_string();
    let wants_json = wants_json(request.method(), request.headers());

    let Some(session_id) = session_cookie(request.headers()) else {
        warn!(event = "auth_missing_cookie", path = %path, "Rejecting request without session cookie");
        return respond_unauthenticated(wants_json, &path, secure);
    };

    let mut session = service.get_session(&session_id);

    // Expired (or vanished) session: exactly one refresh attempt.
    if session.is_none() {
        match service.refresh_session(&session_id).await {
            Ok(_) => session = service.get_session(&session_id),
            Err(error) => {
                debug!(event = "auth_refresh_failed", error = %error, "Session refresh failed");
            }
        }
    }

    let Some(session) = session else {
        warn!(event = "auth_session_invalid", path = %path, "Rejecting request with invalid session");
        return respond_unauthenticated(wants_json, &path, secure);
    };

    attach_identity(&mut request, &session_id, &session);

    let ttl = service.store().session_ttl_secs();
    let mut response = next.run(request).await;
    append_set_cookie(&mut response, &issue_cookie(&session_id, ttl, secure));
    response
}

/// JSON is for API callers: an explicit `Accept: application/json` or
/// any non-GET method. Browsers navigating get the redirect.
fn wants_json(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

/// Reject an unauthenticated request: 401 JSON when the caller wants
/// JSON or the method is not GET, otherwise a 302 to the login flow.
/// Either way the cookie is cleared.
fn respond_unauthenticated(wants_json: bool, path: &str, secure: bool) -> Response {
    let return_to: String = form_urlencoded::byte_serialize(path.as_bytes()).collect();
    let login_url = format!("/auth/login?returnTo={return_to}");

    let mut response = if wants_json {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error": "not_authenticated", "login": login_url})),
        )
            .into_response()
    } else {
        (
            StatusCode::FOUND,
            [(header::LOCATION, login_url.clone())],
        )
            .into_response()
    };
    append_set_cookie(&mut response, &clear_cookie(secure));
    response
}

/// Attach identity to the request: extension for in-process handlers and
/// forwarded headers for downstream agents.
fn attach_identity(request: &mut Request<Body>, session_id: &str, session: &Session) {
    let user = &session.user;

    let headers = request.headers_mut();
    set_header(headers, "x-ploinky-user-id", &user.id);
    set_header(headers, "x-ploinky-user", &user.username);
    if let Some(email) = user.email.as_deref() {
        set_header(headers, "x-ploinky-user-email", email);
    }
    set_header(headers, "x-ploinky-user-roles", &user.roles.join(","));
    set_header(headers, "x-ploinky-session-id", session_id);
    set_header(
        headers,
        "authorization",
        &format!("Bearer {}", session.tokens.access_token),
    );

    request.extensions_mut().insert(RequestIdentity {
        session_id: session_id.to_string(),
        user: user.clone(),
    });
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
