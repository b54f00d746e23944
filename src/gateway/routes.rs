//! HTTP surface of the SSO subsystem.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/auth/login` | Redirect the browser to the provider |
//! | `GET` | `/auth/callback` | Complete the login, set the session cookie |
//! | `GET`/`POST` | `/auth/logout` | Revoke the session, clear the cookie |
//! | `GET`/`POST` | `/auth/token` | Current token snapshot; `{refresh:true}` forces a refresh |
//! | `GET` | `/auth/whoami` | Authenticated identity (behind the gate) |
//!
//! Unmatched methods on these paths answer 405 via axum's method
//! routers. Errors leave as `{ok:false, error, detail}` JSON.

use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use super::guard::{
    self, RequestIdentity, append_set_cookie, clear_cookie, is_secure_request, issue_cookie,
    request_base_url, session_cookie,
};
use crate::error::AuthError;
use crate::sso::service::{AuthService, BeginLogin, TokenInfo};

/// The `/auth` routes that run *without* the authentication gate —
/// they are the authentication step.
pub fn auth_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", get(logout).post(logout))
        .route("/auth/token", get(token).post(token))
        .with_state(service)
}

/// Routes behind the gate; the minimal in-crate consumer of the
/// identity the gate attaches.
pub fn protected_routes(service: Arc<AuthService>) -> Router {
    Router::new()
        .route("/auth/whoami", get(whoami))
        .layer(axum::middleware::from_fn_with_state(
            service,
            guard::ensure_authenticated,
        ))
}

#[derive(Debug, Deserialize)]
struct LoginQuery {
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogoutQuery {
    #[serde(rename = "returnTo")]
    return_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenRequest {
    #[serde(default)]
    refresh: bool,
}

/// `GET /auth/login` — start the authorization-code flow.
async fn login(
    State(service): State<Arc<AuthService>>,
    headers: HeaderMap,
    Query(query): Query<LoginQuery>,
) -> Response {
    if !service.is_configured() {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "sso_disabled", "SSO is not configured");
    }

    let request = BeginLogin {
        base_url: request_base_url(&headers),
        return_to: query.return_to,
        prompt: query.prompt,
    };

    match service.begin_login(request).await {
        Ok(redirect) => found(&redirect.url),
        Err(error) => auth_error_response(&error),
    }
}

/// `GET /auth/callback` — consume the provider redirect.
async fn callback(
    State(service): State<Arc<AuthService>>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let (Some(code), Some(state)) = (query.code, query.state) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing_parameters",
            "code and state are required",
        );
    };

    let secure = is_secure_request(&headers);
    match service
        .handle_callback(&code, &state, &request_base_url(&headers))
        .await
    {
        Ok(outcome) => {
            let mut response = found(&outcome.redirect_to);
            let ttl = service.store().session_ttl_secs();
            append_set_cookie(&mut response, &issue_cookie(&outcome.session_id, ttl, secure));
            response
        }
        Err(error) => auth_error_response(&error),
    }
}

/// `GET|POST /auth/logout` — revoke the session and clear the cookie.
async fn logout(
    State(service): State<Arc<AuthService>>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<LogoutQuery>,
) -> Response {
    let secure = is_secure_request(&headers);
    let session_id = session_cookie(&headers);

    let outcome = service
        .logout(session_id.as_deref(), &request_base_url(&headers))
        .await;

    // Provider end-session URL wins, then the caller's returnTo.
    let target = outcome.redirect.or(query.return_to);

    let mut response = match target {
        Some(target) => found(&target),
        None if method == Method::GET => found("/"),
        None => (StatusCode::OK, Json(json!({"ok": true}))).into_response(),
    };
    append_set_cookie(&mut response, &clear_cookie(secure));
    response
}

/// `GET|POST /auth/token` — current token snapshot for API callers;
/// `POST {"refresh":true}` forces a refresh grant first.
async fn token(
    State(service): State<Arc<AuthService>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let secure = is_secure_request(&headers);

    let Some(session_id) = session_cookie(&headers) else {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "not_authenticated",
            "No session cookie",
        );
    };

    let force_refresh = method == Method::POST
        && serde_json::from_slice::<TokenRequest>(&body)
            .unwrap_or_default()
            .refresh;

    if force_refresh {
        if let Err(error) = service.refresh_session(&session_id).await {
            warn!(event = "auth_refresh_failed", error = %error, "Forced token refresh failed");
            let mut response =
                error_response(StatusCode::UNAUTHORIZED, "refresh_failed", "Token refresh failed");
            append_set_cookie(&mut response, &clear_cookie(secure));
            return response;
        }
    }

    let Some(session) = service.get_session(&session_id) else {
        warn!(event = "auth_session_invalid", "Token requested for expired session");
        let mut response = error_response(
            StatusCode::UNAUTHORIZED,
            "not_authenticated",
            "Session expired",
        );
        append_set_cookie(&mut response, &clear_cookie(secure));
        return response;
    };

    let token = TokenInfo {
        access_token: session.tokens.access_token.clone(),
        expires_at: session.expires_at,
        scope: session.tokens.scope.clone(),
        token_type: session.tokens.token_type.clone(),
    };

    let ttl = service.store().session_ttl_secs();
    let mut response = (
        StatusCode::OK,
        Json(json!({"ok": true, "token": token, "user": session.user})),
    )
        .into_response();
    append_set_cookie(&mut response, &issue_cookie(&session_id, ttl, secure));
    response
}

/// `GET /auth/whoami` — echo the identity the gate attached. In legacy
/// mode (SSO unconfigured) the gate attaches nothing and the caller is
/// anonymous.
async fn whoami(identity: Option<Extension<RequestIdentity>>) -> Response {
    match identity {
        Some(Extension(identity)) => (
            StatusCode::OK,
            Json(json!({
                "ok": true,
                "user": identity.user,
                "sessionId": identity.session_id,
            })),
        )
            .into_response(),
        None => (
            StatusCode::OK,
            Json(json!({"ok": true, "user": serde_json::Value::Null})),
        )
            .into_response(),
    }
}

/// 302 with a `Location` header. `Redirect::to` answers 303, and the
/// contract here is a plain found-redirect.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// Structured JSON error body.
fn error_response(status: StatusCode, error: &str, detail: &str) -> Response {
    (
        status,
        Json(json!({"ok": false, "error": error, "detail": detail})),
    )
        .into_response()
}

/// Map a service error onto the HTTP contract and log it.
fn auth_error_response(error: &AuthError) -> Response {
    warn!(event = "auth_error", error = %error, code = error.code(), "Auth operation failed");
    let status = match error {
        AuthError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        AuthError::InvalidState => StatusCode::BAD_REQUEST,
        AuthError::SessionNotFound | AuthError::NoRefreshToken => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, error.code(), &error.to_string())
}
