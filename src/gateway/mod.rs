//! HTTP binding for the SSO subsystem: routes and the per-request gate.

pub mod guard;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::sso::service::AuthService;

/// Assemble the gateway router: the open `/auth` routes plus the
/// gate-protected surface.
pub fn router(service: Arc<AuthService>) -> Router {
    Router::new()
        .merge(routes::auth_routes(service.clone()))
        .merge(routes::protected_routes(service))
        .layer(TraceLayer::new_for_http())
}
