//! Ploinky Gateway — SSO authentication core.
//!
//! The gateway fronts a fleet of containerized agent services; this
//! crate implements its authentication subsystem:
//!
//! - **OAuth2 Authorization Code + PKCE** against an external OIDC
//!   provider (Keycloak-style realms)
//! - **Local ID-token verification**: JWT decode, RSA-SHA256 signature
//!   check against the provider's JWKS, claim validation — no provider
//!   SDK involved
//! - **Session lifecycle**: in-memory, time-boxed, lazily swept
//! - **Authentication gate**: the middleware every other gateway route
//!   runs through, attaching identity or rejecting traffic
//!
//! When SSO is unconfigured the gate admits everything, preserving
//! pre-SSO deployments.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod sso;

pub use error::{AuthError, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging.
pub fn setup_tracing(level: &str, format: Option<&str>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }
}
