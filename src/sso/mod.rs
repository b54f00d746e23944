//! SSO authentication core.
//!
//! OAuth2 authorization-code flow with PKCE against an OIDC provider,
//! local ID-token verification against the provider's JWKS, and the
//! session lifecycle behind the gateway's authentication gate.
//!
//! Layering, leaves first: [`primitives`] → [`pkce`] / [`jwt`] →
//! [`jwks`] / [`oidc`] / [`session`] → [`service`].

pub mod jwks;
pub mod jwt;
pub mod oidc;
pub mod pkce;
pub mod primitives;
pub mod service;
pub mod session;

pub use service::AuthService;
pub use session::SessionStore;
