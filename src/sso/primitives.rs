//! Random identifiers and base64url codecs.
//!
//! Everything opaque in the subsystem — `state`, `nonce`, pending keys,
//! session ids — comes out of [`random_id`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;

/// Generate `n` cryptographically random bytes, base64url-encoded without
/// padding.
#[must_use]
pub fn random_id(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Base64url-encode bytes without padding.
#[must_use]
pub fn b64url_encode(data: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Base64url-decode, tolerating missing padding.
///
/// JWT segments arrive unpadded; some providers emit padded values in
/// JWKS documents. Trailing `=` is stripped before decoding so both
/// forms work.
pub fn b64url_decode(input: &str) -> Option<Vec<u8>> {
    let trimmed = input.trim_end_matches('=');
    URL_SAFE_NO_PAD.decode(trimmed).ok()
}

/// Current time as Unix epoch seconds.
#[must_use]
pub fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}
