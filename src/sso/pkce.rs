//! PKCE verifier/challenge generation (RFC 7636).
//!
//! Only the `S256` challenge method is offered. The `plain` method would
//! let a network observer replay the verifier, so it is never emitted.

use sha2::{Digest, Sha256};

use super::primitives::{b64url_encode, random_id};

/// The only challenge method this gateway emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// RFC 7636 bounds on the verifier length, in characters.
const VERIFIER_MIN: usize = 43;
const VERIFIER_MAX: usize = 128;

/// A PKCE verifier/challenge pair.
#[derive(Debug, Clone)]
pub struct PkcePair {
    /// The client-held secret, sent with the token exchange.
    pub verifier: String,
    /// base64url(SHA-256(verifier)), sent with the authorization request.
    pub challenge: String,
}

impl PkcePair {
    /// Generate a pair whose verifier is built from `length` random bytes,
    /// clamped to the RFC-mandated [43, 128] character range.
    #[must_use]
    pub fn generate(length: usize) -> Self {
        let mut verifier = random_id(length);
        if verifier.len() < VERIFIER_MIN {
            // 43 base64url chars need 33 source bytes; regenerate at the floor.
            verifier = random_id(33);
        }
        verifier.truncate(VERIFIER_MAX);

        let digest = Sha256::digest(verifier.as_bytes());
        let challenge = b64url_encode(digest);

        Self { verifier, challenge }
    }
}

impl Default for PkcePair {
    fn default() -> Self {
        Self::generate(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sso::primitives::b64url_decode;

    #[test]
    fn challenge_is_sha256_of_verifier() {
        let pair = PkcePair::generate(64);
        let expected = b64url_encode(Sha256::digest(pair.verifier.as_bytes()));
        assert_eq!(pair.challenge, expected);
    }

    #[test]
    fn verifier_length_is_within_rfc_bounds() {
        for length in [1usize, 16, 32, 64, 96, 200] {
            let pair = PkcePair::generate(length);
            assert!(
                (VERIFIER_MIN..=VERIFIER_MAX).contains(&pair.verifier.len()),
                "verifier of {length} source bytes landed at {} chars",
                pair.verifier.len()
            );
        }
    }

    #[test]
    fn verifier_is_base64url_safe() {
        let pair = PkcePair::generate(64);
        assert!(b64url_decode(&pair.verifier).is_some());
        assert!(!pair.challenge.contains('+'));
        assert!(!pair.challenge.contains('/'));
        assert!(!pair.challenge.contains('='));
    }

    #[test]
    fn pairs_are_unique() {
        let a = PkcePair::generate(64);
        let b = PkcePair::generate(64);
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }
}
