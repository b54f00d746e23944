//! JWT engine: decode, raw signature verification, claim validation.
//!
//! No provider SDK is involved. Tokens are split and decoded by hand; the
//! RSA-SHA256 signature is checked over the ASCII bytes `header.payload`
//! via [`jsonwebtoken::crypto::verify`] with a key imported from JWKS
//! `n`/`e` components; claims are validated field by field with a closed
//! set of error kinds so every failure mode is distinct.

use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use serde_json::Value;

use super::jwks::Jwk;
use super::primitives::{b64url_decode, now_epoch_secs};
use crate::error::{AuthError, Result};

/// Tolerance for `exp`/`nbf` comparisons, in seconds.
pub const CLOCK_SKEW_SECS: u64 = 30;

/// Parsed JWT header fields this subsystem cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtHeader {
    /// Signature algorithm, e.g. `RS256`.
    #[serde(default)]
    pub alg: Option<String>,
    /// Identifier of the JWKS entry that signed the token.
    #[serde(default)]
    pub kid: Option<String>,
}

/// A decoded (but not yet verified) JWT.
#[derive(Debug, Clone)]
pub struct DecodedJwt {
    /// Parsed header.
    pub header: JwtHeader,
    /// Parsed payload, kept as loose JSON so unmapped claims survive into
    /// the session's `raw` record.
    pub payload: Value,
    /// The raw base64url signature segment.
    pub signature: String,
    /// The raw `header.payload` string the signature covers.
    pub signing_input: String,
}

/// Expected values for claim validation.
#[derive(Debug, Clone, Copy)]
pub struct ClaimExpectations<'a> {
    /// Issuer from the discovery document.
    pub issuer: &'a str,
    /// Our client id; must appear in `aud`.
    pub client_id: &'a str,
    /// The nonce stored with the pending authorization, if one was sent.
    pub nonce: Option<&'a str>,
}

/// Split a compact JWT into header, payload and signature.
///
/// Exactly three segments are required; the header and payload must
/// base64url-decode and parse as JSON. Anything else is
/// [`AuthError::MalformedToken`].
pub fn decode_jwt(token: &str) -> Result<DecodedJwt> {
    let segments: Vec<&str> = token.split('.').collect();
    let [header_b64, payload_b64, signature] = segments[..] else {
        return Err(AuthError::MalformedToken);
    };

    let header_bytes = b64url_decode(header_b64).ok_or(AuthError::MalformedToken)?;
    let payload_bytes = b64url_decode(payload_b64).ok_or(AuthError::MalformedToken)?;

    let header: JwtHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| AuthError::MalformedToken)?;
    let payload: Value =
        serde_json::from_slice(&payload_bytes).map_err(|_| AuthError::MalformedToken)?;
    if !payload.is_object() {
        return Err(AuthError::MalformedToken);
    }

    Ok(DecodedJwt {
        header,
        payload,
        signature: signature.to_string(),
        signing_input: format!("{header_b64}.{payload_b64}"),
    })
}

/// Verify the RSA-SHA256 signature of a decoded token against a JWKS key.
///
/// Returns `Ok(false)` on a mismatched (or undecodable) signature; errors
/// only when the key material itself cannot be imported.
pub fn verify_signature(decoded: &DecodedJwt, jwk: &Jwk) -> Result<bool> {
    if decoded.signature.is_empty() {
        return Ok(false);
    }

    if jwk.kty != "RSA" {
        return Err(AuthError::MalformedKey);
    }
    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
        return Err(AuthError::MalformedKey);
    };

    let key = DecodingKey::from_rsa_components(n, e).map_err(|_| AuthError::MalformedKey)?;

    // A signature that fails to decode is just an invalid signature.
    Ok(jsonwebtoken::crypto::verify(
        &decoded.signature,
        decoded.signing_input.as_bytes(),
        &key,
        Algorithm::RS256,
    )
    .unwrap_or(false))
}

/// Validate the standard claims of an ID token payload.
///
/// Every failure is a distinct fatal error kind; callers never retry a
/// claim failure.
pub fn validate_claims(payload: &Value, expect: &ClaimExpectations<'_>) -> Result<()> {
    let now = now_epoch_secs();

    let iss = payload.get("iss").and_then(Value::as_str).unwrap_or_default();
    if iss != expect.issuer {
        return Err(AuthError::InvalidIssuer {
            expected: expect.issuer.to_string(),
            actual: iss.to_string(),
        });
    }

    if !audience_contains(payload.get("aud"), expect.client_id) {
        return Err(AuthError::AudienceMismatch {
            expected: expect.client_id.to_string(),
        });
    }

    let exp = payload.get("exp").and_then(Value::as_u64);
    match exp {
        Some(exp) if exp.saturating_add(CLOCK_SKEW_SECS) >= now => {}
        _ => return Err(AuthError::TokenExpired),
    }

    if let Some(nbf) = payload.get("nbf").and_then(Value::as_u64) {
        if nbf > now.saturating_add(CLOCK_SKEW_SECS) {
            return Err(AuthError::NotYetValid);
        }
    }

    if let Some(expected_nonce) = expect.nonce {
        let actual = payload.get("nonce").and_then(Value::as_str);
        if actual != Some(expected_nonce) {
            return Err(AuthError::NonceMismatch);
        }
    }

    Ok(())
}

/// `aud` may be a single string or a list of strings.
fn audience_contains(aud: Option<&Value>, client_id: &str) -> bool {
    match aud {
        Some(Value::String(s)) => s == client_id,
        Some(Value::Array(items)) => items
            .iter()
            .any(|v| v.as_str().is_some_and(|s| s == client_id)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::sso::primitives::b64url_encode;

    fn make_token(header: &Value, payload: &Value, signature: &str) -> String {
        format!(
            "{}.{}.{}",
            b64url_encode(serde_json::to_vec(header).unwrap()),
            b64url_encode(serde_json::to_vec(payload).unwrap()),
            signature
        )
    }

    fn valid_payload() -> Value {
        json!({
            "iss": "http://idp/realms/ploinky",
            "aud": "ploinky-router",
            "sub": "user-1",
            "exp": now_epoch_secs() + 300,
            "nonce": "abc",
        })
    }

    fn expectations<'a>(nonce: Option<&'a str>) -> ClaimExpectations<'a> {
        ClaimExpectations {
            issuer: "http://idp/realms/ploinky",
            client_id: "ploinky-router",
            nonce,
        }
    }

    // ── decode ───────────────────────────────────────────────────────────

    #[test]
    fn decode_requires_three_segments() {
        assert!(matches!(decode_jwt("a.b"), Err(AuthError::MalformedToken)));
        assert!(matches!(decode_jwt("a.b.c.d"), Err(AuthError::MalformedToken)));
        assert!(matches!(decode_jwt("not-a-jwt"), Err(AuthError::MalformedToken)));
    }

    #[test]
    fn decode_rejects_non_json_segments() {
        let token = format!("{}.{}.sig", b64url_encode("not json"), b64url_encode("{}"));
        assert!(matches!(decode_jwt(&token), Err(AuthError::MalformedToken)));
    }

    #[test]
    fn decode_extracts_header_payload_and_signing_input() {
        let header = json!({"alg": "RS256", "kid": "key-1"});
        let payload = valid_payload();
        let token = make_token(&header, &payload, "c2ln");

        let decoded = decode_jwt(&token).unwrap();
        assert_eq!(decoded.header.kid.as_deref(), Some("key-1"));
        assert_eq!(decoded.header.alg.as_deref(), Some("RS256"));
        assert_eq!(decoded.payload["sub"], "user-1");
        assert_eq!(decoded.signature, "c2ln");
        assert_eq!(
            decoded.signing_input,
            token.rsplit_once('.').unwrap().0
        );
    }

    // ── signature ────────────────────────────────────────────────────────

    // RFC 7515 appendix A.2 RS256 example: signing input, signature and
    // public key are fixed test vectors.
    const RFC7515_SIGNING_INPUT: &str = "eyJhbGciOiJSUzI1NiJ9.eyJpc3MiOiJqb2UiLA0KICJleHAiOjEzMDA4MTkzODAsDQogImh0dHA6Ly9leGFtcGxlLmNvbS9pc19yb290Ijp0cnVlfQ";
    const RFC7515_SIGNATURE: &str = "cC4hiUPoj9Eetdgtv3hF80EGrhuB__dzERat0XF9g2VtQgr9PJbu3XOiZj5RZmh7AAuHIm4Bh-0Qc_lF5YKt_O8W2Fp5jujGbds9uJdbF9CUAr7t1dnZcAcQjbKBYNX4BAynRFdiuB--f_nZLgrnbyTyWzO75vRK5h6xBArLIARNPvkSjtQBMHlb1L07Qe7K0GarZRmB_eSN9383LcOLn6_dO--xi12jzDwusC-eOkHWEsqtFZESc6BfI7noOPqvhJ1phCnvWh6IeYI2w9QOYEUipUTI8np6LbgGY9Fs98rqVt5AXLIhWkWywlVmtVrBp0igcN_IoypGlUPQGe77Rw";
    const RFC7515_N: &str = "ofgWCuLjybRlzo0tZWJjNiuSfb4p4fAkd_wWJcyQoTbji9k0l8W26mPddxHmfHQp-Vaw-4qPCJrcS2mJPMEzP1Pt0Bm4d4QlL-yRT-SFd2lZS-pCgNMsD1W_YpRPEwOWvG6b32690r2jZ47soMZo9wGzjb_7OMg0LOL-bSf63kpaSHSXndS5z5rexMdbBYUsLA9e-KXBdQOS-UTo7WTBEMa2R2CapHg665xsmtdVMTBQY4uDZlxvb3qCo5ZwKh9kG4LT6_I5IhlJH7aGhyxXFvUK-DWNmoudF8NAco9_h9iaGNj8q2ethFkMLs91kzk2PAcDTW9gb54h4FRWyuXpoQ";

    fn rfc7515_jwk() -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: Some("rfc7515-a2".to_string()),
            alg: Some("RS256".to_string()),
            key_use: None,
            n: Some(RFC7515_N.to_string()),
            e: Some("AQAB".to_string()),
        }
    }

    fn rfc7515_decoded(signature: &str) -> DecodedJwt {
        let (header_b64, payload_b64) = RFC7515_SIGNING_INPUT.split_once('.').unwrap();
        DecodedJwt {
            header: serde_json::from_slice(&b64url_decode(header_b64).unwrap()).unwrap(),
            payload: serde_json::from_slice(&b64url_decode(payload_b64).unwrap()).unwrap(),
            signature: signature.to_string(),
            signing_input: RFC7515_SIGNING_INPUT.to_string(),
        }
    }

    #[test]
    fn rfc7515_vector_verifies() {
        let decoded = rfc7515_decoded(RFC7515_SIGNATURE);
        assert!(verify_signature(&decoded, &rfc7515_jwk()).unwrap());
    }

    #[test]
    fn flipped_signature_byte_fails_verification() {
        let mut bytes = b64url_decode(RFC7515_SIGNATURE).unwrap();
        bytes[0] ^= 0x01;
        let decoded = rfc7515_decoded(&b64url_encode(&bytes));
        assert!(!verify_signature(&decoded, &rfc7515_jwk()).unwrap());
    }

    #[test]
    fn empty_signature_does_not_verify() {
        let decoded = rfc7515_decoded("");
        assert!(!verify_signature(&decoded, &rfc7515_jwk()).unwrap());
    }

    #[test]
    fn garbage_signature_does_not_verify() {
        let decoded = rfc7515_decoded("!!!not-base64!!!");
        assert!(!verify_signature(&decoded, &rfc7515_jwk()).unwrap());
    }

    #[test]
    fn unrecognized_key_type_is_malformed_key() {
        let decoded = rfc7515_decoded(RFC7515_SIGNATURE);
        let jwk = Jwk {
            kty: "EC".to_string(),
            ..rfc7515_jwk()
        };
        assert!(matches!(
            verify_signature(&decoded, &jwk),
            Err(AuthError::MalformedKey)
        ));
    }

    #[test]
    fn rsa_key_without_modulus_is_malformed() {
        let decoded = rfc7515_decoded(RFC7515_SIGNATURE);
        let jwk = Jwk {
            n: None,
            ..rfc7515_jwk()
        };
        assert!(matches!(
            verify_signature(&decoded, &jwk),
            Err(AuthError::MalformedKey)
        ));
    }

    // ── claims ───────────────────────────────────────────────────────────

    #[test]
    fn valid_claims_pass() {
        assert!(validate_claims(&valid_payload(), &expectations(Some("abc"))).is_ok());
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let mut payload = valid_payload();
        payload["iss"] = json!("http://evil");
        assert!(matches!(
            validate_claims(&payload, &expectations(None)),
            Err(AuthError::InvalidIssuer { .. })
        ));
    }

    #[test]
    fn audience_mismatch_is_rejected() {
        let mut payload = valid_payload();
        payload["aud"] = json!("someone-else");
        assert!(matches!(
            validate_claims(&payload, &expectations(None)),
            Err(AuthError::AudienceMismatch { .. })
        ));
    }

    #[test]
    fn audience_list_containing_client_passes() {
        let mut payload = valid_payload();
        payload["aud"] = json!(["account", "ploinky-router"]);
        assert!(validate_claims(&payload, &expectations(None)).is_ok());
    }

    #[test]
    fn expired_token_is_rejected() {
        let mut payload = valid_payload();
        payload["exp"] = json!(now_epoch_secs() - 3600);
        assert!(matches!(
            validate_claims(&payload, &expectations(None)),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn expiry_within_skew_window_passes() {
        let mut payload = valid_payload();
        payload["exp"] = json!(now_epoch_secs() - 10);
        assert!(validate_claims(&payload, &expectations(None)).is_ok());
    }

    #[test]
    fn exp_at_u64_max_does_not_overflow() {
        let mut payload = valid_payload();
        payload["exp"] = json!(u64::MAX);
        assert!(validate_claims(&payload, &expectations(None)).is_ok());
    }

    #[test]
    fn missing_exp_is_rejected() {
        let mut payload = valid_payload();
        payload.as_object_mut().unwrap().remove("exp");
        assert!(matches!(
            validate_claims(&payload, &expectations(None)),
            Err(AuthError::TokenExpired)
        ));
    }

    #[test]
    fn future_nbf_is_rejected() {
        let mut payload = valid_payload();
        payload["nbf"] = json!(now_epoch_secs() + 3600);
        assert!(matches!(
            validate_claims(&payload, &expectations(None)),
            Err(AuthError::NotYetValid)
        ));
    }

    #[test]
    fn nbf_within_skew_window_passes() {
        let mut payload = valid_payload();
        payload["nbf"] = json!(now_epoch_secs() + 10);
        assert!(validate_claims(&payload, &expectations(None)).is_ok());
    }

    #[test]
    fn nonce_mismatch_is_rejected() {
        assert!(matches!(
            validate_claims(&valid_payload(), &expectations(Some("other"))),
            Err(AuthError::NonceMismatch)
        ));
    }

    #[test]
    fn nonce_is_ignored_when_not_expected() {
        assert!(validate_claims(&valid_payload(), &expectations(None)).is_ok());
    }
}
