/// Signed token codec (HS256)
///
/// Wire format:
/// `base64url(header_json).base64url(payload_json).base64url(hmac_sha256(header.payload))`
/// with the header fixed to `{"alg":"HS256","typ":"JWT"}`.
///
/// Decoding checks run in a fixed order and the first failure wins, so an
/// expired token with a valid signature always reports `Expired`.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use jsonwebtoken::{crypto, Algorithm, DecodingKey, EncodingKey};
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::fmt;

use crate::auth::claims::{Claims, ISSUER};
use crate::error::AppError;

const ALG: &str = "HS256";
const TYP: &str = "JWT";

/// Unpadded base64url on output, tolerant of padding and trailing bits on input
const B64URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

pub fn b64url_encode(bytes: &[u8]) -> String {
    B64URL.encode(bytes)
}

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenRejection {
    Malformed,
    DecodeError,
    BadJson,
    UnsupportedAlg,
    SignatureMismatch,
    MissingExp,
    Expired,
    BadIssuer,
}

impl TokenRejection {
    pub fn code(&self) -> &'static str {
        match self {
            TokenRejection::Malformed => "MALFORMED",
            TokenRejection::DecodeError => "DECODE_ERROR",
            TokenRejection::BadJson => "BAD_JSON",
            TokenRejection::UnsupportedAlg => "UNSUPPORTED_ALG",
            TokenRejection::SignatureMismatch => "SIGNATURE_MISMATCH",
            TokenRejection::MissingExp => "MISSING_EXP",
            TokenRejection::Expired => "EXPIRED",
            TokenRejection::BadIssuer => "BAD_ISSUER",
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TokenRejection::Expired)
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl StdError for TokenRejection {}

fn header_json() -> Value {
    serde_json::json!({ "alg": ALG, "typ": TYP })
}

/// Serialize and sign `claims` with `secret`.
///
/// Deterministic for identical input.
pub fn encode(claims: &Claims, secret: &[u8]) -> Result<String, AppError> {
    let header = serde_json::to_vec(&header_json())
        .map_err(|e| AppError::Internal(format!("Token header serialization failed: {}", e)))?;
    let payload = serde_json::to_vec(claims)
        .map_err(|e| AppError::Internal(format!("Token payload serialization failed: {}", e)))?;

    let signing_input = format!("{}.{}", b64url_encode(&header), b64url_encode(&payload));
    let signature = crypto::sign(
        signing_input.as_bytes(),
        &EncodingKey::from_secret(secret),
        Algorithm::HS256,
    )
    .map_err(|e| AppError::Internal(format!("Token signing failed: {}", e)))?;

    Ok(format!("{}.{}", signing_input, signature))
}

fn parse_object(bytes: &[u8]) -> Result<Map<String, Value>, TokenRejection> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(TokenRejection::BadJson),
    }
}

fn numeric_exp(payload: &Map<String, Value>) -> Option<i64> {
    match payload.get("exp") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

/// Verify `token` against `secret` at Unix time `now` and return its claims.
///
/// No claims are exposed unless every check passes.
pub fn decode_and_verify(token: &str, secret: &[u8], now: i64) -> Result<Claims, TokenRejection> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(TokenRejection::Malformed);
    }
    let (header_b64, payload_b64, signature_b64) = (parts[0], parts[1], parts[2]);

    let header_bytes = B64URL
        .decode(header_b64)
        .map_err(|_| TokenRejection::DecodeError)?;
    let payload_bytes = B64URL
        .decode(payload_b64)
        .map_err(|_| TokenRejection::DecodeError)?;
    B64URL
        .decode(signature_b64)
        .map_err(|_| TokenRejection::DecodeError)?;

    let header = parse_object(&header_bytes)?;
    let mut payload = parse_object(&payload_bytes)?;

    if header.get("alg").and_then(Value::as_str) != Some(ALG) {
        return Err(TokenRejection::UnsupportedAlg);
    }

    let signing_input = format!("{}.{}", header_b64, payload_b64);
    // constant-time comparison of the encoded signatures
    let signature_ok = crypto::verify(
        signature_b64,
        signing_input.as_bytes(),
        &DecodingKey::from_secret(secret),
        Algorithm::HS256,
    )
    .unwrap_or(false);
    if !signature_ok {
        return Err(TokenRejection::SignatureMismatch);
    }

    let exp = numeric_exp(&payload).ok_or(TokenRejection::MissingExp)?;
    if exp <= now {
        return Err(TokenRejection::Expired);
    }

    // null counts as absent
    if payload.get("iss").map_or(false, Value::is_null) {
        payload.remove("iss");
    }
    if let Some(iss) = payload.get("iss") {
        if iss.as_str() != Some(ISSUER) {
            return Err(TokenRejection::BadIssuer);
        }
    }

    payload.insert("exp".to_string(), Value::from(exp));
    serde_json::from_value(Value::Object(payload)).map_err(|_| TokenRejection::BadJson)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Role;

    const SECRET: &[u8] = b"test-secret-key-at-least-32-characters-long";
    const NOW: i64 = 1_700_000_000;

    fn claims() -> Claims {
        Claims::new("u1", Role::User, NOW, 3600)
    }

    /// Sign arbitrary header/payload JSON the same way `encode` does
    fn sign_raw(header: &str, payload: &str, secret: &[u8]) -> String {
        let input = format!(
            "{}.{}",
            b64url_encode(header.as_bytes()),
            b64url_encode(payload.as_bytes())
        );
        let sig = crypto::sign(
            input.as_bytes(),
            &EncodingKey::from_secret(secret),
            Algorithm::HS256,
        )
        .unwrap();
        format!("{}.{}", input, sig)
    }

    #[test]
    fn test_round_trip() {
        let claims = claims();
        let token = encode(&claims, SECRET).expect("Failed to encode token");

        let decoded = decode_and_verify(&token, SECRET, NOW).expect("Failed to verify token");
        assert_eq!(decoded, claims);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = encode(&claims(), SECRET).unwrap();
        let b = encode(&claims(), SECRET).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_is_fixed() {
        let token = encode(&claims(), SECRET).unwrap();
        let header_b64 = token.split('.').next().unwrap();
        let header: Value = serde_json::from_slice(&B64URL.decode(header_b64).unwrap()).unwrap();

        assert_eq!(header, serde_json::json!({"alg": "HS256", "typ": "JWT"}));
    }

    #[test]
    fn test_wrong_segment_count_is_malformed() {
        assert_eq!(decode_and_verify("", SECRET, NOW), Err(TokenRejection::Malformed));
        assert_eq!(decode_and_verify("a.b", SECRET, NOW), Err(TokenRejection::Malformed));
        assert_eq!(decode_and_verify("a.b.c.d", SECRET, NOW), Err(TokenRejection::Malformed));
    }

    #[test]
    fn test_invalid_base64_is_decode_error() {
        let token = encode(&claims(), SECRET).unwrap();
        let mut parts: Vec<String> = token.split('.').map(String::from).collect();
        parts[1] = "not*base64!".to_string();

        assert_eq!(
            decode_and_verify(&parts.join("."), SECRET, NOW),
            Err(TokenRejection::DecodeError)
        );
    }

    #[test]
    fn test_non_object_json_is_bad_json() {
        let token = sign_raw(r#"{"alg":"HS256","typ":"JWT"}"#, "[1,2,3]", SECRET);
        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::BadJson));

        let token = sign_raw("not json", r#"{"exp":1}"#, SECRET);
        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::BadJson));
    }

    #[test]
    fn test_other_algorithms_are_unsupported() {
        let payload = format!(r#"{{"sub":"u1","exp":{}}}"#, NOW + 60);

        let token = sign_raw(r#"{"alg":"none","typ":"JWT"}"#, &payload, SECRET);
        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::UnsupportedAlg));

        let token = sign_raw(r#"{"typ":"JWT"}"#, &payload, SECRET);
        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::UnsupportedAlg));
    }

    #[test]
    fn test_any_signature_change_is_mismatch() {
        let token = encode(&claims(), SECRET).unwrap();
        let (signing_input, signature) = token.rsplit_once('.').unwrap();

        for i in 0..signature.len() {
            let mut bytes = signature.as_bytes().to_vec();
            bytes[i] = if bytes[i] == b'A' { b'B' } else { b'A' };
            let tampered = format!("{}.{}", signing_input, String::from_utf8(bytes).unwrap());

            assert_eq!(
                decode_and_verify(&tampered, SECRET, NOW),
                Err(TokenRejection::SignatureMismatch),
                "position {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_wrong_secret_is_mismatch() {
        let token = encode(&claims(), SECRET).unwrap();
        assert_eq!(
            decode_and_verify(&token, b"another-secret", NOW),
            Err(TokenRejection::SignatureMismatch)
        );
    }

    #[test]
    fn test_missing_or_non_numeric_exp() {
        let token = sign_raw(r#"{"alg":"HS256","typ":"JWT"}"#, r#"{"sub":"u1"}"#, SECRET);
        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::MissingExp));

        let token = sign_raw(
            r#"{"alg":"HS256","typ":"JWT"}"#,
            r#"{"sub":"u1","exp":"tomorrow"}"#,
            SECRET,
        );
        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::MissingExp));
    }

    #[test]
    fn test_expired_wins_over_other_checks_when_signature_is_valid() {
        let claims = Claims::new("u1", Role::User, NOW - 7200, 3600);
        let token = encode(&claims, SECRET).unwrap();

        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::Expired));
    }

    #[test]
    fn test_exp_equal_to_now_is_expired() {
        let claims = Claims::new("u1", Role::User, NOW - 3600, 3600);
        let token = encode(&claims, SECRET).unwrap();

        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::Expired));
        assert!(decode_and_verify(&token, SECRET, NOW - 1).is_ok());
    }

    #[test]
    fn test_foreign_issuer_is_rejected() {
        let payload = format!(r#"{{"iss":"someone-else","sub":"u1","exp":{}}}"#, NOW + 60);
        let token = sign_raw(r#"{"alg":"HS256","typ":"JWT"}"#, &payload, SECRET);

        assert_eq!(decode_and_verify(&token, SECRET, NOW), Err(TokenRejection::BadIssuer));
    }

    #[test]
    fn test_absent_issuer_is_accepted() {
        let payload = format!(r#"{{"sub":"u1","exp":{}}}"#, NOW + 60);
        let token = sign_raw(r#"{"alg":"HS256","typ":"JWT"}"#, &payload, SECRET);

        let claims = decode_and_verify(&token, SECRET, NOW).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.iss, ISSUER);
    }

    #[test]
    fn test_null_issuer_is_treated_as_absent() {
        let payload = format!(r#"{{"iss":null,"sub":"u1","exp":{}}}"#, NOW + 60);
        let token = sign_raw(r#"{"alg":"HS256","typ":"JWT"}"#, &payload, SECRET);

        let claims = decode_and_verify(&token, SECRET, NOW).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.iss, ISSUER);
    }

    #[test]
    fn test_padded_segments_are_accepted() {
        let payload = format!(r#"{{"sub":"u1","exp":{}}}"#, NOW + 60);
        let header = r#"{"alg":"HS256","typ":"JWT"}"#;
        let padded = base64::engine::general_purpose::URL_SAFE.encode(payload.as_bytes());
        let input = format!("{}.{}", b64url_encode(header.as_bytes()), padded);
        let sig = crypto::sign(input.as_bytes(), &EncodingKey::from_secret(SECRET), Algorithm::HS256)
            .unwrap();

        assert!(decode_and_verify(&format!("{}.{}", input, sig), SECRET, NOW).is_ok());
    }
}
