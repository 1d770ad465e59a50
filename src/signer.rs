//! HMAC-SHA256 request signing for outbound webhook deliveries (§4.B).
//!
//! Generalizes the teacher's inbound Twitch signature *verification*
//! routine (`services/webhooks.rs::verify_signature`) into a symmetric
//! sign/verify pair for an outbound dispatcher with rotatable per-endpoint
//! secrets.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignerError {
    #[error("invalid secret")]
    InvalidSecret,
    #[error("malformed signature header")]
    MalformedSignature,
    #[error("signature mismatch")]
    Mismatch,
    #[error("timestamp outside tolerance")]
    TimestampOutOfRange,
}

/// Produces `t=<unix_seconds>,v1=<hex_hmac>` where the hmac covers
/// `"<t>.<payload>"`, matching the widely used "signed timestamp" scheme
/// the teacher's verification code expects on the inbound side.
pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> Result<String, SignerError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignerError::InvalidSecret)?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={digest}"))
}

/// Verifies a `sign()`-produced header against `payload`, rejecting it if
/// the embedded timestamp is further than `tolerance_seconds` from `now`.
pub fn verify(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    now: i64,
    tolerance_seconds: i64,
) -> Result<(), SignerError> {
    let (t, v1) = parse_header(signature_header)?;

    if (now - t).abs() > tolerance_seconds {
        return Err(SignerError::TimestampOutOfRange);
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignerError::InvalidSecret)?;
    mac.update(format!("{t}.").as_bytes());
    mac.update(payload);
    let expected = hex::decode(v1).map_err(|_| SignerError::MalformedSignature)?;

    mac.verify_slice(&expected)
        .map_err(|_| SignerError::Mismatch)
}

fn parse_header(header: &str) -> Result<(i64, &str), SignerError> {
    let mut t: Option<i64> = None;
    let mut v1: Option<&str> = None;
    for part in header.split(',') {
        let (key, value) = part.split_once('=').ok_or(SignerError::MalformedSignature)?;
        match key {
            "t" => t = value.parse().ok(),
            "v1" => v1 = Some(value),
            _ => {}
        }
    }
    match (t, v1) {
        (Some(t), Some(v1)) => Ok((t, v1)),
        _ => Err(SignerError::MalformedSignature),
    }
}

/// Generates a fresh random secret for a newly created webhook endpoint or
/// a secret-rotation request. Hex-encoded 32 bytes, matching the entropy of
/// a `Uuid` pair without the hyphen formatting.
pub fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trip() {
        let secret = "whsec_test";
        let payload = br#"{"event":"task.completed"}"#;
        let header = sign(secret, payload, 1_700_000_000).unwrap();
        assert!(verify(secret, payload, &header, 1_700_000_005, 300).is_ok());
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let header = sign("secret-a", b"payload", 1_700_000_000).unwrap();
        let result = verify("secret-b", b"payload", &header, 1_700_000_000, 300);
        assert_eq!(result.unwrap_err(), SignerError::Mismatch);
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let header = sign("secret", b"original", 1_700_000_000).unwrap();
        let result = verify("secret", b"tampered", &header, 1_700_000_000, 300);
        assert_eq!(result.unwrap_err(), SignerError::Mismatch);
    }

    #[test]
    fn verify_rejects_stale_timestamp() {
        let header = sign("secret", b"payload", 1_700_000_000).unwrap();
        let result = verify("secret", b"payload", &header, 1_700_001_000, 300);
        assert_eq!(result.unwrap_err(), SignerError::TimestampOutOfRange);
    }

    #[test]
    fn verify_rejects_malformed_header() {
        let result = verify("secret", b"payload", "not-a-signature", 0, 300);
        assert_eq!(result.unwrap_err(), SignerError::MalformedSignature);
    }

    #[test]
    fn generated_secrets_are_unique() {
        assert_ne!(generate_secret(), generate_secret());
    }
}
