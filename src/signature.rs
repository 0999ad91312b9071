//! HMAC-SHA256 webhook signature verification.
//!
//! Kapso signs the raw request body, or `"{timestamp}.{body}"` when it sends
//! an `X-Webhook-Timestamp` header. Signatures are lowercase hex digests and
//! are compared in constant time.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing X-Webhook-Signature")]
    MissingSignature,
    #[error("Invalid timestamp header")]
    InvalidTimestamp,
    #[error("Kapso signature timestamp expired")]
    ExpiredSignature,
    #[error("Invalid X-Webhook-Signature")]
    InvalidSignature,
}

/// Hex HMAC-SHA256 over the signed message. Senders and tests use this to
/// produce signatures the verifier accepts.
pub fn compute_signature(
    secret: &str,
    raw_body: &[u8],
    timestamp: Option<&str>,
) -> Result<String, SignatureError> {
    let mut mac = mac_for(secret)?;
    update_signed_message(&mut mac, raw_body, timestamp);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a delivery. No configured secret means verification is disabled.
/// With a secret, the signature header is required, the timestamp (when
/// present) must parse and sit within `max_skew_secs` of now, and the digest
/// must match.
pub fn verify_signature(
    secret: Option<&str>,
    provided: Option<&str>,
    raw_body: &[u8],
    timestamp: Option<&str>,
    max_skew_secs: i64,
) -> Result<(), SignatureError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let Some(provided) = provided else {
        return Err(SignatureError::MissingSignature);
    };

    if let Some(timestamp) = timestamp {
        let ts = parse_timestamp(timestamp)?;
        let skew = (Utc::now() - ts).num_seconds().abs();
        if skew > max_skew_secs {
            return Err(SignatureError::ExpiredSignature);
        }
    }

    let expected = hex::decode(provided).map_err(|_| SignatureError::InvalidSignature)?;
    let mut mac = mac_for(secret)?;
    update_signed_message(&mut mac, raw_body, timestamp);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::InvalidSignature)
}

fn mac_for(secret: &str) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSignature)
}

fn update_signed_message(mac: &mut HmacSha256, raw_body: &[u8], timestamp: Option<&str>) {
    if let Some(timestamp) = timestamp {
        mac.update(timestamp.as_bytes());
        mac.update(b".");
    }
    mac.update(raw_body);
}

/// Accepts decimal unix seconds or an RFC 3339 timestamp (trailing `Z` ok).
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SignatureError> {
    if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
        let secs: i64 = value.parse().map_err(|_| SignatureError::InvalidTimestamp)?;
        return DateTime::from_timestamp(secs, 0).ok_or(SignatureError::InvalidTimestamp);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SignatureError::InvalidTimestamp)
}

/// Constant-time equality for static tokens.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
