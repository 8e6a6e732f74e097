//! Webhook signature verification.
//!
//! Stripe signs `"{timestamp}.{raw body}"` with HMAC-SHA256 and sends the
//! result in the `Stripe-Signature` header as `t=<ts>,v1=<hex>[,v1=<hex>...]`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::gateway::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `message` and return it hex-encoded.
///
/// # Errors
///
/// Returns `GatewayError::Configuration` if the key is rejected.
pub fn hmac_sha256_hex(secret: &str, message: &[u8]) -> Result<String, GatewayError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Configuration(format!("invalid webhook secret: {e}")))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Build a `Stripe-Signature` header for `payload` signed at `timestamp`.
///
/// # Errors
///
/// Returns `GatewayError::Configuration` if the key is rejected.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> Result<String, GatewayError> {
    let signature = hmac_sha256_hex(secret, &signed_message(timestamp, payload))?;
    Ok(format!("t={timestamp},v1={signature}"))
}

/// Verify a `Stripe-Signature` header.
///
/// The signature is rejected when no `v1` entry matches, or when its
/// timestamp is more than `tolerance_seconds` away from `now`.
///
/// # Errors
///
/// Returns `GatewayError::InvalidSignature` on any mismatch.
pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    tolerance_seconds: i64,
    now: i64,
) -> Result<(), GatewayError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = ts.parse().ok(),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(GatewayError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(GatewayError::InvalidSignature);
    }

    if (now - timestamp).abs() > tolerance_seconds {
        tracing::debug!(timestamp, now, "Webhook timestamp outside tolerance");
        return Err(GatewayError::InvalidSignature);
    }

    let expected = hmac_sha256_hex(secret, &signed_message(timestamp, payload))?;
    if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
        Ok(())
    } else {
        Err(GatewayError::InvalidSignature)
    }
}

fn signed_message(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut message = format!("{timestamp}.").into_bytes();
    message.extend_from_slice(payload);
    message
}
