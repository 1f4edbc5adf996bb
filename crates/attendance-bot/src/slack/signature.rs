//! Slack request signature verification.
//!
//! Slack signs every event request with
//! `v0=hex(HMAC-SHA256(signing_secret, "v0:{timestamp}:{body}"))`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Oldest request age accepted, in seconds.
pub const MAX_REQUEST_AGE_SECS: u64 = 60 * 5;

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("malformed request timestamp")]
    BadTimestamp,
    #[error("request timestamp outside the accepted window")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
}

fn mac_for(secret: &str, timestamp: &str, body: &[u8]) -> Option<Hmac<Sha256>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    Some(mac)
}

/// Computes the `X-Slack-Signature` value for a request.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    match mac_for(secret, timestamp, body) {
        Some(mac) => format!("v0={}", hex::encode(mac.finalize().into_bytes())),
        None => String::new(),
    }
}

/// Checks a request's timestamp and signature headers against its body.
///
/// `now` is the current Unix time in seconds.
pub fn verify(
    secret: &str,
    timestamp: Option<&str>,
    signature: Option<&str>,
    body: &[u8],
    now: i64,
) -> Result<(), SignatureError> {
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return Err(SignatureError::MissingHeaders);
    };

    let sent_at: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::BadTimestamp)?;
    if now.abs_diff(sent_at) > MAX_REQUEST_AGE_SECS {
        return Err(SignatureError::Stale);
    }

    let expected = signature
        .strip_prefix("v0=")
        .and_then(|digest| hex::decode(digest).ok())
        .ok_or(SignatureError::Mismatch)?;

    let mac = mac_for(secret, timestamp, body).ok_or(SignatureError::Mismatch)?;
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}
