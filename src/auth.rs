// ABOUTME: HMAC-signed session tokens used on every hop between sandbox and control plane

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Tokens older than this are rejected (5 minutes).
pub const DEFAULT_TOKEN_MAX_AGE_MS: i64 = 5 * 60 * 1000;

/// Mint a fresh token for the current instant: `"<timestampMs>.<hexHmac>"`.
pub fn mint_token(secret: &str) -> String {
    mint_token_at(secret, Utc::now().timestamp_millis())
}

/// Mint a token for an explicit timestamp. Exposed so callers that batch
/// outbound requests can reuse a signing instant; also the seam the expiry
/// tests use.
pub fn mint_token_at(secret: &str, timestamp_ms: i64) -> String {
    let timestamp = timestamp_ms.to_string();
    format!("{}.{}", timestamp, sign(secret, &timestamp))
}

/// Verify a token against the shared secret. Fails closed: malformed input,
/// an unparseable timestamp, or a timestamp outside the window (either
/// expired or future-dated beyond clock-skew tolerance) all return `false`,
/// never an error. Signature comparison is constant-time.
pub fn verify_token(token: &str, secret: &str, max_age_ms: i64) -> bool {
    let Some((timestamp_str, signature_hex)) = token.split_once('.') else {
        return false;
    };
    let Ok(timestamp) = timestamp_str.parse::<i64>() else {
        return false;
    };

    let now = Utc::now().timestamp_millis();
    let Some(age) = now.checked_sub(timestamp) else {
        return false;
    };
    if age > max_age_ms || age < -max_age_ms {
        return false;
    }

    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = new_mac(secret);
    mac.update(timestamp_str.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

fn sign(secret: &str, timestamp: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(timestamp.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn new_mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key of any length is valid")
}
