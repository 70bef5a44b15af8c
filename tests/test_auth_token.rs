// ABOUTME: Tests for HMAC session token minting and fail-closed verification

use chrono::Utc;
use cloudbox::auth::{mint_token, mint_token_at, verify_token, DEFAULT_TOKEN_MAX_AGE_MS};

const SECRET: &str = "test-shared-secret";

#[test]
fn fresh_token_verifies() {
    let token = mint_token(SECRET);
    assert!(verify_token(&token, SECRET, DEFAULT_TOKEN_MAX_AGE_MS));
}

#[test]
fn token_shape_is_timestamp_dot_hex() {
    let token = mint_token_at(SECRET, 1_700_000_000_000);
    let (timestamp, signature) = token.split_once('.').expect("token has two parts");
    assert_eq!(timestamp, "1700000000000");
    assert_eq!(signature.len(), 64);
    assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn token_expires_after_max_age() {
    let minted_at = Utc::now().timestamp_millis() - DEFAULT_TOKEN_MAX_AGE_MS - 1_000;
    let token = mint_token_at(SECRET, minted_at);
    assert!(!verify_token(&token, SECRET, DEFAULT_TOKEN_MAX_AGE_MS));

    // The same token is fine under a wider window.
    assert!(verify_token(&token, SECRET, DEFAULT_TOKEN_MAX_AGE_MS * 10));
}

#[test]
fn far_future_token_is_rejected() {
    let minted_at = Utc::now().timestamp_millis() + DEFAULT_TOKEN_MAX_AGE_MS + 1_000;
    let token = mint_token_at(SECRET, minted_at);
    assert!(!verify_token(&token, SECRET, DEFAULT_TOKEN_MAX_AGE_MS));
}

#[test]
fn slight_clock_skew_ahead_is_tolerated() {
    let minted_at = Utc::now().timestamp_millis() + 1_000;
    let token = mint_token_at(SECRET, minted_at);
    assert!(verify_token(&token, SECRET, DEFAULT_TOKEN_MAX_AGE_MS));
}

#[test]
fn extreme_timestamps_fail_closed() {
    for timestamp in [i64::MIN, i64::MAX] {
        let token = mint_token_at(SECRET, timestamp);
        assert!(!verify_token(&token, SECRET, DEFAULT_TOKEN_MAX_AGE_MS));
    }
}

#[test]
fn tampered_signature_is_rejected() {
    let token = mint_token(SECRET);
    let (timestamp, signature) = token.split_once('.').unwrap();

    // Flip the last hex digit to a different one.
    let last = signature.chars().last().unwrap();
    let flipped = if last == '0' { '1' } else { '0' };
    let mut tampered_sig = signature[..signature.len() - 1].to_string();
    tampered_sig.push(flipped);

    let tampered = format!("{timestamp}.{tampered_sig}");
    assert!(!verify_token(&tampered, SECRET, DEFAULT_TOKEN_MAX_AGE_MS));
}

#[test]
fn wrong_secret_is_rejected() {
    let token = mint_token(SECRET);
    assert!(!verify_token(&token, "other-secret", DEFAULT_TOKEN_MAX_AGE_MS));
}

#[test]
fn malformed_tokens_fail_closed() {
    for token in [
        "",
        "no-dot-at-all",
        "not-a-number.abcdef",
        "1700000000000.",
        "1700000000000.zznothex",
        ".abcdef",
        "1700000000000.abc.def",
    ] {
        assert!(
            !verify_token(token, SECRET, DEFAULT_TOKEN_MAX_AGE_MS),
            "token {token:?} should be rejected"
        );
    }
}
