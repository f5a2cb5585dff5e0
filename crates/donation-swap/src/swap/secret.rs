//! Capability tokens that stand in for a login system.
//!
//! An offer secret proves the holder received the confirmation email for
//! that offer; a match secret names one specific match. The token a donor
//! gets when a match is proposed is the concatenation of their own offer
//! secret and the match secret, so presenting it both authenticates the
//! caller and tells us which side of the match they are.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Length of a single secret: 18 raw bytes encode to 24 base64url chars.
pub const SECRET_LEN: usize = 24;
/// Length of an offer secret concatenated with a match secret.
pub const COMBINED_LEN: usize = 48;

/// Generate a fresh 24-character URL-safe secret: an 8-byte big-endian
/// millisecond timestamp followed by 10 cryptographically random bytes.
pub fn generate() -> String {
    let mut raw = [0u8; 18];
    let millis = chrono::Utc::now().timestamp_millis() as u64;
    raw[..8].copy_from_slice(&millis.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut raw[8..]);
    URL_SAFE_NO_PAD.encode(raw)
}

/// Split a combined token into `(offer_secret, match_secret)`.
///
/// Anything that is not exactly 48 ASCII characters is rejected here,
/// before any repository lookup happens.
pub fn split_combined(token: &str) -> Option<(&str, &str)> {
    if token.len() != COMBINED_LEN || !token.is_ascii() {
        return None;
    }
    Some(token.split_at(SECRET_LEN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_is_24_url_safe_chars() {
        let secret = generate();
        assert_eq!(secret.len(), SECRET_LEN);
        assert!(secret
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn generated_secrets_do_not_repeat() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }

    #[test]
    fn split_accepts_exactly_48_chars() {
        let offer = generate();
        let match_ = generate();
        let combined = format!("{offer}{match_}");
        let (head, tail) = split_combined(&combined).expect("48-char token splits");
        assert_eq!(head, offer);
        assert_eq!(tail, match_);
    }

    #[test]
    fn split_rejects_other_lengths() {
        assert!(split_combined("").is_none());
        assert!(split_combined(&"x".repeat(24)).is_none());
        assert!(split_combined(&"x".repeat(47)).is_none());
        assert!(split_combined(&"x".repeat(49)).is_none());
    }

    #[test]
    fn split_rejects_non_ascii_tokens() {
        // 24 two-byte chars: 48 bytes, but not a valid token.
        let wide = "é".repeat(24);
        assert_eq!(wide.len(), 48);
        assert!(split_combined(&wide).is_none());
    }
}
