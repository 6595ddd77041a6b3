//! API key material.
//!
//! Plaintext format: the literal `moon_live_` prefix plus 64 characters
//! of base62 extended with `-` and `_`, 74 characters total. Only the
//! SHA-256 hex digest is persisted; lookups go by digest with a
//! constant-time confirmation compare.

use moon_common::{MoonError, Result};
use rand::Rng;
use sha2::{Digest, Sha256};

pub const KEY_PREFIX: &str = "moon_live_";
pub const KEY_RANDOM_LEN: usize = 64;
pub const KEY_TOTAL_LEN: usize = 74;

const KEY_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generates a fresh key: `(plaintext, sha256_hex)`. The plaintext is
/// shown to the operator exactly once.
pub fn generate_key() -> (String, String) {
    let mut rng = rand::rng();
    let mut key = String::with_capacity(KEY_TOTAL_LEN);
    key.push_str(KEY_PREFIX);
    for _ in 0..KEY_RANDOM_LEN {
        let idx = rng.random_range(0..KEY_CHARSET.len());
        key.push(KEY_CHARSET[idx] as char);
    }
    let digest = hash_key(&key);
    (key, digest)
}

/// SHA-256 hex digest of a key (or refresh token) string.
pub fn hash_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(64);
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Checks the plaintext shape before hashing.
pub fn validate_key_format(key: &str) -> Result<()> {
    if key.len() != KEY_TOTAL_LEN
        || !key.starts_with(KEY_PREFIX)
        || !key[KEY_PREFIX.len()..]
            .bytes()
            .all(|b| KEY_CHARSET.contains(&b))
    {
        return Err(MoonError::InvalidTokenFormat);
    }
    Ok(())
}

/// Constant-time equality over hex digests.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_shape() {
        let (key, digest) = generate_key();
        assert_eq!(key.len(), KEY_TOTAL_LEN);
        assert!(key.starts_with(KEY_PREFIX));
        assert!(validate_key_format(&key).is_ok());
        assert_eq!(digest.len(), 64);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(digest, hash_key(&key));
    }

    #[test]
    fn test_keys_are_unique() {
        let (a, _) = generate_key();
        let (b, _) = generate_key();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_is_stable() {
        // Fixed vector: sha256("moon") in hex.
        assert_eq!(
            hash_key("moon"),
            "9e78b43ea00edcac8299e0cc8df7f6f913078171335f733a21d5d911b6999132"
        );
    }

    #[test]
    fn test_format_validation() {
        assert!(validate_key_format(&format!("{}{}", KEY_PREFIX, "a".repeat(64))).is_ok());
        assert!(validate_key_format("moon_live_short").is_err());
        assert!(validate_key_format(&format!("wrong_pref{}", "a".repeat(64))).is_err());
        assert!(validate_key_format(&format!("{}{}!", KEY_PREFIX, "a".repeat(63))).is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abcd", "abcd"));
        assert!(!constant_time_eq("abcd", "abce"));
        assert!(!constant_time_eq("abcd", "abc"));
    }
}
