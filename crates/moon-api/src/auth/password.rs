//! Password hashing.
//!
//! bcrypt at cost 12, per the auth data model. Verification failures and
//! malformed hashes both read as "wrong password".

use moon_common::{MoonError, Result};

const BCRYPT_COST: u32 = 12;

/// Hashes a plaintext password.
pub fn hash_password(password: &str) -> Result<String> {
    if password.is_empty() {
        return Err(MoonError::Validation("password must not be empty".into()));
    }
    bcrypt::hash(password, BCRYPT_COST)
        .map_err(|e| MoonError::Internal(format!("password hashing failed: {}", e)))
}

/// Verifies a plaintext password against a stored hash.
pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse battery staple").unwrap();
        assert!(hash.starts_with("$2"));
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn test_empty_password_rejected() {
        assert!(hash_password("").is_err());
    }

    #[test]
    fn test_malformed_hash_reads_as_mismatch() {
        assert!(!verify_password("anything", "not-a-bcrypt-hash"));
    }
}
