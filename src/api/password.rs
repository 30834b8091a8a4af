//! Argon2id password hashing.
//!
//! Digests use the PHC string format so the parameters and salt travel with
//! the digest itself.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Hash a plaintext password into a PHC-format digest.
///
/// # Errors
///
/// Returns an error if the hasher rejects the input.
pub fn hash(plain: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|digest| digest.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Verify a plaintext password against a stored digest.
///
/// Malformed digests verify as false.
#[must_use]
pub fn verify(plain: &str, digest: &str) -> bool {
    PasswordHash::new(digest).map_or(false, |parsed| {
        Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn hash_then_verify_round_trip() -> Result<()> {
        let digest = hash("correct horse battery staple")?;
        assert!(verify("correct horse battery staple", &digest));
        Ok(())
    }

    #[test]
    fn verify_rejects_wrong_password() -> Result<()> {
        let digest = hash("correct horse battery staple")?;
        assert!(!verify("incorrect horse", &digest));
        Ok(())
    }

    #[test]
    fn verify_rejects_malformed_digest() {
        assert!(!verify("anything", "not-a-phc-string"));
        assert!(!verify("anything", ""));
    }

    #[test]
    fn hash_salts_are_unique() -> Result<()> {
        let first = hash("same password")?;
        let second = hash("same password")?;
        assert_ne!(first, second);
        Ok(())
    }
}
