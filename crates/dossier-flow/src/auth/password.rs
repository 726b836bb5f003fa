use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use std::sync::OnceLock;

use super::AuthError;

pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Hashes `plain` with argon2id and a random salt, returning the PHC string.
pub fn hash_password(plain: &str) -> Result<String, AuthError> {
    if plain.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::WeakPassword);
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| AuthError::Hashing(err.to_string()))
}

/// Checks `plain` against a stored PHC string. Malformed hashes never verify.
pub fn verify_password(plain: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(plain.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Runs a full argon2 verification for a login whose account does not exist, so both
/// rejections cost the same. Always `false`.
pub fn verify_without_account(plain: &str) -> bool {
    static PLACEHOLDER: OnceLock<Option<String>> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| hash_password("placeholder account secret").ok());
    if let Some(hash) = placeholder {
        let _ = verify_password(plain, hash);
    }
    false
}
