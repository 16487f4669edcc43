use argon2::{
    Argon2,
    PasswordHash,
    PasswordVerifier,
    PasswordHasher,
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Duration, Utc};
use rand::{RngCore, rngs::OsRng};
use sha2::{Digest, Sha256};

use argon2::password_hash::{SaltString, rand_core::OsRng as PHOsRng};

use crate::error::ApiError;

pub const MIN_PASSWORD_LEN: usize = 6;
pub const RESET_TOKEN_TTL_MINUTES: i64 = 60;

/// Verify a password against the argon2 PHC string in `app_user.password_hash`.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed = match PasswordHash::new(stored_hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut PHOsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|phc| phc.to_string())
        .map_err(|e| ApiError::Internal(format!("argon2 hash error: {e}")))
}

pub fn validate_new_password(pw: &str) -> Result<(), ApiError> {
    if pw.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Opaque random token handed to the client. Used for sessions and password resets.
pub fn generate_access_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only the SHA-256 hex of a token is ever stored.
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn reset_token_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::minutes(RESET_TOKEN_TTL_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let phc = hash_password("secret123").unwrap();
        assert!(verify_password("secret123", &phc));
        assert!(!verify_password("secret124", &phc));
        assert!(!verify_password("secret123", "not-a-phc-string"));
    }

    #[test]
    fn test_token_hash_is_stable_hex() {
        let token = generate_access_token();
        let h1 = hash_access_token(&token);
        assert_eq!(h1, hash_access_token(&token));
        assert_eq!(h1.len(), 64);
        assert_ne!(token, generate_access_token());
    }

    #[test]
    fn test_validate_new_password() {
        assert!(validate_new_password("abcdef").is_ok());
        assert!(validate_new_password("abcde").is_err());
        assert!(validate_new_password("").is_err());
    }

    #[test]
    fn test_reset_expiry_is_one_hour() {
        let now = Utc::now();
        assert_eq!(reset_token_expiry(now) - now, Duration::hours(1));
    }
}
