use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::{FarmError, FarmResult};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> FarmResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| FarmError::Internal(format!("password hashing failed: {e}")))
}

/// `false` for a wrong password and for an unparsable hash alike.
pub fn verify_password(password: &str, phc: &str) -> bool {
    PasswordHash::new(phc).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

fn join_error(e: tokio::task::JoinError) -> FarmError {
    FarmError::Internal(format!("password task failed: {e}"))
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_off_thread(password: String) -> FarmResult<String> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(join_error)?
}

/// [`verify_password`] on the blocking pool.
pub async fn verify_off_thread(password: String, phc: String) -> FarmResult<bool> {
    tokio::task::spawn_blocking(move || verify_password(&password, &phc))
        .await
        .map_err(join_error)
}

pub fn check_password_policy(password: &str) -> FarmResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(FarmError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}
