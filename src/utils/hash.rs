use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use crate::{
    error::AppError,
    models::user::Credential,
    store::{CREDENTIALS, DocumentStore},
};

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::InternalServerError(e.to_string()))
}

pub fn verify_password(password: &str, password_hash: &str) -> Result<bool, AppError> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| AppError::InternalServerError(e.to_string()))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Re-verifies a signed-in user's password against their stored credential.
/// A user without a credential document never verifies.
pub async fn check_user_password(
    store: &dyn DocumentStore,
    user_id: &str,
    password: &str,
) -> Result<bool, AppError> {
    let Some(doc) = store.get(CREDENTIALS, user_id).await? else {
        return Ok(false);
    };
    let credential: Credential = doc.decode()?;
    verify_password(password, &credential.password_hash)
}
