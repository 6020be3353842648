//! bcrypt hashing on the blocking pool.

use crate::error::AppError;

pub async fn hash_password(password: &str, cost: u32) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
        .await
        .map_err(|e| AppError::Internal(format!("hash task: {}", e)))?
        .map_err(|e| AppError::Internal(format!("hash: {}", e)))
}

/// False for a wrong password and for a malformed stored hash.
pub async fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let ok = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
        .await
        .map_err(|e| AppError::Internal(format!("verify task: {}", e)))?;
    Ok(ok)
}
