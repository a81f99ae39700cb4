//! Bearer-token authentication extractor.
//!
//! Accepts the token from:
//! - `Authorization: Bearer <token>` header
//! - `X-API-Key: <token>` header
//!
//! When no token is configured every request passes.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};

use crate::http::error::AppError;
use crate::state::AppState;

/// Authenticated request marker. Extracting this validates the token.
pub struct Authenticated;

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = &state.api_token else {
            return Ok(Authenticated);
        };

        let provided = extract_token(parts)?;
        if tokens_match(provided.as_bytes(), expected.expose_secret().as_bytes()) {
            Ok(Authenticated)
        } else {
            Err(AppError::Unauthorized(
                "Invalid API token. Provide it via 'Authorization: Bearer <token>' or 'X-API-Key: <token>' header.".to_string(),
            ))
        }
    }
}

/// Extract the token from request headers.
fn extract_token(parts: &Parts) -> Result<String, AppError> {
    if let Some(auth) = parts.headers.get("authorization") {
        let auth_str = auth.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid Authorization header encoding".to_string())
        })?;
        if let Some(key) = auth_str.strip_prefix("Bearer ") {
            return Ok(key.trim().to_string());
        }
    }

    if let Some(key) = parts.headers.get("x-api-key") {
        let key_str = key.to_str().map_err(|_| {
            AppError::Unauthorized("Invalid X-API-Key header encoding".to_string())
        })?;
        return Ok(key_str.trim().to_string());
    }

    Err(AppError::Unauthorized(
        "Missing API token. Provide it via 'Authorization: Bearer <token>' or 'X-API-Key: <token>' header.".to_string(),
    ))
}

/// Length-independent comparison over fixed-size SHA-256 digests.
fn tokens_match(a: &[u8], b: &[u8]) -> bool {
    let (a, b) = (Sha256::digest(a), Sha256::digest(b));
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
