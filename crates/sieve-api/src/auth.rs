//! Bearer token verification

use crate::{error::ApiError, AppState};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token has expired")]
    Expired,

    #[error("Invalid audience")]
    InvalidAudience,

    #[error("Invalid token: {0}")]
    Invalid(String),
}

/// Identity claims read from a verified token. `exp` and `aud` are checked
/// by the validation itself.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verifies HS256 tokens issued by the identity provider
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
    disabled: bool,
}

impl TokenVerifier {
    pub fn new(secret: &str, audience: &str, disabled: bool) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.leeway = 60;

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            disabled,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        use jsonwebtoken::errors::ErrorKind;

        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                _ => AuthError::Invalid(e.to_string()),
            })
    }
}

/// Caller identity extracted from the `Authorization` header
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        if state.verifier.is_disabled() {
            return Ok(AuthUser {
                id: "anonymous".to_string(),
                email: None,
            });
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AuthError::MissingToken)?;

        let claims = state.verifier.verify(token.trim())?;
        Ok(AuthUser {
            id: claims.sub,
            email: claims.email,
        })
    }
}

/// Issue a token the verifier accepts
#[cfg(test)]
pub(crate) fn create_token(subject: &str, email: &str, audience: &str, secret: &str, ttl_secs: u64) -> Result<String, AuthError> {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| AuthError::Invalid(e.to_string()))?
        .as_secs();

    let claims = serde_json::json!({
        "sub": subject,
        "email": email,
        "exp": now + ttl_secs,
        "aud": audience,
    });

    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AuthError::Invalid(e.to_string()))
}
