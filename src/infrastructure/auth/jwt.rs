use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, DecodingKey, Validation};

use crate::config::JwtConfig;
use crate::error::AppError;

use super::{Authenticator, Claims, Identity};

pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(config: &JwtConfig) -> Self {
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        let mut validation = Validation::default();

        if let Some(ref issuer) = config.issuer {
            validation.set_issuer(&[issuer]);
        }

        if let Some(ref audience) = config.audience {
            validation.set_audience(&[audience]);
        }

        Self {
            decoding_key,
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AppError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| AppError::Auth(format!("Invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

/// Take the token from the `token` query parameter, else from `Authorization: Bearer`.
///
/// Browsers cannot set headers on a WebSocket handshake, hence the query fallback.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Bearer-token authenticator backed by [`JwtValidator`]
pub struct JwtAuthenticator {
    validator: JwtValidator,
}

impl JwtAuthenticator {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            validator: JwtValidator::new(config),
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<Identity, AppError> {
        let token = extract_token(query_token, headers)
            .ok_or_else(|| AppError::Auth("Missing authentication token".to_string()))?;

        let claims = self.validator.validate(&token)?;
        Ok(Identity::new(claims.user_id(), claims.username()))
    }
}
