/// Access guard
///
/// Pulls the bearer credential out of a request and turns it into verified
/// claims or an `AuthError` that only says expired or invalid.

use std::sync::Arc;

use crate::auth::claims::Claims;
use crate::auth::token_service::TokenService;
use crate::error::AuthError;

#[derive(Clone)]
pub struct AccessGuard {
    tokens: Arc<TokenService>,
}

/// Token from an `Authorization: Bearer <token>` header value.
///
/// The scheme match is case-insensitive; anything else yields `None`.
pub fn bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl AccessGuard {
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self { tokens }
    }

    /// Header first, then the request-supplied fallback field
    pub fn extract<'a>(&self, authorization: Option<&'a str>, fallback: Option<&'a str>) -> Option<&'a str> {
        authorization.and_then(bearer_token).or_else(|| {
            fallback
                .map(str::trim)
                .filter(|token| !token.is_empty())
        })
    }

    pub fn authorize(
        &self,
        authorization: Option<&str>,
        fallback: Option<&str>,
    ) -> Result<Claims, AuthError> {
        let token = self.extract(authorization, fallback).ok_or(AuthError::MissingToken)?;

        self.tokens.validate_access(token).map_err(|rejection| {
            tracing::warn!(reason = rejection.code(), "Access token rejected");
            AuthError::from(rejection)
        })
    }
}
