/// Access token claims
///
/// Payload of the signed access token. Never persisted.

use serde::{Deserialize, Serialize};

use crate::accounts::Role;

/// Fixed issuer of every access token this service signs
pub const ISSUER: &str = "teamnova-omok";

/// Scope granted to regular user tokens
pub const USER_SCOPE: &str = "user";

fn default_issuer() -> String {
    ISSUER.to_string()
}

fn default_scope() -> String {
    USER_SCOPE.to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Issuer
    #[serde(default = "default_issuer")]
    pub iss: String,
    /// Subject (user id)
    pub sub: String,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_scope")]
    pub scope: String,
}

impl Claims {
    /// Claims for `user_id` issued at `now` and valid for `ttl_secs`
    pub fn new(user_id: impl Into<String>, role: Role, now: i64, ttl_secs: i64) -> Self {
        Self {
            iss: ISSUER.to_string(),
            sub: user_id.into(),
            iat: now,
            exp: now + ttl_secs,
            role,
            scope: USER_SCOPE.to_string(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.sub
    }
}
