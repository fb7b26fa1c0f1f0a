/// Session Routes
///
/// Login-state check, profile lookup, refresh token rotation and logout.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::accounts::{AccountService, AuthProviderLink, Provider, User, UserService};
use crate::auth::{Claims, TokenPair, TokenService};
use crate::error::{AccountError, AppError, ValidationError};
use crate::routes::{subject, Success};

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
pub struct UserDataRequest {
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct ProviderResponse {
    pub provider: Provider,
    pub provider_user_id: Option<String>,
    pub linked_at: String,
}

impl From<AuthProviderLink> for ProviderResponse {
    fn from(link: AuthProviderLink) -> Self {
        Self {
            provider: link.provider,
            provider_user_id: link.provider_user_id,
            linked_at: link.linked_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub provider: Option<ProviderResponse>,
    /// Expiry of the presented access token (Unix seconds)
    pub expires_at: i64,
}

#[derive(Serialize)]
pub struct UserDataResponse {
    pub user: User,
}

#[derive(Serialize)]
pub struct LogoutResponse {}

/// POST /login, POST /self-data
///
/// Confirms the session is usable and returns the caller's profile.
///
/// # Errors
/// - 401: Missing, invalid or expired access token
/// - 404: User not found
/// - 403: User is not ACTIVE
pub async fn login(
    claims: web::ReqData<Claims>,
    users: web::Data<UserService>,
    accounts: web::Data<AccountService>,
) -> Result<HttpResponse, AppError> {
    let user_id = subject(&claims)?;
    let user = users.require_active(user_id).await?;
    let provider = accounts.latest_link(user_id).await?.map(ProviderResponse::from);

    tracing::info!(user_id = %user_id, "Session confirmed");

    Ok(HttpResponse::Ok().json(Success::new(SessionResponse {
        user,
        provider,
        expires_at: claims.exp,
    })))
}

/// POST /user-data
///
/// Profile of any user by `user_id`. The caller only needs a valid access
/// token; the target's status is returned as is.
///
/// # Errors
/// - 400: INVALID_USER_ID when user_id is missing, blank or not a string
/// - 404: USER_NOT_FOUND
pub async fn user_data(
    claims: web::ReqData<Claims>,
    body: web::Json<UserDataRequest>,
    users: web::Data<UserService>,
) -> Result<HttpResponse, AppError> {
    subject(&claims)?;

    let target = body
        .user_id
        .as_ref()
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|user_id| !user_id.is_empty())
        .ok_or(ValidationError::InvalidUserId)?;

    let user = users
        .find_by_id(target)
        .await?
        .ok_or(AccountError::UserNotFound)?;

    Ok(HttpResponse::Ok().json(Success::new(UserDataResponse { user })))
}

/// POST /refresh-token
///
/// Redeems a refresh secret for a new token pair. The presented secret is
/// revoked; reusing it fails with REFRESH_TOKEN_REVOKED.
///
/// # Errors
/// - 400: Empty refresh_token
/// - 401: INVALID_REFRESH_TOKEN, REFRESH_TOKEN_REVOKED or REFRESH_TOKEN_EXPIRED
pub async fn refresh_token(
    body: web::Json<RefreshRequest>,
    tokens: web::Data<TokenService>,
) -> Result<HttpResponse, AppError> {
    let secret = body
        .refresh_token
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if secret.is_empty() {
        return Err(ValidationError::MissingRefreshToken.into());
    }

    let pair: TokenPair = tokens.refresh(secret).await?;

    Ok(HttpResponse::Ok().json(Success::new(pair)))
}

/// POST /logout
///
/// Revokes every refresh token of the caller. The access token stays valid
/// until it expires.
pub async fn logout(
    claims: web::ReqData<Claims>,
    tokens: web::Data<TokenService>,
) -> Result<HttpResponse, AppError> {
    let user_id = subject(&claims)?;
    tokens.revoke_all(user_id).await?;

    Ok(HttpResponse::Ok().json(Success::new(LogoutResponse {})))
}
