/// Account Routes
///
/// Account creation for GUEST/GOOGLE identities, Google linking and
/// deactivation.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use crate::accounts::{
    validate_provider_user_id, AccountService, GoogleIdTokenVerifier, Provider, UserService,
    DEFAULT_ICON_CODE,
};
use crate::auth::{Claims, TokenPair, TokenService};
use crate::error::{AccountError, AppError, ValidationError};
use crate::routes::{subject, Success};

#[derive(Deserialize)]
pub struct CreateAccountRequest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub provider_user_id: Option<String>,
}

#[derive(Serialize)]
pub struct CreateAccountResponse {
    pub created: bool,
    pub user_id: String,
    #[serde(flatten)]
    pub tokens: TokenPair,
}

#[derive(Deserialize)]
pub struct LinkGoogleRequest {
    #[serde(default)]
    pub provider_id_token: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct LinkGoogleResponse {
    pub linked: bool,
    pub provider: Provider,
    pub user_id: String,
    pub provider_user_id: String,
    pub previous_provider_user_id: Option<String>,
    pub linked_at: String,
}

#[derive(Serialize)]
pub struct DeactivateResponse {
    pub deactivated: bool,
    pub already_inactive: bool,
    pub refresh_tokens_revoked: bool,
}

/// POST /create-account
///
/// Resolves the identity to a user, creating one when needed, and signs
/// the caller in immediately.
///
/// # Validation
/// - provider must be GUEST or GOOGLE
/// - GOOGLE needs a provider_user_id of 1 to 255 characters
/// - GUEST ignores provider_user_id; every call creates a new user
///
/// # Errors
/// - 400: INVALID_PROVIDER, INVALID_PROVIDER_USER_ID
/// - 500: Data integrity or database error
pub async fn create_account(
    body: web::Json<CreateAccountRequest>,
    accounts: web::Data<AccountService>,
    tokens: web::Data<TokenService>,
) -> Result<HttpResponse, AppError> {
    let provider = body
        .provider
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .parse::<Provider>()
        .map_err(|_| ValidationError::InvalidProvider)?;

    let provider_user_id = match provider {
        Provider::Google => Some(validate_provider_user_id(
            body.provider_user_id.as_deref().unwrap_or_default(),
        )?),
        Provider::Guest => None,
    };

    let display_name = accounts.available_display_name().await?;
    let resolved = accounts
        .resolve_or_create(provider, provider_user_id, &display_name, DEFAULT_ICON_CODE)
        .await?;
    let pair = tokens.issue(&resolved.user.user_id).await?;

    let response = CreateAccountResponse {
        created: resolved.created,
        user_id: resolved.user.user_id,
        tokens: pair,
    };
    let mut builder = if response.created {
        HttpResponse::Created()
    } else {
        HttpResponse::Ok()
    };

    Ok(builder.json(Success::new(response)))
}

/// POST /link-google
///
/// Links a verified Google identity to the caller's account.
///
/// # Errors
/// - 400: provider_id_token missing or not a string
/// - 401: Access token problems, or the Google ID token failed verification
/// - 403/404: Caller is not an ACTIVE user
/// - 409: The Google account belongs to another user
pub async fn link_google(
    claims: web::ReqData<Claims>,
    body: web::Json<LinkGoogleRequest>,
    users: web::Data<UserService>,
    accounts: web::Data<AccountService>,
    google: web::Data<dyn GoogleIdTokenVerifier>,
) -> Result<HttpResponse, AppError> {
    let user_id = subject(&claims)?;
    users.require_active(user_id).await?;

    let id_token = body
        .provider_id_token
        .as_ref()
        .and_then(|value| value.as_str())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ValidationError::InvalidProviderIdToken)?;

    let google_subject = google.verify(id_token).await?;
    let linked = accounts.link_google(user_id, &google_subject).await?;

    let provider_user_id = linked
        .link
        .provider_user_id
        .clone()
        .ok_or_else(|| AccountError::DataIntegrity(format!("GOOGLE link of {} has no subject", user_id)))?;

    Ok(HttpResponse::Ok().json(Success::new(LinkGoogleResponse {
        linked: true,
        provider: Provider::Google,
        user_id: user_id.to_string(),
        provider_user_id,
        previous_provider_user_id: linked.previous_provider_user_id,
        linked_at: linked.link.linked_at.to_rfc3339(),
    })))
}

/// POST /deactivate-account
///
/// Marks the caller INACTIVE and revokes all of their refresh tokens.
/// Deactivating an inactive account succeeds and reports `already_inactive`.
pub async fn deactivate_account(
    claims: web::ReqData<Claims>,
    users: web::Data<UserService>,
    tokens: web::Data<TokenService>,
) -> Result<HttpResponse, AppError> {
    let user_id = subject(&claims)?;

    let already_inactive = users
        .deactivate(user_id)
        .await?
        .ok_or(AccountError::UserNotFound)?;
    let revoked = tokens.revoke_all(user_id).await?;

    tracing::info!(user_id = %user_id, revoked, "Account deactivated");

    Ok(HttpResponse::Ok().json(Success::new(DeactivateResponse {
        deactivated: true,
        already_inactive,
        refresh_tokens_revoked: true,
    })))
}
