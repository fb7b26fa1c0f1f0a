/// Error Handling Module
///
/// One application error type for the whole service, split into domain
/// sub-errors so that each layer only speaks about what it owns:
/// 1. Input validation errors (400)
/// 2. Authentication errors for access and refresh tokens (401)
/// 3. Account errors (404/403/409/500)
/// 4. Store errors (409/503/500)
/// 5. HTTP mapping into the JSON failure envelope

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Request validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidJson,
    MissingRefreshToken,
    InvalidProvider,
    InvalidProviderUserId,
    InvalidProviderIdToken,
    InvalidUserId,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidJson => write!(f, "Request body is not a valid JSON object"),
            ValidationError::MissingRefreshToken => write!(f, "refresh_token is empty"),
            ValidationError::InvalidProvider => write!(f, "provider must be GUEST or GOOGLE"),
            ValidationError::InvalidProviderUserId => {
                write!(f, "provider_user_id is empty or longer than 255 characters")
            }
            ValidationError::InvalidProviderIdToken => {
                write!(f, "provider_id_token must be a non-empty string")
            }
            ValidationError::InvalidUserId => write!(f, "user_id must be a non-empty string"),
        }
    }
}

impl StdError for ValidationError {}

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    UniqueConstraintViolation(String),
    NotFound(String),
    QueryExecution(String),
    ConnectionPool(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::UniqueConstraintViolation(msg) => {
                write!(f, "Duplicate entry: {}", msg)
            }
            DatabaseError::NotFound(msg) => write!(f, "Not found: {}", msg),
            DatabaseError::QueryExecution(msg) => write!(f, "Query error: {}", msg),
            DatabaseError::ConnectionPool(msg) => write!(f, "Database connection error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

impl DatabaseError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DatabaseError::UniqueConstraintViolation(_))
    }
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
                DatabaseError::UniqueConstraintViolation(
                    db_err.constraint().unwrap_or("unique constraint").to_string(),
                )
            }
            sqlx::Error::RowNotFound => DatabaseError::NotFound("Record not found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseError::ConnectionPool(err.to_string())
            }
            _ => DatabaseError::QueryExecution(err.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    MissingRequired(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired(msg) => write!(f, "Missing required config: {}", msg),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid config value: {}", msg),
        }
    }
}

impl StdError for ConfigError {}

/// Authentication errors.
///
/// Access-token failures only ever surface as expired or invalid; the
/// precise codec reason stays in the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    MissingToken,
    AccessTokenExpired,
    AccessTokenInvalid,
    InvalidRefreshToken,
    RefreshTokenRevoked,
    RefreshTokenExpired,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingToken | AuthError::AccessTokenInvalid => "ACCESS_TOKEN_INVALID",
            AuthError::AccessTokenExpired => "ACCESS_TOKEN_EXPIRED",
            AuthError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            AuthError::RefreshTokenRevoked => "REFRESH_TOKEN_REVOKED",
            AuthError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingToken => write!(f, "Missing access token"),
            AuthError::AccessTokenExpired => {
                write!(f, "Access token has expired, request a new one with refresh_token")
            }
            AuthError::AccessTokenInvalid => {
                write!(f, "Access token is invalid, log in again or use refresh_token")
            }
            AuthError::InvalidRefreshToken => write!(f, "Refresh token is invalid, log in again"),
            AuthError::RefreshTokenRevoked => {
                write!(f, "Refresh token was already used or revoked, log in again")
            }
            AuthError::RefreshTokenExpired => write!(f, "Refresh token has expired, log in again"),
        }
    }
}

impl StdError for AuthError {}

/// Account and identity errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// A provider link points at a user row that does not exist.
    DataIntegrity(String),
    UserNotFound,
    UserNotActive,
    GoogleIdTokenInvalid,
    GoogleAccountAlreadyLinked,
}

impl fmt::Display for AccountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountError::DataIntegrity(msg) => write!(f, "Data integrity error: {}", msg),
            AccountError::UserNotFound => write!(f, "User not found"),
            AccountError::UserNotActive => write!(f, "User is not active"),
            AccountError::GoogleIdTokenInvalid => write!(f, "Google ID token is invalid"),
            AccountError::GoogleAccountAlreadyLinked => {
                write!(f, "Google account is already linked to another user")
            }
        }
    }
}

impl StdError for AccountError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Validation(ValidationError),
    Auth(AuthError),
    Account(AccountError),
    Database(DatabaseError),
    Config(ConfigError),
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "{}", e),
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Account(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Config(e) => write!(f, "{}", e),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<AccountError> for AppError {
    fn from(err: AccountError) -> Self {
        AppError::Account(err)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        AppError::Config(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.into())
    }
}

/// ============================================================================
/// 3. HTTP RESPONSE MAPPING
/// ============================================================================

/// Failure envelope returned to clients
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    /// Machine-readable error code
    pub error: String,
    pub message: String,
    /// Correlates the response with the server-side log line
    pub error_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_with_refresh: Option<bool>,
}

impl ErrorResponse {
    pub fn new(error_id: String, code: &str, message: String) -> Self {
        Self {
            success: false,
            error: code.to_string(),
            message,
            error_id,
            retry_with_refresh: None,
        }
    }

    pub fn with_retry_hint(mut self) -> Self {
        self.retry_with_refresh = Some(true);
        self
    }
}

/// Converts errors to HTTP responses with matching log output
pub trait ErrorHandler {
    fn error_response(&self, error_id: &str) -> (StatusCode, ErrorResponse);
    fn log_error(&self, error_id: &str);
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Validation(e) => match e {
                ValidationError::InvalidJson => "INVALID_JSON",
                ValidationError::MissingRefreshToken => "INVALID_REFRESH_TOKEN",
                ValidationError::InvalidProvider => "INVALID_PROVIDER",
                ValidationError::InvalidProviderUserId => "INVALID_PROVIDER_USER_ID",
                ValidationError::InvalidProviderIdToken => "INVALID_PROVIDER_ID_TOKEN",
                ValidationError::InvalidUserId => "INVALID_USER_ID",
            },
            AppError::Auth(e) => e.code(),
            AppError::Account(e) => match e {
                AccountError::DataIntegrity(_) => "DATA_INTEGRITY_ERROR",
                AccountError::UserNotFound => "USER_NOT_FOUND",
                AccountError::UserNotActive => "USER_NOT_ACTIVE",
                AccountError::GoogleIdTokenInvalid => "INVALID_GOOGLE_ID_TOKEN",
                AccountError::GoogleAccountAlreadyLinked => "GOOGLE_ACCOUNT_ALREADY_LINKED",
            },
            AppError::Database(e) => match e {
                DatabaseError::UniqueConstraintViolation(_) => "DUPLICATE_ENTRY",
                DatabaseError::NotFound(_) => "NOT_FOUND",
                DatabaseError::ConnectionPool(_) => "SERVICE_UNAVAILABLE",
                DatabaseError::QueryExecution(_) => "DB_ERROR",
            },
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the client
    fn public_message(&self) -> String {
        match self {
            AppError::Validation(e) => e.to_string(),
            AppError::Auth(e) => e.to_string(),
            AppError::Account(AccountError::DataIntegrity(_)) => {
                "Account data is inconsistent".to_string()
            }
            AppError::Account(e) => e.to_string(),
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                "Duplicate entry".to_string()
            }
            AppError::Database(DatabaseError::NotFound(_)) => "Record not found".to_string(),
            AppError::Database(DatabaseError::ConnectionPool(_)) => {
                "Database service temporarily unavailable".to_string()
            }
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Server configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }
}

impl ErrorHandler for AppError {
    fn error_response(&self, error_id: &str) -> (StatusCode, ErrorResponse) {
        let status = ResponseError::status_code(self);
        let body = ErrorResponse::new(error_id.to_string(), self.code(), self.public_message());

        let body = match self {
            AppError::Auth(
                AuthError::MissingToken | AuthError::AccessTokenExpired | AuthError::AccessTokenInvalid,
            ) => body.with_retry_hint(),
            _ => body,
        };

        (status, body)
    }

    fn log_error(&self, error_id: &str) {
        match self {
            AppError::Validation(e) => {
                tracing::warn!(error_id = error_id, error = %e, "Validation error");
            }
            AppError::Auth(e) => {
                tracing::warn!(error_id = error_id, code = e.code(), "Authentication error");
            }
            AppError::Account(AccountError::DataIntegrity(msg)) => {
                tracing::error!(error_id = error_id, error = %msg, "Data integrity error");
            }
            AppError::Account(e) => {
                tracing::warn!(error_id = error_id, error = %e, "Account error");
            }
            AppError::Database(DatabaseError::UniqueConstraintViolation(_)) => {
                tracing::warn!(error_id = error_id, error = %self, "Duplicate entry attempt");
            }
            AppError::Database(e) => {
                tracing::error!(error_id = error_id, error = %e, "Database error");
            }
            AppError::Config(e) => {
                tracing::error!(error_id = error_id, error = %e, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(error_id = error_id, error = %msg, "Internal error");
            }
        }
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let error_id = uuid::Uuid::new_v4().to_string();
        self.log_error(&error_id);

        let (status, body) = <Self as ErrorHandler>::error_response(self, &error_id);

        HttpResponse::build(status).json(body)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Account(e) => match e {
                AccountError::DataIntegrity(_) => StatusCode::INTERNAL_SERVER_ERROR,
                AccountError::UserNotFound => StatusCode::NOT_FOUND,
                AccountError::UserNotActive => StatusCode::FORBIDDEN,
                AccountError::GoogleIdTokenInvalid => StatusCode::UNAUTHORIZED,
                AccountError::GoogleAccountAlreadyLinked => StatusCode::CONFLICT,
            },
            AppError::Database(e) => match e {
                DatabaseError::UniqueConstraintViolation(_) => StatusCode::CONFLICT,
                DatabaseError::NotFound(_) => StatusCode::NOT_FOUND,
                DatabaseError::ConnectionPool(_) => StatusCode::SERVICE_UNAVAILABLE,
                DatabaseError::QueryExecution(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
