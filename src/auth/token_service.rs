/// Token lifecycle
///
/// Single authority for issuing, validating, rotating and revoking
/// access/refresh token pairs. A refresh record goes
/// ACTIVE -> REVOKED (redeemed or revoked) or ACTIVE -> EXPIRED (detected
/// lazily at lookup); neither terminal state is ever left.

use chrono::Duration;
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::accounts::Role;
use crate::auth::claims::Claims;
use crate::auth::clock::Clock;
use crate::auth::codec::{self, TokenRejection};
use crate::auth::refresh_token::{generate_refresh_secret, hash_refresh_secret};
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError, DatabaseError};
use crate::repository::{RefreshTokenRepository, UserRepository};

pub const TOKEN_TYPE: &str = "Bearer";

/// Access/refresh pair handed to the client. `refresh_token` is the
/// plaintext secret; only its hash is stored.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
}

/// Why a refresh secret could not be redeemed
#[derive(Debug)]
pub enum RefreshError {
    InvalidRefreshToken,
    RefreshTokenRevoked,
    RefreshTokenExpired,
    Store(DatabaseError),
    /// Rotation happened but the new pair could not be issued
    Issue(AppError),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::InvalidRefreshToken => write!(f, "INVALID_REFRESH_TOKEN"),
            RefreshError::RefreshTokenRevoked => write!(f, "REFRESH_TOKEN_REVOKED"),
            RefreshError::RefreshTokenExpired => write!(f, "REFRESH_TOKEN_EXPIRED"),
            RefreshError::Store(e) => write!(f, "{}", e),
            RefreshError::Issue(e) => write!(f, "{}", e),
        }
    }
}

impl StdError for RefreshError {}

impl From<DatabaseError> for RefreshError {
    fn from(err: DatabaseError) -> Self {
        RefreshError::Store(err)
    }
}

impl From<RefreshError> for AppError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::InvalidRefreshToken => AppError::Auth(AuthError::InvalidRefreshToken),
            RefreshError::RefreshTokenRevoked => AppError::Auth(AuthError::RefreshTokenRevoked),
            RefreshError::RefreshTokenExpired => AppError::Auth(AuthError::RefreshTokenExpired),
            RefreshError::Store(e) => AppError::Database(e),
            RefreshError::Issue(e) => e,
        }
    }
}

impl From<TokenRejection> for AuthError {
    fn from(rejection: TokenRejection) -> Self {
        if rejection.is_expired() {
            AuthError::AccessTokenExpired
        } else {
            AuthError::AccessTokenInvalid
        }
    }
}

pub struct TokenService {
    settings: JwtSettings,
    users: Arc<dyn UserRepository>,
    refresh_tokens: Arc<dyn RefreshTokenRepository>,
    clock: Arc<dyn Clock>,
}

impl TokenService {
    pub fn new(
        settings: JwtSettings,
        users: Arc<dyn UserRepository>,
        refresh_tokens: Arc<dyn RefreshTokenRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            users,
            refresh_tokens,
            clock,
        }
    }

    pub fn access_token_ttl_secs(&self) -> i64 {
        self.settings.access_token_ttl_secs
    }

    /// Current role of the user, `USER` when it cannot be determined
    async fn current_role(&self, user_id: &str) -> Role {
        match self.users.find_by_id(user_id).await {
            Ok(Some(user)) => user.role,
            Ok(None) => Role::default(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Role lookup failed, issuing default role");
                Role::default()
            }
        }
    }

    /// Issue a fresh access token and a new refresh secret for `user_id`
    pub async fn issue(&self, user_id: &str) -> Result<TokenPair, AppError> {
        let now = self.clock.now();
        let expires_at = Duration::try_days(self.settings.refresh_token_ttl_days)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                ConfigError::InvalidValue("jwt.refresh_token_ttl_days is out of range".to_string())
            })?;
        if now.timestamp().checked_add(self.settings.access_token_ttl_secs).is_none() {
            return Err(ConfigError::InvalidValue(
                "jwt.access_token_ttl_secs is out of range".to_string(),
            )
            .into());
        }

        let role = self.current_role(user_id).await;
        let claims = Claims::new(user_id, role, now.timestamp(), self.settings.access_token_ttl_secs);
        let access_token = codec::encode(&claims, self.settings.secret.as_bytes())?;

        let refresh_token = generate_refresh_secret();
        self.refresh_tokens
            .save(user_id, &hash_refresh_secret(&refresh_token), expires_at)
            .await?;

        tracing::info!(user_id = %user_id, role = %role, "Token pair issued");

        Ok(TokenPair {
            access_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: self.settings.access_token_ttl_secs,
            refresh_token,
        })
    }

    /// Sole gate for authenticated requests
    pub fn validate_access(&self, token: &str) -> Result<Claims, TokenRejection> {
        codec::decode_and_verify(
            token,
            self.settings.secret.as_bytes(),
            self.clock.now().timestamp(),
        )
    }

    /// Redeem a refresh secret: the old secret is revoked before the new
    /// pair is issued, whether or not the caller ends up receiving it.
    pub async fn refresh(&self, refresh_secret: &str) -> Result<TokenPair, RefreshError> {
        let token_hash = hash_refresh_secret(refresh_secret);

        let record = match self.refresh_tokens.find_by_hash(&token_hash).await? {
            Some(record) => record,
            None => {
                tracing::warn!("Refresh token not found");
                return Err(RefreshError::InvalidRefreshToken);
            }
        };

        let now = self.clock.now();

        if record.is_revoked() {
            tracing::warn!(user_id = %record.user_id, "Attempt to use revoked refresh token");
            return Err(RefreshError::RefreshTokenRevoked);
        }

        if record.is_expired_at(now) {
            tracing::info!(user_id = %record.user_id, "Refresh token expired");
            if let Err(e) = self.refresh_tokens.revoke_by_hash(&token_hash, now).await {
                tracing::warn!(user_id = %record.user_id, error = %e, "Could not mark expired refresh token revoked");
            }
            return Err(RefreshError::RefreshTokenExpired);
        }

        // Only the caller whose conditional update lands may rotate.
        if !self.refresh_tokens.revoke_by_hash(&token_hash, now).await? {
            tracing::warn!(user_id = %record.user_id, "Refresh token rotated concurrently");
            return Err(RefreshError::RefreshTokenRevoked);
        }

        let pair = self
            .issue(&record.user_id)
            .await
            .map_err(RefreshError::Issue)?;

        tracing::info!(user_id = %record.user_id, "Refresh token rotated");
        Ok(pair)
    }

    /// Revoke one refresh secret. Unknown or already revoked secrets are a no-op.
    pub async fn revoke(&self, refresh_secret: &str) -> Result<bool, AppError> {
        let revoked = self
            .refresh_tokens
            .revoke_by_hash(&hash_refresh_secret(refresh_secret), self.clock.now())
            .await?;
        Ok(revoked)
    }

    /// Revoke every outstanding refresh token of a user (logout, deactivation)
    pub async fn revoke_all(&self, user_id: &str) -> Result<u64, AppError> {
        let revoked = self
            .refresh_tokens
            .revoke_all_by_user_id(user_id, self.clock.now())
            .await?;

        tracing::info!(user_id = %user_id, revoked = revoked, "All refresh tokens revoked for user");
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::Provider;
    use crate::auth::clock::ManualClock;
    use crate::repository::{AccountStore, InMemoryStore};
    use chrono::Utc;

    struct Fixture {
        store: InMemoryStore,
        clock: Arc<ManualClock>,
        service: TokenService,
    }

    fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let service = TokenService::new(
            JwtSettings::new("test-secret-key-at-least-32-characters-long"),
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            clock.clone(),
        );
        Fixture { store, clock, service }
    }

    async fn create_user(store: &InMemoryStore, user_id: &str) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_user(user_id, &format!("user-{}", user_id), "0").await.unwrap();
        tx.insert_link(user_id, Provider::Guest, None, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn issued_access_token_validates_with_subject() {
        let f = fixture();
        let pair = f.service.issue("u1").await.unwrap();

        let claims = f.service.validate_access(&pair.access_token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.scope, "user");
        assert_eq!(claims.exp - claims.iat, 3600);
        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 3600);
    }

    #[tokio::test]
    async fn access_token_expires_after_ttl() {
        let f = fixture();
        let pair = f.service.issue("u1").await.unwrap();

        f.clock.advance(Duration::seconds(3600));
        assert_eq!(
            f.service.validate_access(&pair.access_token),
            Err(TokenRejection::Expired)
        );
    }

    #[tokio::test]
    async fn role_comes_from_the_user_and_defaults_to_user() {
        let f = fixture();
        create_user(&f.store, "admin").await;
        f.store.set_role("admin", Role::Admin);

        let admin = f.service.issue("admin").await.unwrap();
        let unknown = f.service.issue("nobody").await.unwrap();

        assert_eq!(f.service.validate_access(&admin.access_token).unwrap().role, Role::Admin);
        assert_eq!(f.service.validate_access(&unknown.access_token).unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn only_the_hash_is_stored() {
        let f = fixture();
        let pair = f.service.issue("u1").await.unwrap();

        let records = f.store.refresh_tokens_for("u1");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_hash, hash_refresh_secret(&pair.refresh_token));
        assert_ne!(records[0].token_hash, pair.refresh_token);
        assert_eq!(records[0].expires_at, f.clock.now() + Duration::days(14));
    }

    #[tokio::test]
    async fn refresh_rotates_and_old_secret_is_single_use() {
        let f = fixture();
        let first = f.service.issue("u1").await.unwrap();

        let second = f.service.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(f.service.validate_access(&second.access_token).unwrap().sub, "u1");

        let again = f.service.refresh(&first.refresh_token).await;
        assert!(matches!(again, Err(RefreshError::RefreshTokenRevoked)));

        // the rotated secret keeps working
        assert!(f.service.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_refresh_yields_exactly_one_pair() {
        let f = fixture();
        let pair = f.service.issue("u1").await.unwrap();

        let (a, b) = tokio::join!(
            f.service.refresh(&pair.refresh_token),
            f.service.refresh(&pair.refresh_token)
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        let failure = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(
            failure,
            RefreshError::RefreshTokenRevoked | RefreshError::InvalidRefreshToken
        ));
    }

    #[tokio::test]
    async fn unknown_secret_is_invalid() {
        let f = fixture();
        let result = f.service.refresh("never-issued").await;
        assert!(matches!(result, Err(RefreshError::InvalidRefreshToken)));
    }

    #[tokio::test]
    async fn expired_secret_is_rejected_and_marked_revoked() {
        let f = fixture();
        let pair = f.service.issue("u1").await.unwrap();

        f.clock.advance(Duration::days(14));
        let result = f.service.refresh(&pair.refresh_token).await;
        assert!(matches!(result, Err(RefreshError::RefreshTokenExpired)));

        let record = &f.store.refresh_tokens_for("u1")[0];
        assert!(record.revoked_at.is_some());

        // once marked, later attempts read as revoked
        let result = f.service.refresh(&pair.refresh_token).await;
        assert!(matches!(result, Err(RefreshError::RefreshTokenRevoked)));
    }

    #[tokio::test]
    async fn revoke_all_invalidates_every_outstanding_secret() {
        let f = fixture();
        let a = f.service.issue("u1").await.unwrap();
        let b = f.service.issue("u1").await.unwrap();
        let other = f.service.issue("u2").await.unwrap();

        assert_eq!(f.service.revoke_all("u1").await.unwrap(), 2);
        assert_eq!(f.service.revoke_all("u1").await.unwrap(), 0);

        for pair in [&a, &b] {
            let result = f.service.refresh(&pair.refresh_token).await;
            assert!(matches!(result, Err(RefreshError::RefreshTokenRevoked)));
        }
        assert!(f.service.refresh(&other.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn revoke_single_secret_is_idempotent() {
        let f = fixture();
        let pair = f.service.issue("u1").await.unwrap();

        assert!(f.service.revoke(&pair.refresh_token).await.unwrap());
        assert!(!f.service.revoke(&pair.refresh_token).await.unwrap());
        assert!(!f.service.revoke("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn out_of_range_lifetimes_fail_without_storing_anything() {
        let store = InMemoryStore::new();
        let mut settings = JwtSettings::new("test-secret-key-at-least-32-characters-long");
        settings.refresh_token_ttl_days = i64::MAX;
        let service = TokenService::new(
            settings,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(ManualClock::new(Utc::now())),
        );

        let result = service.issue("u1").await;

        assert!(matches!(result, Err(AppError::Config(ConfigError::InvalidValue(_)))));
        assert!(store.refresh_tokens_for("u1").is_empty());
    }

    #[test]
    fn refresh_errors_map_to_auth_codes() {
        let err: AppError = RefreshError::RefreshTokenExpired.into();
        assert!(matches!(err, AppError::Auth(AuthError::RefreshTokenExpired)));

        assert_eq!(AuthError::from(TokenRejection::Expired), AuthError::AccessTokenExpired);
        assert_eq!(
            AuthError::from(TokenRejection::SignatureMismatch),
            AuthError::AccessTokenInvalid
        );
    }
}
