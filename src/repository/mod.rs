//! Store interfaces
//!
//! Services only talk to these traits. `postgres` is the production backing
//! store; `memory` keeps the same uniqueness and conditional-update rules in
//! process and backs the test suite.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::accounts::{AuthProviderLink, Provider, User, UserStatus};
use crate::error::DatabaseError;

/// Persisted refresh token state. Only the hash of the secret is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RefreshTokenRecord {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DatabaseError>;

    async fn find_by_display_name(&self, display_name: &str) -> Result<Option<User>, DatabaseError>;

    /// Returns false when no such user exists.
    async fn update_status(&self, user_id: &str, status: UserStatus) -> Result<bool, DatabaseError>;

    /// Highest scores first
    async fn find_top_by_score(&self, limit: i64, status: UserStatus) -> Result<Vec<User>, DatabaseError>;
}

#[async_trait]
pub trait AuthProviderRepository: Send + Sync {
    /// Owner of `(provider, provider_user_id)`; most recently linked wins.
    async fn find_user_id(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<String>, DatabaseError>;

    /// Most recently linked provider of a user
    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<AuthProviderLink>, DatabaseError>;

    async fn find_by_user_id_and_provider(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<AuthProviderLink>, DatabaseError>;

    /// Insert or update the `(user_id, provider)` link, stamping `linked_at = now`.
    async fn upsert_provider_user_id(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn delete_by_user_id(&self, user_id: &str) -> Result<u64, DatabaseError>;
}

#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    async fn save(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, DatabaseError>;

    /// Conditional revoke (`revoked_at IS NULL`). Returns true only for the
    /// call that performed the transition.
    async fn revoke_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError>;

    /// Revokes every unrevoked token of the user; returns how many changed.
    async fn revoke_all_by_user_id(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

/// Unit of work for creating a user together with its provider link.
///
/// Nothing written through it is visible to others before `commit`.
/// Dropping it without committing discards the writes.
#[async_trait]
pub trait AccountTransaction: Send {
    async fn insert_user(
        &mut self,
        user_id: &str,
        display_name: &str,
        profile_icon_code: &str,
    ) -> Result<(), DatabaseError>;

    async fn insert_link(
        &mut self,
        user_id: &str,
        provider: Provider,
        provider_user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn AccountTransaction>, DatabaseError>;
}
