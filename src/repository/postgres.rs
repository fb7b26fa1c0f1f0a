//! PostgreSQL store. Schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};

use super::{
    AccountStore, AccountTransaction, AuthProviderRepository, RefreshTokenRecord,
    RefreshTokenRepository, UserRepository,
};
use crate::accounts::{AuthProviderLink, Provider, User, UserStatus};
use crate::error::DatabaseError;

type UserRow = (String, String, Option<String>, String, String, i64);
type LinkRow = (String, String, Option<String>, DateTime<Utc>);

fn user_from_row(row: UserRow) -> Result<User, DatabaseError> {
    let (user_id, display_name, profile_icon_code, role, status, score) = row;
    Ok(User {
        user_id,
        display_name,
        profile_icon_code,
        role: role.parse().map_err(DatabaseError::QueryExecution)?,
        status: status.parse().map_err(DatabaseError::QueryExecution)?,
        score,
    })
}

fn link_from_row(row: LinkRow) -> Result<AuthProviderLink, DatabaseError> {
    let (user_id, provider, provider_user_id, linked_at) = row;
    Ok(AuthProviderLink {
        user_id,
        provider: provider.parse().map_err(DatabaseError::QueryExecution)?,
        provider_user_id,
        linked_at,
    })
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, display_name, profile_icon_code, role, status, score
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(user_from_row)
        .transpose()
    }

    async fn find_by_display_name(&self, display_name: &str) -> Result<Option<User>, DatabaseError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, display_name, profile_icon_code, role, status, score
            FROM users
            WHERE display_name = $1
            "#,
        )
        .bind(display_name)
        .fetch_optional(&self.pool)
        .await?
        .map(user_from_row)
        .transpose()
    }

    async fn update_status(&self, user_id: &str, status: UserStatus) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE users SET status = $1 WHERE user_id = $2")
            .bind(status.as_str())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_top_by_score(&self, limit: i64, status: UserStatus) -> Result<Vec<User>, DatabaseError> {
        sqlx::query_as::<_, UserRow>(
            r#"
            SELECT user_id, display_name, profile_icon_code, role, status, score
            FROM users
            WHERE status = $1
            ORDER BY score DESC
            LIMIT $2
            "#,
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(user_from_row)
        .collect()
    }
}

#[async_trait]
impl AuthProviderRepository for PgStore {
    async fn find_user_id(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let user_id = sqlx::query_scalar::<_, String>(
            r#"
            SELECT user_id
            FROM auth_providers
            WHERE provider = $1 AND provider_user_id = $2
            ORDER BY linked_at DESC
            LIMIT 1
            "#,
        )
        .bind(provider.as_str())
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user_id)
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<AuthProviderLink>, DatabaseError> {
        sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT user_id, provider, provider_user_id, linked_at
            FROM auth_providers
            WHERE user_id = $1
            ORDER BY linked_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .map(link_from_row)
        .transpose()
    }

    async fn find_by_user_id_and_provider(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<AuthProviderLink>, DatabaseError> {
        sqlx::query_as::<_, LinkRow>(
            r#"
            SELECT user_id, provider, provider_user_id, linked_at
            FROM auth_providers
            WHERE user_id = $1 AND provider = $2
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?
        .map(link_from_row)
        .transpose()
    }

    async fn upsert_provider_user_id(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO auth_providers (user_id, provider, provider_user_id, linked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, provider)
            DO UPDATE SET provider_user_id = EXCLUDED.provider_user_id,
                          linked_at = EXCLUDED.linked_at
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(provider_user_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let result = sqlx::query("DELETE FROM auth_providers WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RefreshTokenRepository for PgStore {
    async fn save(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        let row = sqlx::query_as::<_, (String, DateTime<Utc>, Option<DateTime<Utc>>)>(
            r#"
            SELECT user_id, expires_at, revoked_at
            FROM refresh_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(user_id, expires_at, revoked_at)| RefreshTokenRecord {
            token_hash: token_hash.to_string(),
            user_id,
            expires_at,
            revoked_at,
        }))
    }

    async fn revoke_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE token_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all_by_user_id(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked_at = $1
            WHERE user_id = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(now)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

pub struct PgAccountTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AccountTransaction for PgAccountTransaction {
    async fn insert_user(
        &mut self,
        user_id: &str,
        display_name: &str,
        profile_icon_code: &str,
    ) -> Result<(), DatabaseError> {
        let icon = (!profile_icon_code.is_empty()).then(|| profile_icon_code.to_string());

        sqlx::query(
            r#"
            INSERT INTO users (user_id, display_name, profile_icon_code)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(user_id)
        .bind(display_name)
        .bind(icon)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_link(
        &mut self,
        user_id: &str,
        provider: Provider,
        provider_user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO auth_providers (user_id, provider, provider_user_id, linked_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .bind(provider_user_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn AccountTransaction>, DatabaseError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAccountTransaction { tx }))
    }
}
