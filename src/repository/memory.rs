//! In-process store with the same constraints as the SQL schema:
//! unique user id and display name, one link per `(user_id, provider)`,
//! one owner per `(provider, provider_user_id)`, unique token hash.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    AccountStore, AccountTransaction, AuthProviderRepository, RefreshTokenRecord,
    RefreshTokenRepository, UserRepository,
};
use crate::accounts::{AuthProviderLink, Provider, Role, User, UserStatus};
use crate::error::DatabaseError;

#[derive(Debug, Default)]
struct State {
    users: HashMap<String, User>,
    links: Vec<AuthProviderLink>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

impl State {
    fn check_user(&self, user: &User) -> Result<(), DatabaseError> {
        if self.users.contains_key(&user.user_id) {
            return Err(DatabaseError::UniqueConstraintViolation("users_pkey".to_string()));
        }
        if self.users.values().any(|u| u.display_name == user.display_name) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "users_display_name_key".to_string(),
            ));
        }
        Ok(())
    }

    /// Uniqueness is checked before the foreign key.
    fn check_link(&self, link: &AuthProviderLink) -> Result<(), DatabaseError> {
        if self
            .links
            .iter()
            .any(|l| l.user_id == link.user_id && l.provider == link.provider)
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "auth_providers_pkey".to_string(),
            ));
        }
        if link.provider_user_id.is_some()
            && self.links.iter().any(|l| {
                l.provider == link.provider && l.provider_user_id == link.provider_user_id
            })
        {
            return Err(DatabaseError::UniqueConstraintViolation(
                "auth_providers_provider_provider_user_id_key".to_string(),
            ));
        }
        if !self.users.contains_key(&link.user_id) {
            return Err(DatabaseError::QueryExecution(
                "auth_providers_user_id_fkey violated".to_string(),
            ));
        }
        Ok(())
    }
}

/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite a user's score; ranking updates come from outside this service.
    pub fn set_score(&self, user_id: &str, score: i64) -> bool {
        match self.lock().users.get_mut(user_id) {
            Some(user) => {
                user.score = score;
                true
            }
            None => false,
        }
    }

    pub fn set_role(&self, user_id: &str, role: Role) -> bool {
        match self.lock().users.get_mut(user_id) {
            Some(user) => {
                user.role = role;
                true
            }
            None => false,
        }
    }

    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    pub fn refresh_tokens_for(&self, user_id: &str) -> Vec<RefreshTokenRecord> {
        self.lock()
            .refresh_tokens
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UserRepository for InMemoryStore {
    async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DatabaseError> {
        Ok(self.lock().users.get(user_id).cloned())
    }

    async fn find_by_display_name(&self, display_name: &str) -> Result<Option<User>, DatabaseError> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.display_name == display_name)
            .cloned())
    }

    async fn update_status(&self, user_id: &str, status: UserStatus) -> Result<bool, DatabaseError> {
        match self.lock().users.get_mut(user_id) {
            Some(user) => {
                user.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_top_by_score(&self, limit: i64, status: UserStatus) -> Result<Vec<User>, DatabaseError> {
        let mut users: Vec<User> = self
            .lock()
            .users
            .values()
            .filter(|u| u.status == status)
            .cloned()
            .collect();
        users.sort_by(|a, b| b.score.cmp(&a.score));
        users.truncate(limit.max(0) as usize);
        Ok(users)
    }
}

#[async_trait]
impl AuthProviderRepository for InMemoryStore {
    async fn find_user_id(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .lock()
            .links
            .iter()
            .filter(|l| l.provider == provider && l.provider_user_id.as_deref() == Some(provider_user_id))
            .max_by_key(|l| l.linked_at)
            .map(|l| l.user_id.clone()))
    }

    async fn find_by_user_id(&self, user_id: &str) -> Result<Option<AuthProviderLink>, DatabaseError> {
        Ok(self
            .lock()
            .links
            .iter()
            .filter(|l| l.user_id == user_id)
            .max_by_key(|l| l.linked_at)
            .cloned())
    }

    async fn find_by_user_id_and_provider(
        &self,
        user_id: &str,
        provider: Provider,
    ) -> Result<Option<AuthProviderLink>, DatabaseError> {
        Ok(self
            .lock()
            .links
            .iter()
            .find(|l| l.user_id == user_id && l.provider == provider)
            .cloned())
    }

    async fn upsert_provider_user_id(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.lock();

        let taken = state.links.iter().any(|l| {
            l.provider == provider
                && l.provider_user_id.as_deref() == Some(provider_user_id)
                && l.user_id != user_id
        });
        if taken {
            return Err(DatabaseError::UniqueConstraintViolation(
                "auth_providers_provider_provider_user_id_key".to_string(),
            ));
        }

        if let Some(link) = state
            .links
            .iter_mut()
            .find(|l| l.user_id == user_id && l.provider == provider)
        {
            link.provider_user_id = Some(provider_user_id.to_string());
            link.linked_at = now;
            return Ok(());
        }

        let link = AuthProviderLink {
            user_id: user_id.to_string(),
            provider,
            provider_user_id: Some(provider_user_id.to_string()),
            linked_at: now,
        };
        state.check_link(&link)?;
        state.links.push(link);
        Ok(())
    }

    async fn delete_by_user_id(&self, user_id: &str) -> Result<u64, DatabaseError> {
        let mut state = self.lock();
        let before = state.links.len();
        state.links.retain(|l| l.user_id != user_id);
        Ok((before - state.links.len()) as u64)
    }
}

#[async_trait]
impl RefreshTokenRepository for InMemoryStore {
    async fn save(
        &self,
        user_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.lock();
        if state.refresh_tokens.contains_key(token_hash) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "refresh_tokens_token_hash_key".to_string(),
            ));
        }
        state.refresh_tokens.insert(
            token_hash.to_string(),
            RefreshTokenRecord {
                token_hash: token_hash.to_string(),
                user_id: user_id.to_string(),
                expires_at,
                revoked_at: None,
            },
        );
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, DatabaseError> {
        Ok(self.lock().refresh_tokens.get(token_hash).cloned())
    }

    async fn revoke_by_hash(&self, token_hash: &str, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        match self.lock().refresh_tokens.get_mut(token_hash) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_by_user_id(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut revoked = 0;
        for record in self.lock().refresh_tokens.values_mut() {
            if record.user_id == user_id && record.revoked_at.is_none() {
                record.revoked_at = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }
}

/// Buffers writes and applies them under one lock on commit, re-checking
/// constraints against whatever committed in the meantime.
struct MemoryAccountTransaction {
    state: Arc<Mutex<State>>,
    users: Vec<User>,
    links: Vec<AuthProviderLink>,
}

impl MemoryAccountTransaction {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AccountTransaction for MemoryAccountTransaction {
    async fn insert_user(
        &mut self,
        user_id: &str,
        display_name: &str,
        profile_icon_code: &str,
    ) -> Result<(), DatabaseError> {
        let user = User {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            profile_icon_code: (!profile_icon_code.is_empty()).then(|| profile_icon_code.to_string()),
            role: Role::default(),
            status: UserStatus::default(),
            score: 0,
        };

        self.lock().check_user(&user)?;
        if self
            .users
            .iter()
            .any(|u| u.user_id == user.user_id || u.display_name == user.display_name)
        {
            return Err(DatabaseError::UniqueConstraintViolation("users_pkey".to_string()));
        }

        self.users.push(user);
        Ok(())
    }

    async fn insert_link(
        &mut self,
        user_id: &str,
        provider: Provider,
        provider_user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let link = AuthProviderLink {
            user_id: user_id.to_string(),
            provider,
            provider_user_id: provider_user_id.map(str::to_string),
            linked_at: now,
        };

        let pending_user = self.users.iter().any(|u| u.user_id == link.user_id);
        {
            let state = self.lock();
            match state.check_link(&link) {
                // the owning user may only exist inside this transaction so far
                Err(DatabaseError::QueryExecution(_)) if pending_user => {}
                other => other?,
            }
        }
        if self.links.iter().any(|l| {
            (l.user_id == link.user_id && l.provider == link.provider)
                || (link.provider_user_id.is_some()
                    && l.provider == link.provider
                    && l.provider_user_id == link.provider_user_id)
        }) {
            return Err(DatabaseError::UniqueConstraintViolation(
                "auth_providers_pkey".to_string(),
            ));
        }

        self.links.push(link);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        let this = *self;
        let mut state = this.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        for user in &this.users {
            state.check_user(user)?;
        }
        // validate links against the post-commit user set without mutating yet
        let mut staged = State {
            users: state.users.clone(),
            links: state.links.clone(),
            refresh_tokens: HashMap::new(),
        };
        for user in &this.users {
            staged.users.insert(user.user_id.clone(), user.clone());
        }
        for link in &this.links {
            staged.check_link(link)?;
            staged.links.push(link.clone());
        }

        state.users = staged.users;
        state.links = staged.links;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

#[async_trait]
impl AccountStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn AccountTransaction>, DatabaseError> {
        Ok(Box::new(MemoryAccountTransaction {
            state: Arc::clone(&self.state),
            users: Vec::new(),
            links: Vec::new(),
        }))
    }
}
