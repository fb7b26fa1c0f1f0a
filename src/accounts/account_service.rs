/// Account resolution
///
/// Maps an external identity to exactly one internal user, creating the
/// user and its provider link together when none exists yet.

use std::sync::Arc;
use uuid::Uuid;

use crate::accounts::models::{AuthProviderLink, Provider, User};
use crate::auth::Clock;
use crate::error::{AccountError, AppError, DatabaseError, ValidationError};
use crate::repository::{AccountStore, AccountTransaction, AuthProviderRepository, UserRepository};

const DISPLAY_NAME_PREFIX: &str = "user-";
const DISPLAY_NAME_ATTEMPTS: usize = 5;
pub const DEFAULT_ICON_CODE: &str = "0";
pub const MAX_PROVIDER_USER_ID_CHARS: usize = 255;

#[derive(Debug, Clone)]
pub struct ResolvedAccount {
    pub created: bool,
    pub user: User,
}

#[derive(Debug, Clone)]
pub struct LinkedProvider {
    pub previous_provider_user_id: Option<String>,
    pub link: AuthProviderLink,
}

/// Non-empty and at most 255 characters
pub fn validate_provider_user_id(provider_user_id: &str) -> Result<&str, ValidationError> {
    let trimmed = provider_user_id.trim();
    if trimmed.is_empty() || trimmed.chars().count() > MAX_PROVIDER_USER_ID_CHARS {
        return Err(ValidationError::InvalidProviderUserId);
    }
    Ok(trimmed)
}

/// `user-` followed by 12 hex characters
pub fn generate_display_name() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}{}", DISPLAY_NAME_PREFIX, &hex[..12])
}

pub struct AccountService {
    users: Arc<dyn UserRepository>,
    links: Arc<dyn AuthProviderRepository>,
    store: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl AccountService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        links: Arc<dyn AuthProviderRepository>,
        store: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            links,
            store,
            clock,
        }
    }

    /// A generated display name not yet taken by anyone
    pub async fn available_display_name(&self) -> Result<String, AppError> {
        for _ in 0..DISPLAY_NAME_ATTEMPTS {
            let candidate = generate_display_name();
            if self.users.find_by_display_name(&candidate).await?.is_none() {
                return Ok(candidate);
            }
        }
        Err(AppError::Internal(
            "Could not generate an unused display name".to_string(),
        ))
    }

    /// Find the user linked to `(provider, provider_user_id)` or create one.
    ///
    /// An empty `provider_user_id` counts as absent; such identities (GUEST)
    /// are never looked up, so every call creates a new user.
    pub async fn resolve_or_create(
        &self,
        provider: Provider,
        provider_user_id: Option<&str>,
        display_name: &str,
        icon_code: &str,
    ) -> Result<ResolvedAccount, AppError> {
        let provider_user_id = provider_user_id.filter(|id| !id.is_empty());

        if let Some(pid) = provider_user_id {
            if let Some(user) = self.find_linked_user(provider, pid).await? {
                return Ok(ResolvedAccount {
                    created: false,
                    user,
                });
            }
        }

        let user_id = Uuid::new_v4().to_string();
        if let Err(e) = self
            .create(&user_id, provider, provider_user_id, display_name, icon_code)
            .await
        {
            // Lost a creation race: the other request's user is the answer.
            if let (true, Some(pid)) = (e.is_unique_violation(), provider_user_id) {
                if let Some(user) = self.find_linked_user(provider, pid).await? {
                    tracing::info!(
                        provider = %provider,
                        user_id = %user.user_id,
                        "Concurrent account creation resolved to existing user"
                    );
                    return Ok(ResolvedAccount {
                        created: false,
                        user,
                    });
                }
            }
            return Err(e.into());
        }

        let user = self.users.find_by_id(&user_id).await?.ok_or_else(|| {
            AccountError::DataIntegrity(format!("user {} missing right after creation", user_id))
        })?;

        tracing::info!(provider = %provider, user_id = %user_id, "Account created");

        Ok(ResolvedAccount {
            created: true,
            user,
        })
    }

    /// Most recently linked provider of the user
    pub async fn latest_link(&self, user_id: &str) -> Result<Option<AuthProviderLink>, AppError> {
        Ok(self.links.find_by_user_id(user_id).await?)
    }

    /// Point the user's GOOGLE link at `provider_user_id`, stamping `linked_at`.
    ///
    /// A Google subject owned by a different user is refused.
    pub async fn link_google(
        &self,
        user_id: &str,
        provider_user_id: &str,
    ) -> Result<LinkedProvider, AppError> {
        let provider_user_id = validate_provider_user_id(provider_user_id)?;

        if let Some(owner) = self.links.find_user_id(Provider::Google, provider_user_id).await? {
            if owner != user_id {
                tracing::warn!(user_id = %user_id, "Google account already linked to another user");
                return Err(AccountError::GoogleAccountAlreadyLinked.into());
            }
        }

        let previous_provider_user_id = self
            .links
            .find_by_user_id_and_provider(user_id, Provider::Google)
            .await?
            .and_then(|link| link.provider_user_id);

        self.links
            .upsert_provider_user_id(user_id, Provider::Google, provider_user_id, self.clock.now())
            .await
            .map_err(|e| -> AppError {
                if e.is_unique_violation() {
                    AccountError::GoogleAccountAlreadyLinked.into()
                } else {
                    e.into()
                }
            })?;

        let link = self
            .links
            .find_by_user_id_and_provider(user_id, Provider::Google)
            .await?
            .ok_or_else(|| {
                AccountError::DataIntegrity(format!("GOOGLE link of user {} vanished after upsert", user_id))
            })?;

        tracing::info!(user_id = %user_id, relinked = previous_provider_user_id.is_some(), "Google account linked");

        Ok(LinkedProvider {
            previous_provider_user_id,
            link,
        })
    }

    async fn find_linked_user(
        &self,
        provider: Provider,
        provider_user_id: &str,
    ) -> Result<Option<User>, AppError> {
        let user_id = match self.links.find_user_id(provider, provider_user_id).await? {
            Some(user_id) => user_id,
            None => return Ok(None),
        };

        match self.users.find_by_id(&user_id).await? {
            Some(user) => Ok(Some(user)),
            None => {
                tracing::error!(
                    provider = %provider,
                    user_id = %user_id,
                    "Provider link references a missing user"
                );
                Err(AccountError::DataIntegrity(format!(
                    "auth provider link for user {} has no user row",
                    user_id
                ))
                .into())
            }
        }
    }

    /// User row and provider link in one transaction; rolled back on any failure
    async fn create(
        &self,
        user_id: &str,
        provider: Provider,
        provider_user_id: Option<&str>,
        display_name: &str,
        icon_code: &str,
    ) -> Result<(), DatabaseError> {
        let mut tx = self.store.begin().await?;

        if let Err(e) = tx.insert_user(user_id, display_name, icon_code).await {
            return Err(abort(tx, e).await);
        }
        if let Err(e) = tx
            .insert_link(user_id, provider, provider_user_id, self.clock.now())
            .await
        {
            return Err(abort(tx, e).await);
        }

        tx.commit().await
    }
}

async fn abort(tx: Box<dyn AccountTransaction>, err: DatabaseError) -> DatabaseError {
    if let Err(rollback_err) = tx.rollback().await {
        tracing::error!(error = %rollback_err, "Rollback of account creation failed");
    }
    err
}
