use std::sync::Arc;

use crate::accounts::models::{User, UserStatus};
use crate::error::{AccountError, AppError, DatabaseError};
use crate::repository::UserRepository;

pub struct UserService {
    users: Arc<dyn UserRepository>,
}

impl UserService {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }

    pub async fn find_by_id(&self, user_id: &str) -> Result<Option<User>, DatabaseError> {
        self.users.find_by_id(user_id).await
    }

    /// The user, provided it exists and is ACTIVE
    pub async fn require_active(&self, user_id: &str) -> Result<User, AppError> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(AccountError::UserNotFound)?;
        if !user.is_active() {
            return Err(AccountError::UserNotActive.into());
        }
        Ok(user)
    }

    /// Sets the user INACTIVE.
    ///
    /// `None` when the user does not exist, otherwise whether it was not
    /// ACTIVE before the call (PENDING and BLOCKED users count as already
    /// inactive).
    pub async fn deactivate(&self, user_id: &str) -> Result<Option<bool>, DatabaseError> {
        let user = match self.users.find_by_id(user_id).await? {
            Some(user) => user,
            None => return Ok(None),
        };
        let already_inactive = !user.is_active();
        if user.status == UserStatus::Inactive {
            return Ok(Some(already_inactive));
        }

        if !self.users.update_status(user_id, UserStatus::Inactive).await? {
            return Ok(None);
        }
        tracing::info!(user_id = %user_id, previous_status = %user.status, "User deactivated");
        Ok(Some(already_inactive))
    }
}
