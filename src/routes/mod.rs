mod account;
mod health_check;
mod session;

pub use account::{create_account, deactivate_account, link_google};
pub use health_check::health_check;
pub use session::{login, logout, refresh_token, user_data};

use serde::Serialize;

use crate::auth::Claims;
use crate::error::{AppError, AuthError};

/// Success envelope: `{ "success": true, ...payload }`
#[derive(Serialize)]
pub struct Success<T: Serialize> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Success<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Subject of verified claims; a token without one is treated as invalid.
fn subject(claims: &Claims) -> Result<&str, AppError> {
    match claims.user_id() {
        "" => Err(AuthError::AccessTokenInvalid.into()),
        user_id => Ok(user_id),
    }
}
