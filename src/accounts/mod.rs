/// Accounts module
///
/// Users, their provider links and the services that create, look up and
/// deactivate them.

mod account_service;
mod google;
mod models;
mod user_service;

pub use account_service::{
    generate_display_name, validate_provider_user_id, AccountService, LinkedProvider,
    ResolvedAccount, DEFAULT_ICON_CODE, MAX_PROVIDER_USER_ID_CHARS,
};
pub use google::{GoogleIdTokenVerifier, GoogleTokenInfoVerifier};
pub use models::{AuthProviderLink, Provider, Role, User, UserStatus};
pub use user_service::UserService;
