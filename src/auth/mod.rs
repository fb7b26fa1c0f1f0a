/// Authentication module
///
/// Signed access tokens, refresh secrets, the token lifecycle service and
/// the access guard built on top of it.

mod claims;
mod clock;
mod codec;
mod guard;
mod refresh_token;
mod token_service;

pub use claims::{Claims, ISSUER, USER_SCOPE};
pub use clock::{random_bytes, Clock, ManualClock, SystemClock};
pub use codec::{decode_and_verify, encode, TokenRejection};
pub use guard::{bearer_token, AccessGuard};
pub use refresh_token::{generate_refresh_secret, hash_refresh_secret};
pub use token_service::{RefreshError, TokenPair, TokenService, TOKEN_TYPE};
