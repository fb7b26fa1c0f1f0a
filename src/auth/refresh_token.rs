/// Refresh token secrets
///
/// Refresh tokens are:
/// - 32 bytes from the OS CSPRNG, base64url encoded (43 characters)
/// - Hashed with SHA-256 before storage (the plaintext is only ever returned to the client)
/// - Single-use: redeeming one revokes it (rotation)

use sha2::{Digest, Sha256};

use crate::auth::clock::random_bytes;
use crate::auth::codec::b64url_encode;

const REFRESH_SECRET_BYTES: usize = 32;

/// Generate a new plaintext refresh secret
pub fn generate_refresh_secret() -> String {
    b64url_encode(&random_bytes(REFRESH_SECRET_BYTES))
}

/// SHA-256 hex digest of a refresh secret
pub fn hash_refresh_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}
