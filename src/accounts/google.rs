/// Google ID token verification
///
/// The production verifier asks Google's `tokeninfo` endpoint to validate
/// the token and then checks that it was minted for our web client.

use async_trait::async_trait;
use serde::Deserialize;

use crate::configuration::GoogleSettings;
use crate::error::{AccountError, AppError, ConfigError};

const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[async_trait]
pub trait GoogleIdTokenVerifier: Send + Sync {
    /// Google subject (`sub`) of a valid ID token
    async fn verify(&self, id_token: &str) -> Result<String, AppError>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    aud: String,
    #[serde(default)]
    iss: String,
    #[serde(default)]
    sub: String,
}

#[derive(Clone)]
pub struct GoogleTokenInfoVerifier {
    http_client: reqwest::Client,
    settings: GoogleSettings,
}

impl GoogleTokenInfoVerifier {
    pub fn new(settings: GoogleSettings, http_client: reqwest::Client) -> Self {
        Self {
            http_client,
            settings,
        }
    }

    fn subject_of(&self, info: TokenInfo) -> Result<String, AccountError> {
        if info.aud != self.settings.web_client_id {
            tracing::warn!("Google ID token was issued for another client");
            return Err(AccountError::GoogleIdTokenInvalid);
        }
        if !GOOGLE_ISSUERS.contains(&info.iss.as_str()) {
            tracing::warn!(iss = %info.iss, "Google ID token has an unexpected issuer");
            return Err(AccountError::GoogleIdTokenInvalid);
        }
        if info.sub.is_empty() {
            return Err(AccountError::GoogleIdTokenInvalid);
        }
        Ok(info.sub)
    }
}

#[async_trait]
impl GoogleIdTokenVerifier for GoogleTokenInfoVerifier {
    async fn verify(&self, id_token: &str) -> Result<String, AppError> {
        if self.settings.web_client_id.is_empty() {
            return Err(ConfigError::MissingRequired("google.web_client_id".to_string()).into());
        }

        // tokeninfo answers 4xx for malformed, forged or expired tokens
        let response = self
            .http_client
            .get(&self.settings.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to reach Google tokeninfo: {}", e);
                AppError::Internal(format!("Google ID token verification failed: {}", e))
            })?;

        let status = response.status();
        if status.is_client_error() {
            tracing::warn!(status = status.as_u16(), "Google rejected the ID token");
            return Err(AccountError::GoogleIdTokenInvalid.into());
        }
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "Google tokeninfo returned an error");
            return Err(AppError::Internal(format!(
                "Google tokeninfo returned {}",
                status
            )));
        }

        let info = response.json::<TokenInfo>().await.map_err(|e| {
            tracing::warn!("Unreadable tokeninfo response: {}", e);
            AppError::from(AccountError::GoogleIdTokenInvalid)
        })?;

        Ok(self.subject_of(info)?)
    }
}
