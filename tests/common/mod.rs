//! Test server wired to the in-memory store and a controllable clock

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::net::TcpListener;
use std::sync::Arc;

use omok_auth::accounts::{GoogleIdTokenVerifier, UserStatus};
use omok_auth::auth::{Clock, ManualClock};
use omok_auth::configuration::JwtSettings;
use omok_auth::error::{AccountError, AppError};
use omok_auth::repository::{InMemoryStore, UserRepository};
use omok_auth::startup::{run, AppServices};

pub const TEST_SECRET: &str = "integration-test-secret-key-0123456789";

/// Accepts `valid:<subject>` and rejects everything else
pub struct StubGoogleVerifier;

#[async_trait]
impl GoogleIdTokenVerifier for StubGoogleVerifier {
    async fn verify(&self, id_token: &str) -> Result<String, AppError> {
        match id_token.strip_prefix("valid:") {
            Some(subject) if !subject.is_empty() => Ok(subject.to_string()),
            _ => Err(AccountError::GoogleIdTokenInvalid.into()),
        }
    }
}

pub struct TestApp {
    pub address: String,
    pub store: InMemoryStore,
    pub clock: Arc<ManualClock>,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with_verifier(Arc::new(StubGoogleVerifier)).await
}

pub async fn spawn_app_with_verifier(google: Arc<dyn GoogleIdTokenVerifier>) -> TestApp {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    let store = InMemoryStore::new();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let services = AppServices::new(
        store.clone(),
        JwtSettings::new(TEST_SECRET),
        google,
        clock.clone(),
    );

    let server = run(listener, services).expect("Failed to bind address");
    let _ = tokio::spawn(server);

    TestApp {
        address,
        store,
        clock,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub async fn post_json(&self, path: &str, body: &Value, bearer: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(&format!("{}{}", self.address, path))
            .json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Failed to execute request.")
    }

    /// Sends `body` verbatim, labelled as JSON
    pub async fn post_raw(&self, path: &str, body: &'static str, bearer: Option<&str>) -> reqwest::Response {
        let mut request = self
            .client
            .post(&format!("{}{}", self.address, path))
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("Failed to execute request.")
    }

    pub async fn create_account(&self, body: Value) -> reqwest::Response {
        self.post_json("/create-account", &body, None).await
    }

    /// Creates a GUEST account and returns its response body
    pub async fn create_guest(&self) -> Value {
        let response = self.create_account(json!({ "provider": "GUEST" })).await;
        assert_eq!(201, response.status().as_u16());
        response.json().await.expect("Failed to parse response")
    }

    /// Creates a GUEST account, marks it ACTIVE and returns its response body
    pub async fn create_active_guest(&self) -> Value {
        let body = self.create_guest().await;
        self.activate(body["user_id"].as_str().unwrap()).await;
        body
    }

    pub async fn activate(&self, user_id: &str) {
        let updated = self
            .store
            .update_status(user_id, UserStatus::Active)
            .await
            .expect("Failed to update status");
        assert!(updated);
    }

    pub fn clock_now(&self) -> i64 {
        self.clock.now().timestamp()
    }

    pub async fn refresh(&self, refresh_token: &str) -> reqwest::Response {
        self.post_json("/refresh-token", &json!({ "refresh_token": refresh_token }), None)
            .await
    }
}

/// Asserts the failure envelope and returns the parsed body
pub async fn assert_error(response: reqwest::Response, status: u16, code: &str) -> Value {
    assert_eq!(status, response.status().as_u16());
    let body: Value = response.json().await.expect("Failed to parse response");
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["error"], json!(code));
    assert!(body["message"].is_string());
    assert!(body["error_id"].is_string());
    body
}
