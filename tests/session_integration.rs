mod common;

use chrono::Duration;
use serde_json::{json, Value};

use common::{assert_error, spawn_app};

// --- Login state ---

#[tokio::test]
async fn login_returns_profile_for_active_user() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;
    let access_token = account["access_token"].as_str().unwrap();

    let response = app.post_json("/login", &json!({}), Some(access_token)).await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["user"]["user_id"], account["user_id"]);
    assert_eq!(body["user"]["status"], json!("ACTIVE"));
    assert_eq!(body["user"]["role"], json!("USER"));
    assert_eq!(body["user"]["profile_icon_code"], json!("0"));
    assert_eq!(body["user"]["score"], json!(0));
    assert_eq!(body["provider"]["provider"], json!("GUEST"));
    assert!(body["provider"]["provider_user_id"].is_null());
    assert!(body["expires_at"].as_i64().unwrap() > app.clock_now());
}

#[tokio::test]
async fn self_data_matches_login() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;
    let access_token = account["access_token"].as_str().unwrap();

    let response = app.post_json("/self-data", &json!({}), Some(access_token)).await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user"]["user_id"], account["user_id"]);
}

#[tokio::test]
async fn login_accepts_access_token_in_body() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;

    let response = app
        .post_json("/login", &json!({ "access_token": account["access_token"] }), None)
        .await;

    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn header_token_takes_precedence_over_body() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;

    let response = app
        .post_json(
            "/login",
            &json!({ "access_token": account["access_token"] }),
            Some("not-a-token"),
        )
        .await;

    assert_error(response, 401, "ACCESS_TOKEN_INVALID").await;
}

#[tokio::test]
async fn login_rejects_pending_user() {
    let app = spawn_app().await;
    let account = app.create_guest().await;
    let access_token = account["access_token"].as_str().unwrap();

    let response = app.post_json("/login", &json!({}), Some(access_token)).await;

    assert_error(response, 403, "USER_NOT_ACTIVE").await;
}

#[tokio::test]
async fn login_without_token_asks_for_refresh() {
    let app = spawn_app().await;

    let response = app.post_json("/login", &json!({}), None).await;

    let body = assert_error(response, 401, "ACCESS_TOKEN_INVALID").await;
    assert_eq!(body["retry_with_refresh"], json!(true));
}

#[tokio::test]
async fn expired_access_token_is_reported_as_expired() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;
    let access_token = account["access_token"].as_str().unwrap();

    app.clock.advance(Duration::seconds(3600));
    let response = app.post_json("/login", &json!({}), Some(access_token)).await;

    let body = assert_error(response, 401, "ACCESS_TOKEN_EXPIRED").await;
    assert_eq!(body["retry_with_refresh"], json!(true));
}

#[tokio::test]
async fn tampered_access_token_is_invalid() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;
    let parts: Vec<&str> = account["access_token"].as_str().unwrap().split('.').collect();
    let signature = parts[2];
    let flipped = if signature.starts_with('A') { 'B' } else { 'A' };
    let access_token = format!("{}.{}.{}{}", parts[0], parts[1], flipped, &signature[1..]);

    let response = app.post_json("/login", &json!({}), Some(access_token.as_str())).await;

    assert_error(response, 401, "ACCESS_TOKEN_INVALID").await;
}

// --- Profile lookup ---

#[tokio::test]
async fn user_data_returns_another_users_profile() {
    let app = spawn_app().await;
    let caller = app.create_active_guest().await;
    let target = app.create_guest().await;

    let response = app
        .post_json(
            "/user-data",
            &json!({ "user_id": target["user_id"] }),
            caller["access_token"].as_str(),
        )
        .await;

    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["user"]["user_id"], target["user_id"]);
    assert_eq!(body["user"]["status"], json!("PENDING"));
    assert_eq!(body["user"]["score"], json!(0));
    assert!(body["user"]["display_name"].as_str().unwrap().starts_with("user-"));
}

#[tokio::test]
async fn user_data_requires_a_user_id() {
    let app = spawn_app().await;
    let caller = app.create_active_guest().await;
    let token = caller["access_token"].as_str();

    for body in [json!({}), json!({ "user_id": "  " }), json!({ "user_id": 7 })] {
        let response = app.post_json("/user-data", &body, token).await;
        assert_error(response, 400, "INVALID_USER_ID").await;
    }
}

#[tokio::test]
async fn user_data_for_unknown_user_is_not_found() {
    let app = spawn_app().await;
    let caller = app.create_active_guest().await;

    let response = app
        .post_json(
            "/user-data",
            &json!({ "user_id": "00000000-0000-0000-0000-000000000000" }),
            caller["access_token"].as_str(),
        )
        .await;

    assert_error(response, 404, "USER_NOT_FOUND").await;
}

#[tokio::test]
async fn user_data_requires_access_token() {
    let app = spawn_app().await;
    let target = app.create_guest().await;

    let response = app
        .post_json("/user-data", &json!({ "user_id": target["user_id"] }), None)
        .await;

    assert_error(response, 401, "ACCESS_TOKEN_INVALID").await;
}

// --- Malformed bodies ---

#[tokio::test]
async fn malformed_refresh_body_is_invalid_json() {
    let app = spawn_app().await;

    let response = app.post_raw("/refresh-token", "{not json", None).await;

    let body = assert_error(response, 400, "INVALID_JSON").await;
    assert!(body.get("retry_with_refresh").is_none());
}

#[tokio::test]
async fn malformed_body_on_guarded_route_is_invalid_json() {
    let app = spawn_app().await;
    let caller = app.create_active_guest().await;

    let response = app
        .post_raw("/user-data", "{not json", caller["access_token"].as_str())
        .await;

    assert_error(response, 400, "INVALID_JSON").await;
}

// --- Refresh rotation ---

#[tokio::test]
async fn refresh_rotates_and_old_secret_is_revoked() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;
    let first_secret = account["refresh_token"].as_str().unwrap();

    let response = app.refresh(first_secret).await;
    assert_eq!(200, response.status().as_u16());
    let rotated: Value = response.json().await.unwrap();
    assert_eq!(rotated["success"], json!(true));
    assert_eq!(rotated["token_type"], json!("Bearer"));
    assert_eq!(rotated["expires_in"], json!(3600));
    let second_secret = rotated["refresh_token"].as_str().unwrap();
    assert_ne!(first_secret, second_secret);

    assert_error(app.refresh(first_secret).await, 401, "REFRESH_TOKEN_REVOKED").await;

    let response = app.refresh(second_secret).await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn rotated_access_token_is_usable() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;

    let rotated: Value = app
        .refresh(account["refresh_token"].as_str().unwrap())
        .await
        .json()
        .await
        .unwrap();

    let response = app
        .post_json("/login", &json!({}), rotated["access_token"].as_str())
        .await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn refresh_requires_a_secret() {
    let app = spawn_app().await;

    assert_error(app.refresh("   ").await, 400, "INVALID_REFRESH_TOKEN").await;

    let response = app.post_json("/refresh-token", &json!({}), None).await;
    assert_error(response, 400, "INVALID_REFRESH_TOKEN").await;
}

#[tokio::test]
async fn unknown_refresh_secret_is_invalid() {
    let app = spawn_app().await;

    let body = assert_error(app.refresh("never-issued").await, 401, "INVALID_REFRESH_TOKEN").await;
    assert!(body.get("retry_with_refresh").is_none());
}

#[tokio::test]
async fn refresh_secret_expires_after_its_lifetime() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;

    app.clock.advance(Duration::days(14));

    assert_error(
        app.refresh(account["refresh_token"].as_str().unwrap()).await,
        401,
        "REFRESH_TOKEN_EXPIRED",
    )
    .await;
}

// --- Logout ---

#[tokio::test]
async fn logout_revokes_every_refresh_token() {
    let app = spawn_app().await;
    let account = app.create_active_guest().await;
    let access_token = account["access_token"].as_str().unwrap();
    let first_secret = account["refresh_token"].as_str().unwrap();

    let rotated: Value = app.refresh(first_secret).await.json().await.unwrap();
    let second_secret = rotated["refresh_token"].as_str().unwrap();

    let response = app.post_json("/logout", &json!({}), Some(access_token)).await;
    assert_eq!(200, response.status().as_u16());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));

    assert_error(app.refresh(second_secret).await, 401, "REFRESH_TOKEN_REVOKED").await;

    // the access token itself lives until it expires
    let response = app.post_json("/login", &json!({}), Some(access_token)).await;
    assert_eq!(200, response.status().as_u16());
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(&format!("{}/health_check", app.address))
        .send()
        .await
        .expect("Failed to execute request.");

    assert!(response.status().is_success());
    assert!(response.headers().get("x-request-id").is_some());
}
