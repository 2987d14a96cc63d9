//! End-to-end session lifecycle tests against a mock platform API.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use blocktrade_client::models::{LoginRequest, Permission};
use blocktrade_client::{
    ApiClient, ClientConfig, SecureStore, SessionEvent, SessionManager, TokenStore,
};

fn test_config(server_uri: &str, dir: &TempDir) -> ClientConfig {
    ClientConfig {
        base_url: server_uri.to_string(),
        retry_base_delay_ms: 5,
        storage_dir: dir.path().to_path_buf(),
        ..ClientConfig::default()
    }
}

fn build_session(config: &ClientConfig) -> (Arc<SessionManager>, Arc<TokenStore>) {
    let store = Arc::new(
        SecureStore::new(config.storage_dir.clone(), config.storage_passphrase.clone()).unwrap(),
    );
    let tokens = Arc::new(TokenStore::new(Arc::clone(&store), config.session_duration()));
    let api = Arc::new(ApiClient::new(config, Arc::clone(&tokens)).unwrap());
    (SessionManager::new(config, api, Arc::clone(&tokens), store), tokens)
}

fn make_token(exp_offset_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let exp = Utc::now().timestamp() + exp_offset_secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u-1","exp":{}}}"#, exp));
    format!("{}.{}.sig", header, payload)
}

fn login_body(access_token: &str) -> serde_json::Value {
    json!({
        "success": true,
        "data": {
            "user": {
                "id": "u-1",
                "username": "mkhan",
                "email": "m.khan@example.com",
                "firstName": "Mina",
                "lastName": "Khan",
                "role": "bank_officer",
                "organizationId": "org-9",
                "organizationName": "First Meridian Bank",
                "organizationType": "bank",
                "permissions": ["lc:view", "lc:approve"],
                "isActive": true,
                "emailVerified": true,
                "mfaEnabled": false,
                "createdAt": "2024-01-10T09:00:00Z",
                "updatedAt": "2024-06-01T12:30:00Z"
            },
            "tokens": {
                "accessToken": access_token,
                "refreshToken": "refresh-1",
                "expiresIn": 1800
            }
        }
    })
}

fn credentials() -> LoginRequest {
    LoginRequest {
        username: "mkhan".to_string(),
        password: "hunter2!".to_string(),
        mfa_code: None,
        remember_me: None,
    }
}

#[tokio::test]
async fn login_publishes_state_and_persists_the_session() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir);
    let (session, tokens) = build_session(&config);

    let access = make_token(3600);
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_partial_json(json!({"username": "mkhan"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&access)))
        .expect(1)
        .mount(&server)
        .await;

    let payload = session.login(&credentials()).await.unwrap();
    assert_eq!(payload.user.username, "mkhan");

    assert!(session.is_authenticated());
    assert!(session.has_permission(Permission::LcApprove));
    assert_eq!(tokens.get_token().as_deref(), Some(access.as_str()));
    session.dispose();

    // A second process sees the persisted session
    let (restored, _) = build_session(&config);
    restored.init().unwrap();
    assert!(restored.is_authenticated());
    assert_eq!(
        restored.current_user().map(|u| u.username),
        Some("mkhan".to_string())
    );
    restored.dispose();
}

#[tokio::test]
async fn failed_login_leaves_no_session_behind() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir);
    let (session, tokens) = build_session(&config);

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    assert!(session.login(&credentials()).await.is_err());
    assert!(!session.is_authenticated());
    assert!(session.current_user().is_none());
    assert!(tokens.get_token().is_none());
    session.dispose();
}

#[tokio::test]
async fn logout_clears_locally_even_when_the_server_fails() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir);
    let (session, tokens) = build_session(&config);

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&make_token(3600))))
        .mount(&server)
        .await;
    // 5xx on logout gets the usual retry treatment, then is swallowed
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    session.login(&credentials()).await.unwrap();
    let mut events = session.subscribe_events();

    session.logout().await.unwrap();
    assert!(!session.is_authenticated());
    assert!(session.current_user().is_none());
    assert!(tokens.get_token().is_none());
    assert!(tokens.get_refresh_token().is_none());
    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
    session.dispose();

    // The persisted copies are gone too
    let (fresh, fresh_tokens) = build_session(&config);
    fresh.init().unwrap();
    assert!(!fresh.is_authenticated());
    assert!(fresh_tokens.get_token().is_none());
    fresh.dispose();
}

#[tokio::test]
async fn refresh_failure_forces_logout() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir);
    let (session, tokens) = build_session(&config);

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&make_token(3600))))
        .mount(&server)
        .await;
    // The refresh token was revoked server-side
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    session.login(&credentials()).await.unwrap();
    let mut events = session.subscribe_events();

    assert!(session.refresh_token().await.is_err());
    assert!(!session.is_authenticated());
    assert!(tokens.get_token().is_none());
    assert_eq!(
        events.recv().await.unwrap(),
        SessionEvent::ForcedLogout {
            reason: "Session expired".to_string()
        }
    );
    session.dispose();
}

#[tokio::test]
async fn successful_refresh_rotates_the_token_pair() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir);
    let (session, tokens) = build_session(&config);

    let rotated = make_token(3600);
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&make_token(3600))))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(json!({"refreshToken": "refresh-1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {
                "tokens": {
                    "accessToken": rotated,
                    "refreshToken": "refresh-2",
                    "expiresIn": 1800
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    session.login(&credentials()).await.unwrap();
    let new_tokens = session.refresh_token().await.unwrap();

    assert_eq!(new_tokens.access_token, rotated);
    assert_eq!(tokens.get_token().as_deref(), Some(rotated.as_str()));
    assert_eq!(tokens.get_refresh_token().as_deref(), Some("refresh-2"));
    assert!(session.is_authenticated());
    session.dispose();
}

#[tokio::test]
async fn fetch_current_user_republishes_the_profile() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let config = test_config(&server.uri(), &dir);
    let (session, _) = build_session(&config);

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&make_token(3600))))
        .mount(&server)
        .await;

    // The server-side profile has gained a permission since login
    let mut body = login_body("unused");
    let mut user = body["data"]["user"].take();
    user["permissions"] = json!(["lc:view", "lc:approve", "document:upload"]);
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": user
        })))
        .expect(1)
        .mount(&server)
        .await;

    session.login(&credentials()).await.unwrap();
    assert!(!session.has_permission(Permission::DocumentUpload));

    let user = session.fetch_current_user().await.unwrap();
    assert_eq!(user.username, "mkhan");
    assert!(session.has_permission(Permission::DocumentUpload));
    session.dispose();
}
