#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, Response, header},
};
use rolegate::{
    AppConfig, AppState, MemoryRepository, MemorySessionStore,
    models::User,
    reconcile::seed_builtin_roles,
    repository::{RoleDirectory, UserDirectory},
};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

// --- State Fixtures ---

/// In-memory state with the built-in roles seeded and the matrix reconciled,
/// as it looks right after startup.
pub async fn seeded_state(config: AppConfig) -> (AppState, Arc<MemoryRepository>) {
    let repo = Arc::new(MemoryRepository::new());
    let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
    let state = AppState::new(repo.clone(), sessions, config);

    seed_builtin_roles(state.roles.as_ref()).await.unwrap();
    state.reconciler().reconcile().await.unwrap();

    (state, repo)
}

pub fn fast_config() -> AppConfig {
    AppConfig {
        store_timeout: Duration::from_millis(200),
        ..AppConfig::default()
    }
}

pub async fn role_id(repo: &MemoryRepository, name: &str) -> String {
    repo.read_role_by_name(name).await.unwrap().unwrap().id
}

/// Creates a user holding the named role, so a later login keeps it.
pub async fn user_with_role(repo: &MemoryRepository, username: &str, role_name: &str) -> User {
    let role_id = role_id(repo, role_name).await;
    repo.create_user(username, Some(&role_id), "test").await.unwrap()
}

// --- Request Helpers ---

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, cookie: Option<&str>, payload: &serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

/// Logs in through the local-mode header bypass and returns the `session=<id>` pair.
pub async fn login(app: &Router, username: &str) -> String {
    let request = Request::builder()
        .method("POST")
        .uri("/login")
        .header("x-username", username)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    assert!(response.status().is_success(), "login failed: {}", response.status());
    session_cookie(&response).expect("login did not set a session cookie")
}

pub fn session_cookie<B>(response: &Response<B>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("session="))
        .and_then(|value| value.split(';').next())
        .map(str::to_string)
}

pub fn session_id(cookie: &str) -> &str {
    cookie.trim_start_matches("session=")
}

pub fn location<B>(response: &Response<B>) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
}

pub async fn body_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
