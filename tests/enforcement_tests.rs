mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::http::StatusCode;
use rolegate::{
    AppState, MemoryRepository, MemorySessionStore, create_router,
    enforce::{Decision, evaluate},
    error::StoreError,
    models::{DeniedRoute, PermissionEntry},
    reconcile::{ADMIN_ROLE, READ_ONLY_ROLE, seed_builtin_roles},
    repository::{PermissionStore, RoleDirectory, UserDirectory},
    routes,
    session::{Session, SessionStore},
};
use serde_json::json;
use tower::ServiceExt;

use common::{body_json, fast_config, get, location, login, post_json, seeded_state, session_id, user_with_role};

// --- Instrumented Permission Store ---

/// Counts lookups and can be switched to fail, slow down or stall them.
#[derive(Default)]
struct InstrumentedPermissions {
    inner: Arc<MemoryRepository>,
    reads: AtomicUsize,
    fail_reads: AtomicBool,
    stall_reads: AtomicBool,
    read_delay_ms: AtomicU64,
}

#[async_trait]
impl PermissionStore for InstrumentedPermissions {
    async fn list_permission_entries(&self) -> Result<Vec<PermissionEntry>, StoreError> {
        self.inner.list_permission_entries().await
    }

    async fn read_permission(&self, role_id: &str, route: &str) -> Result<Option<PermissionEntry>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("permission store offline".to_string()));
        }
        if self.stall_reads.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.read_permission(role_id, route).await
    }

    async fn upsert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        modified_by: &str,
    ) -> Result<PermissionEntry, StoreError> {
        self.inner.upsert_permission(role_id, route, permission, modified_by).await
    }

    async fn insert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        created_by: &str,
    ) -> Result<bool, StoreError> {
        self.inner.insert_permission(role_id, route, permission, created_by).await
    }

    async fn delete_permission(&self, id: &str) -> Result<u64, StoreError> {
        self.inner.delete_permission(id).await
    }
}

async fn instrumented_state() -> (AppState, Arc<MemoryRepository>, Arc<InstrumentedPermissions>) {
    let config = fast_config();
    let repo = Arc::new(MemoryRepository::new());
    let permissions = Arc::new(InstrumentedPermissions {
        inner: repo.clone(),
        ..Default::default()
    });

    let state = AppState {
        roles: repo.clone(),
        permissions: permissions.clone(),
        users: repo.clone(),
        sessions: Arc::new(MemorySessionStore::new(config.session_ttl)),
        registry: routes::route_registry(),
        config,
    };

    seed_builtin_roles(state.roles.as_ref()).await.unwrap();
    state.reconciler().reconcile().await.unwrap();
    (state, repo, permissions)
}

// --- Decision Function ---

#[tokio::test]
async fn test_evaluate_public_route_skips_store() {
    let (_, _, permissions) = instrumented_state().await;

    for route in ["/", "/login", "/logout", "/noauth", "/static/app.js"] {
        let decision = evaluate(permissions.as_ref(), Duration::from_secs(1), route, None)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Public);
    }
    assert_eq!(permissions.reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_evaluate_outcomes() {
    let (_, repo, permissions) = instrumented_state().await;
    let limit = Duration::from_secs(1);
    let read_only = common::role_id(&repo, READ_ONLY_ROLE).await;

    let cases = [
        ("/home", Some(read_only.as_str()), Decision::Allowed),
        ("/role/delete/{id}", Some(read_only.as_str()), Decision::Denied),
        ("/not/declared", Some(read_only.as_str()), Decision::LookupMiss),
        ("/home", Some("no-such-role"), Decision::LookupMiss),
        ("/home", Some(""), Decision::NoRole),
        ("/home", None, Decision::NoRole),
    ];

    for (route, role, expected) in cases {
        let decision = evaluate(permissions.as_ref(), limit, route, role).await.unwrap();
        assert_eq!(decision, expected, "{route} as {role:?}");
        assert_eq!(decision.is_allowed(), expected == Decision::Allowed);
    }
}

// --- Pipeline Behaviour ---

#[tokio::test]
async fn test_denied_request_redirects_and_remembers_route() {
    let (state, repo) = seeded_state(fast_config()).await;
    let sessions = state.sessions.clone();
    let app = create_router(state);
    user_with_role(&repo, "bob", READ_ONLY_ROLE).await;
    let cookie = login(&app, "bob").await;

    let response = app
        .clone()
        .oneshot(post_json("/role/create", Some(&cookie), &json!({ "name": "Sneaky" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/noauth"));
    assert!(repo.read_role_by_name("Sneaky").await.unwrap().is_none(), "handler must not run");

    let session = sessions.load(session_id(&cookie)).await.unwrap().unwrap();
    assert_eq!(session.pending_denied_route.as_deref(), Some("/role/create"));

    let response = app.oneshot(get("/noauth", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let denied: DeniedRoute = body_json(response).await;
    assert_eq!(denied.route.as_deref(), Some("/role/create"));
}

#[tokio::test]
async fn test_denied_route_records_template_not_concrete_path() {
    let (state, repo) = seeded_state(fast_config()).await;
    let sessions = state.sessions.clone();
    let app = create_router(state);
    user_with_role(&repo, "bob", READ_ONLY_ROLE).await;
    let cookie = login(&app, "bob").await;

    let response = app
        .oneshot(post_json("/role/delete/abc-123", Some(&cookie), &json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let session = sessions.load(session_id(&cookie)).await.unwrap().unwrap();
    assert_eq!(session.pending_denied_route.as_deref(), Some("/role/delete/{id}"));
}

#[tokio::test]
async fn test_login_never_touches_permission_store() {
    let (state, _, permissions) = instrumented_state().await;
    let app = create_router(state);

    let response = app.clone().oneshot(get("/login", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookie = login(&app, "carol").await;
    let response = app.clone().oneshot(get("/noauth", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(permissions.reads.load(Ordering::SeqCst), 0);

    let response = app.oneshot(get("/home", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(permissions.reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_missing_session_redirects_to_login() {
    let (state, _) = seeded_state(fast_config()).await;
    let app = create_router(state);

    for uri in ["/home", "/role/list", "/noauth"] {
        let response = app.clone().oneshot(get(uri, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{uri}");
        assert_eq!(location(&response), Some("/login"));
    }

    let response = app
        .oneshot(get("/home", Some("session=not-a-real-session")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
}

#[tokio::test]
async fn test_session_without_role_is_server_error() {
    let (state, _) = seeded_state(fast_config()).await;
    let sessions = state.sessions.clone();
    let app = create_router(state);

    let session = Session::new("ghost", None, "127.0.0.1", "localhost");
    sessions.create(&session).await.unwrap();
    let cookie = format!("session={}", session.id);

    let response = app.oneshot(get("/home", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"account has no role");
}

#[tokio::test]
async fn test_logout_sticks_while_a_request_is_in_flight() {
    let (state, _, permissions) = instrumented_state().await;
    let sessions = state.sessions.clone();
    let app = create_router(state);
    let cookie = login(&app, "erin").await;

    // Slow enough that logout lands between the session load and its write-back.
    permissions.read_delay_ms.store(100, Ordering::SeqCst);
    let in_flight = tokio::spawn(app.clone().oneshot(get("/home", Some(&cookie))));
    tokio::time::sleep(Duration::from_millis(30)).await;

    let response = app.clone().oneshot(get("/logout", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    permissions.read_delay_ms.store(0, Ordering::SeqCst);

    assert!(sessions.load(session_id(&cookie)).await.unwrap().is_none());
    let response = app.oneshot(get("/home", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), Some("/login"));
}

#[tokio::test]
async fn test_missing_entry_is_denied() {
    let (state, repo) = seeded_state(fast_config()).await;
    let app = create_router(state);

    // Created behind the reconciler's back, so its matrix row is empty.
    let auditor = repo.create_role("Auditor", "", "test").await.unwrap();
    repo.create_user("dave", Some(&auditor.id), "test").await.unwrap();
    let cookie = login(&app, "dave").await;

    let response = app.oneshot(get("/home", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(location(&response), Some("/noauth"));
}

#[tokio::test]
async fn test_allowed_requests_reach_handler() {
    let (state, repo) = seeded_state(fast_config()).await;
    let app = create_router(state);
    user_with_role(&repo, "root", ADMIN_ROLE).await;
    user_with_role(&repo, "bob", READ_ONLY_ROLE).await;
    let admin = login(&app, "root").await;
    let reader = login(&app, "bob").await;

    for uri in ["/home", "/role/list", "/user/list", "/route/list"] {
        let response = app.clone().oneshot(get(uri, Some(&admin))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "admin on {uri}");
    }

    let response = app.clone().oneshot(get("/role/list", Some(&reader))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.oneshot(get("/route/list", Some(&reader))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn test_store_failure_fails_closed() {
    let (state, _, permissions) = instrumented_state().await;
    let app = create_router(state);
    let cookie = login(&app, "erin").await;

    permissions.fail_reads.store(true, Ordering::SeqCst);
    let response = app.oneshot(get("/home", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_slow_store_times_out_as_server_error() {
    let (state, _, permissions) = instrumented_state().await;
    let app = create_router(state);
    let cookie = login(&app, "erin").await;

    permissions.stall_reads.store(true, Ordering::SeqCst);
    let response = app.oneshot(get("/home", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_permission_change_applies_to_next_request() {
    let (state, repo) = seeded_state(fast_config()).await;
    let app = create_router(state);
    user_with_role(&repo, "bob", READ_ONLY_ROLE).await;
    let cookie = login(&app, "bob").await;
    let read_only = common::role_id(&repo, READ_ONLY_ROLE).await;

    let response = app.clone().oneshot(get("/route/list", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    repo.upsert_permission(&read_only, "/route/list", true, "alice").await.unwrap();
    let response = app.oneshot(get("/route/list", Some(&cookie))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let users = repo.list_users().await.unwrap();
    assert_eq!(users.len(), 1);
}
