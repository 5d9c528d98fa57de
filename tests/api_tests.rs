use rolegate::{
    AppConfig, AppState, create_router,
    models::{DeniedRoute, Profile},
    reconcile::seed_builtin_roles,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;

#[derive(Debug)]
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

async fn spawn_app() -> TestApp {
    let state = AppState::in_memory(AppConfig::default());
    seed_builtin_roles(state.roles.as_ref()).await.unwrap();
    state.reconciler().reconcile().await.unwrap();
    let router = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    // Redirects are part of what we assert on, so never follow them.
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    TestApp { address, client }
}

impl TestApp {
    async fn login(&self, username: &str) -> String {
        let response = self
            .client
            .post(format!("{}/login", self.address))
            .header("x-username", username)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        response
            .headers()
            .get("set-cookie")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .unwrap()
            .to_string()
    }
}

#[tokio::test]
async fn test_health_carries_request_id_and_security_headers() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "DENY");
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = spawn_app().await;

    let response = app
        .client
        .get(format!("{}/api-docs/openapi.json", app.address))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let doc: serde_json::Value = response.json().await.unwrap();
    assert!(doc["paths"]["/route/list"].is_object());
}

#[tokio::test]
async fn test_browser_flow_login_deny_and_logout() {
    let app = spawn_app().await;

    // Anonymous: straight to the login page.
    let response = app
        .client
        .get(format!("{}/home", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    assert_eq!(response.headers()["location"], "/login");

    // First login creates a Read Only user.
    let cookie = app.login("frank").await;
    let profile: Profile = app
        .client
        .get(format!("{}/home", app.address))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(profile.username, "frank");
    assert_eq!(profile.role_name.as_deref(), Some("Read Only"));

    // A mutating route is denied and remembered.
    let response = app
        .client
        .post(format!("{}/role/create", app.address))
        .header("cookie", &cookie)
        .json(&serde_json::json!({ "name": "Mine" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 307);
    assert_eq!(response.headers()["location"], "/noauth");

    let denied: DeniedRoute = app
        .client
        .get(format!("{}/noauth", app.address))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(denied.route.as_deref(), Some("/role/create"));

    // Logout ends the session.
    let response = app
        .client
        .get(format!("{}/logout", app.address))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);

    let response = app
        .client
        .get(format!("{}/home", app.address))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 303);
    assert_eq!(response.headers()["location"], "/login");
}
