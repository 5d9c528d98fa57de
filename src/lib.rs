use std::sync::Arc;

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, header},
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Core services: configuration, errors, persistence and sessions.
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod session;

// Access control: the route registry, the reconciler and the enforcement stage.
pub mod enforce;
pub mod reconcile;
pub mod registry;

// Request pipeline, login boundary and HTTP surface.
pub mod auth;
pub mod handlers;
pub mod pipeline;
pub mod routes;

// --- Public Re-exports ---

pub use config::AppConfig;
pub use reconcile::Reconciler;
pub use registry::RouteRegistry;
pub use repository::{
    MemoryRepository, PermissionStore, PermissionStoreState, PostgresRepository, RoleDirectory,
    RoleDirectoryState, UserDirectory, UserDirectoryState,
};
pub use session::{MemorySessionStore, SessionStore, SessionStoreState};

/// ApiDoc
///
/// OpenAPI document for every handler and model, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root, handlers::login_page, handlers::login, handlers::logout,
        handlers::noauth, handlers::home, handlers::role_list, handlers::role_create,
        handlers::role_read, handlers::role_update, handlers::role_delete,
        handlers::route_list, handlers::route_update, handlers::user_list,
        handlers::user_read, handlers::user_update, handlers::user_delete,
        handlers::session_list, handlers::health
    ),
    components(
        schemas(
            models::Role, models::PermissionEntry, models::User, models::CreateRoleRequest,
            models::UpdateRoleRequest, models::PermissionUpdate, models::AssignRoleRequest,
            models::PermissionMatrix, models::Profile, models::DeniedRoute,
            models::SessionSummary,
        )
    ),
    tags(
        (name = "rolegate", description = "Route-level RBAC administration API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Shared, cheaply cloneable container for every service a request may touch.
/// The registry is computed once from the route table and never changes.
#[derive(Clone)]
pub struct AppState {
    pub roles: RoleDirectoryState,
    pub permissions: PermissionStoreState,
    pub users: UserDirectoryState,
    pub sessions: SessionStoreState,
    pub registry: RouteRegistry,
    pub config: AppConfig,
}

impl AppState {
    /// Builds the state from one repository that serves all three directories.
    pub fn new<R>(repo: Arc<R>, sessions: SessionStoreState, config: AppConfig) -> Self
    where
        R: RoleDirectory + PermissionStore + UserDirectory + 'static,
    {
        Self {
            roles: repo.clone(),
            permissions: repo.clone(),
            users: repo,
            sessions,
            registry: routes::route_registry(),
            config,
        }
    }

    /// Local-mode state backed entirely by in-process adapters.
    pub fn in_memory(config: AppConfig) -> Self {
        let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
        Self::new(Arc::new(MemoryRepository::new()), sessions, config)
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.roles.clone(),
            self.permissions.clone(),
            self.registry.clone(),
            self.config.store_timeout,
        )
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

impl FromRef<AppState> for SessionStoreState {
    fn from_ref(app_state: &AppState) -> SessionStoreState {
        app_state.sessions.clone()
    }
}

/// create_router
///
/// Assembles the declared routes behind the request pipeline, adds the endpoints that
/// sit outside it (Swagger UI, health), and wraps everything in the observability and
/// security-header layers.
pub fn create_router(mut state: AppState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    // 1. Declared routes, guarded by every pipeline stage. The registry served to
    //    enforcement and reconciliation comes from the same table that is mounted.
    let (declared, registry) = routes::route_table().into_parts();
    state.registry = registry;
    let guarded = pipeline::install(declared, &state, &pipeline::PIPELINE);

    // 2. Unguarded endpoints.
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(handlers::health))
        .merge(guarded)
        .with_state(state);

    // 3. Observability and response hardening (outermost).
    base_router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace_span_logger)
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(tower_http::LatencyUnit::Millis),
                    ),
            )
            .layer(PropagateRequestIdLayer::new(x_request_id))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::X_FRAME_OPTIONS,
                HeaderValue::from_static("DENY"),
            ))
            .layer(SetResponseHeaderLayer::if_not_present(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            )),
    )
}

/// trace_span_logger
///
/// Span factory for `TraceLayer`: method, uri and the request id, so every log line
/// for one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
