use std::{sync::Arc, time::Duration};

use rolegate::{
    AppState, MemoryRepository, MemorySessionStore, PostgresRepository,
    config::{AppConfig, Env},
    create_router,
    reconcile::seed_builtin_roles,
    repository::bounded,
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const RECONCILE_BACKOFF: Duration = Duration::from_secs(2);
const SESSION_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// main
///
/// Entry point: configuration, logging, persistence, built-in roles, startup
/// reconciliation, then the HTTP server. The server never binds before the
/// permission matrix agrees with the declared routes.
#[tokio::main]
async fn main() {
    // 1. Configuration (fail-fast on missing production secrets).
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    // 2. Logging: pretty locally, JSON for log aggregation in production.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rolegate=debug,tower_http=info,axum=info".into());

    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 3. Persistence: Postgres when configured, in-process adapters otherwise.
    let state = match config.db_url.clone() {
        Some(db_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .acquire_timeout(config.store_timeout)
                .connect(&db_url)
                .await
                .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("FATAL: Database migrations failed.");

            let repo = Arc::new(PostgresRepository::new(pool, config.session_ttl));
            AppState::new(repo.clone(), repo, config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores, nothing will persist");
            let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
            AppState::new(Arc::new(MemoryRepository::new()), sessions, config)
        }
    };

    // 4. Built-in roles must exist before the matrix is reconciled.
    seed_builtin_roles(state.roles.as_ref())
        .await
        .expect("FATAL: Could not seed built-in roles.");

    // 5. Startup reconciliation with linear backoff.
    let reconciler = state.reconciler();
    let attempts = state.config.reconcile_attempts;
    let mut attempt = 1;
    loop {
        match reconciler.reconcile().await {
            Ok(report) => {
                tracing::info!(upserted = report.upserted, deleted = report.deleted, "startup reconciliation complete");
                break;
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(error = %e, attempt, attempts, "startup reconciliation failed, retrying");
                tokio::time::sleep(RECONCILE_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, attempts, "startup reconciliation failed, giving up");
                panic!("FATAL: permission matrix could not be reconciled: {e}");
            }
        }
    }

    // 6. Expired sessions are swept in the background for the life of the process.
    let sessions = state.sessions.clone();
    let purge_timeout = state.config.store_timeout;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match bounded(purge_timeout, "purge_expired_sessions", sessions.purge_expired()).await {
                Ok(0) => {}
                Ok(purged) => tracing::info!(purged, "expired sessions purged"),
                Err(e) => tracing::warn!(error = %e, "session purge failed"),
            }
        }
    });

    // 7. Router and server.
    let bind_addr = state.config.bind_addr.clone();
    let app = create_router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .expect("FATAL: Could not bind the listen address. Check BIND_ADDR.");

    tracing::info!("Listening on {}", bind_addr);
    tracing::info!("API Documentation (Swagger UI) available at: http://{}/swagger-ui", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .expect("FATAL: HTTP server terminated unexpectedly.");
}
