use axum::{
    Router,
    extract::Request,
    http::Method,
    middleware::{self, Next},
    response::Response,
};

use crate::{AppState, auth, enforce, session::Session};

/// Stage
///
/// One named step of the request pipeline that guards every declared route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Loads the server-side session named by the `session` cookie.
    Session,
    /// Sends requests without a session to the login page.
    Authenticate,
    /// Allows or denies based on the permission matrix.
    Permissions,
    /// Emits an audit event for mutating requests.
    Audit,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Session => "session",
            Stage::Authenticate => "authenticate",
            Stage::Permissions => "permissions",
            Stage::Audit => "audit",
        }
    }
}

/// The declared order. A request passes through these stages first to last.
pub const PIPELINE: [Stage; 4] = [Stage::Session, Stage::Authenticate, Stage::Permissions, Stage::Audit];

/// install
///
/// Wraps every route of `router` with `stages`. The last `route_layer` added runs
/// first, so stages are applied in reverse to keep the declared order.
pub fn install(router: Router<AppState>, state: &AppState, stages: &[Stage]) -> Router<AppState> {
    stages.iter().rev().fold(router, |router, stage| {
        tracing::debug!(stage = stage.name(), "installing pipeline stage");
        match stage {
            Stage::Session => router.route_layer(middleware::from_fn_with_state(
                state.clone(),
                crate::session::load_session,
            )),
            Stage::Authenticate => router.route_layer(middleware::from_fn(auth::require_session)),
            Stage::Permissions => {
                router.route_layer(middleware::from_fn_with_state(state.clone(), enforce::enforce))
            }
            Stage::Audit => router.route_layer(middleware::from_fn(audit_trail)),
        }
    })
}

// Durable audit storage lives elsewhere; this records the event in the log stream.
async fn audit_trail(request: Request, next: Next) -> Response {
    let mutating = matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );

    if mutating {
        if let Some(session) = request.extensions().get::<Session>() {
            tracing::info!(
                target: "audit",
                username = %session.username,
                method = %request.method(),
                uri = %request.uri(),
                "state-changing request"
            );
        }
    }

    next.run(request).await
}
