use std::time::Duration;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};

use crate::{
    AppState,
    error::{AccessError, StoreError},
    registry,
    repository::{PermissionStore, bounded},
    session::Session,
};

/// Decision
///
/// Terminal outcome of evaluating one request. Only `Public` and `Allowed` let the
/// request through; everything else fails closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Public,
    NoRole,
    LookupMiss,
    Denied,
    Allowed,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Public | Decision::Allowed)
    }
}

/// evaluate
///
/// The allow/deny algorithm, independent of HTTP. Public templates short-circuit
/// before any store access; a missing entry is a deny, never a default allow.
pub async fn evaluate(
    permissions: &dyn PermissionStore,
    limit: Duration,
    template: &str,
    role_id: Option<&str>,
) -> Result<Decision, StoreError> {
    if registry::is_public(template) {
        return Ok(Decision::Public);
    }

    let Some(role_id) = role_id.filter(|id| !id.is_empty()) else {
        return Ok(Decision::NoRole);
    };

    let entry = bounded(limit, "read_permission", permissions.read_permission(role_id, template)).await?;
    Ok(match entry {
        None => Decision::LookupMiss,
        Some(entry) if entry.permission => Decision::Allowed,
        Some(_) => Decision::Denied,
    })
}

/// enforce
///
/// Permission pipeline stage. Resolves the matched route template and the session's
/// role, then either continues the pipeline or redirects to the unauthorized landing
/// page after recording the blocked template in the session.
pub async fn enforce(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AccessError> {
    let template = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .ok_or(AccessError::UnresolvedRoute)?;

    if registry::is_public(&template) {
        return Ok(next.run(request).await);
    }

    let limit = state.config.store_timeout;
    let Some(session) = request.extensions_mut().get_mut::<Session>() else {
        // Authentication runs earlier; a protected request without a session is a fault.
        tracing::error!(route = %template, "protected request reached enforcement without a session");
        return Err(AccessError::NoRoleAssigned {
            username: String::new(),
        });
    };

    let decision = evaluate(state.permissions.as_ref(), limit, &template, session.role_id())
        .await
        .inspect_err(|e| tracing::error!(error = %e, route = %template, "permission lookup failed"))?;

    match decision {
        Decision::Public | Decision::Allowed => {
            bounded(limit, "save_session", state.sessions.save(session)).await?;
            Ok(next.run(request).await)
        }
        Decision::NoRole => {
            tracing::error!(username = %session.username, "account has no role");
            Err(AccessError::NoRoleAssigned {
                username: session.username.clone(),
            })
        }
        Decision::LookupMiss | Decision::Denied => {
            tracing::warn!(
                username = %session.username,
                role_id = ?session.role_id(),
                route = %template,
                ?decision,
                "role has no permission for route"
            );
            session.set_denied_route(&template);
            bounded(limit, "save_session", state.sessions.save(session)).await?;
            Err(AccessError::PermissionDenied { route: template })
        }
    }
}
