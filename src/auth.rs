use axum::{
    extract::{FromRequestParts, MatchedPath, Request},
    http::{HeaderMap, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    config::Env,
    error::{AppError, StoreError},
    models::User,
    reconcile::{ADMIN_ROLE, READ_ONLY_ROLE, SYSTEM_ACTOR},
    registry::LOGIN_ROUTE,
    repository::bounded,
    session::Session,
};

/// Claims
///
/// Payload of the identity-provider token presented at `POST /login`.
/// Credentials are verified upstream; this service only trusts the signature.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the username.
    pub sub: String,
    /// Directory groups the user belongs to. Membership in the configured admin
    /// group grants the Admin role at login.
    #[serde(default)]
    pub groups: Vec<String>,
    pub exp: usize,
    pub iat: usize,
}

/// AuthUser
///
/// The authenticated caller, resolved from the session loaded earlier in the pipeline.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub username: String,
    pub role_id: Option<String>,
}

/// Rejects with 401 when no session was attached to the request. Handlers behind the
/// authenticate stage can rely on it always succeeding.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<Session>()
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(AuthUser {
            username: session.username.clone(),
            role_id: session.role_id().map(str::to_string),
        })
    }
}

/// require_session
///
/// Authenticate pipeline stage: anything other than the login route needs a live
/// session, otherwise the browser is sent to log in.
pub async fn require_session(request: Request, next: Next) -> Response {
    let is_login = request
        .extensions()
        .get::<MatchedPath>()
        .is_some_and(|matched| matched.as_str() == LOGIN_ROUTE);

    if !is_login && request.extensions().get::<Session>().is_none() {
        tracing::info!(uri = %request.uri(), "no session, redirecting to login");
        return Redirect::to(LOGIN_ROUTE).into_response();
    }

    next.run(request).await
}

/// Identity established by a login attempt, before role resolution.
#[derive(Debug)]
pub struct Identity {
    pub username: String,
    pub groups: Vec<String>,
}

/// authenticate_request
///
/// Validates the bearer token on a login request. In `Env::Local` an `x-username`
/// header is accepted instead, so the service can be driven without an identity
/// provider during development.
pub fn authenticate_request(state: &AppState, headers: &HeaderMap) -> Result<Identity, AppError> {
    if state.config.env == Env::Local {
        if let Some(username) = headers
            .get("x-username")
            .and_then(|value| value.to_str().ok())
            .filter(|name| !name.trim().is_empty())
        {
            return Ok(Identity {
                username: username.trim().to_string(),
                groups: Vec::new(),
            });
        }
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let decoding_key = DecodingKey::from_secret(state.config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let claims = decode::<Claims>(token, &decoding_key, &validation)
        .map_err(|e| {
            tracing::info!(error = %e, "rejected login token");
            AppError::Unauthorized
        })?
        .claims;

    Ok(Identity {
        username: claims.sub,
        groups: claims.groups,
    })
}

/// resolve_user
///
/// Role assignment at login:
/// - members of the admin group are (re)assigned Admin;
/// - known users otherwise keep the role they already hold;
/// - unknown users are created with Read Only.
pub async fn resolve_user(state: &AppState, identity: &Identity) -> Result<User, AppError> {
    let limit = state.config.store_timeout;
    let is_admin = identity.groups.iter().any(|group| group == &state.config.admin_group);

    let existing = bounded(
        limit,
        "read_user_by_username",
        state.users.read_user_by_username(&identity.username),
    )
    .await?;

    match (existing, is_admin) {
        (Some(user), false) => Ok(user),
        (Some(user), true) => {
            let admin = builtin_role_id(state, ADMIN_ROLE).await?;
            if user.role_id.as_deref() == Some(admin.as_str()) {
                return Ok(user);
            }
            bounded(limit, "assign_role", state.users.assign_role(&user.id, &admin, SYSTEM_ACTOR))
                .await?
                .ok_or(AppError::NotFound)
        }
        (None, admin) => {
            let role_name = if admin { ADMIN_ROLE } else { READ_ONLY_ROLE };
            let role_id = builtin_role_id(state, role_name).await?;
            tracing::info!(username = %identity.username, role = role_name, "creating user on first login");
            Ok(bounded(
                limit,
                "create_user",
                state.users.create_user(&identity.username, Some(&role_id), SYSTEM_ACTOR),
            )
            .await?)
        }
    }
}

async fn builtin_role_id(state: &AppState, name: &str) -> Result<String, AppError> {
    let role = bounded(
        state.config.store_timeout,
        "read_role_by_name",
        state.roles.read_role_by_name(name),
    )
    .await?;

    role.map(|role| role.id).ok_or_else(|| {
        tracing::error!(role = name, "built-in role is missing");
        AppError::Store(StoreError::Unavailable(format!("built-in role '{name}' is not configured")))
    })
}
