use std::net::SocketAddr;

use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::Redirect,
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};

use crate::{
    AppConfig, AppState,
    auth::{self, AuthUser},
    error::{AppError, ReconcileError},
    models::{
        AssignRoleRequest, CreateRoleRequest, DeniedRoute, PermissionEntry, PermissionMatrix,
        PermissionUpdate, Profile, Role, SessionSummary, UpdateRoleRequest, User,
    },
    reconcile::{ReconcileReport, is_builtin_role},
    registry::LOGIN_ROUTE,
    repository::bounded,
    session::{SESSION_COOKIE, Session, SessionStoreState},
};

// --- Reconciliation Trigger ---

/// Runs a full reconciliation pass after a committed role mutation.
async fn reconcile_after(state: &AppState, cause: &'static str) -> Result<ReconcileReport, ReconcileError> {
    tracing::debug!(cause, "triggering reconciliation");
    state
        .reconciler()
        .reconcile()
        .await
        .inspect_err(|e| tracing::error!(error = %e, cause, "reconciliation after role change failed"))
}

async fn role_name_for(state: &AppState, role_id: Option<&str>) -> Result<Option<String>, AppError> {
    let Some(role_id) = role_id else {
        return Ok(None);
    };
    let role = bounded(state.config.store_timeout, "read_role", state.roles.read_role(role_id)).await?;
    Ok(role.map(|role| role.name))
}

fn validate_role_name(name: &str) -> Result<&str, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Invalid("role name must not be empty".to_string()));
    }
    Ok(name)
}

// --- Public Handlers ---

/// root
///
/// [Public Route] Sends the browser to its landing page.
#[utoipa::path(
    get,
    path = "/",
    responses((status = 303, description = "Redirect to /home"))
)]
pub async fn root() -> Redirect {
    Redirect::to("/home")
}

/// login_page
///
/// [Public Route] Describes how to sign in. The interactive form is rendered by the
/// front end; this endpoint only advertises the token exchange.
#[utoipa::path(
    get,
    path = "/login",
    responses((status = 200, description = "Login instructions"))
)]
pub async fn login_page() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "login": "POST /login with an identity-provider token in the Authorization header",
    }))
}

/// login
///
/// [Public Route] Exchanges an identity-provider token for a server-side session.
///
/// Resolves (or creates) the user, assigns their role, replaces any session the
/// browser already carried, and sets an HTTP-only `session` cookie.
#[utoipa::path(
    post,
    path = "/login",
    responses(
        (status = 200, description = "Logged in", body = Profile),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    previous: Option<Extension<Session>>,
    peer: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
) -> Result<(CookieJar, Json<Profile>), AppError> {
    let limit = state.config.store_timeout;
    let identity = auth::authenticate_request(&state, &headers)?;
    let user = auth::resolve_user(&state, &identity).await?;

    // A new login never reuses an old session id.
    if let Some(Extension(previous)) = previous {
        bounded(limit, "destroy_session", state.sessions.destroy(&previous.id)).await?;
    }

    let remote_addr = peer
        .map(|Extension(ConnectInfo(addr))| addr.to_string())
        .unwrap_or_default();
    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let session = Session::new(&user.username, user.role_id.clone(), remote_addr, host);
    bounded(limit, "create_session", state.sessions.create(&session)).await?;

    tracing::info!(username = %user.username, role_id = ?user.role_id, "login succeeded");

    let cookie = Cookie::build((SESSION_COOKIE, session.id.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(state.config.cookie_secure);

    let role_name = role_name_for(&state, user.role_id.as_deref()).await?;
    let profile = Profile {
        username: user.username,
        role_id: user.role_id,
        role_name,
    };

    Ok((jar.add(cookie), Json(profile)))
}

/// logout
///
/// [Public Route] Destroys the session immediately and returns to the login page.
#[utoipa::path(
    get,
    path = "/logout",
    responses((status = 303, description = "Session destroyed, redirect to /login"))
)]
pub async fn logout(
    State(sessions): State<SessionStoreState>,
    State(config): State<AppConfig>,
    jar: CookieJar,
    session: Option<Extension<Session>>,
) -> Result<(CookieJar, Redirect), AppError> {
    if let Some(Extension(session)) = session {
        bounded(config.store_timeout, "destroy_session", sessions.destroy(&session.id)).await?;
        tracing::info!(username = %session.username, "logged out");
    }

    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    Ok((jar, Redirect::to(LOGIN_ROUTE)))
}

/// noauth
///
/// [Public Route] Unauthorized landing page. Reports the route template that was
/// last blocked for this session.
#[utoipa::path(
    get,
    path = "/noauth",
    responses((status = 200, description = "Last denied route", body = DeniedRoute))
)]
pub async fn noauth(Extension(session): Extension<Session>) -> Json<DeniedRoute> {
    Json(DeniedRoute {
        route: session.pending_denied_route,
    })
}

// --- Authenticated Handlers ---

/// home
///
/// [Authenticated Route] The caller's username and role.
#[utoipa::path(
    get,
    path = "/home",
    responses((status = 200, description = "Current user", body = Profile))
)]
pub async fn home(
    AuthUser { username, role_id }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Profile>, AppError> {
    let role_name = role_name_for(&state, role_id.as_deref()).await?;
    Ok(Json(Profile {
        username,
        role_id,
        role_name,
    }))
}

// --- Role Management ---

#[utoipa::path(
    get,
    path = "/role/list",
    responses((status = 200, description = "All roles", body = [Role]))
)]
pub async fn role_list(State(state): State<AppState>) -> Result<Json<Vec<Role>>, AppError> {
    let roles = bounded(state.config.store_timeout, "list_roles", state.roles.list_roles()).await?;
    Ok(Json(roles))
}

/// role_create
///
/// [Admin Route] Creates a role, then fills its row of the permission matrix with
/// fail-closed defaults. A failed reconciliation is logged but the new role is still
/// acknowledged; the next trigger completes the row.
#[utoipa::path(
    post,
    path = "/role/create",
    request_body = CreateRoleRequest,
    responses(
        (status = 201, description = "Role created", body = Role),
        (status = 409, description = "Name already taken"),
        (status = 422, description = "Invalid name")
    )
)]
pub async fn role_create(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateRoleRequest>,
) -> Result<(StatusCode, Json<Role>), AppError> {
    let name = validate_role_name(&payload.name)?;
    let role = bounded(
        state.config.store_timeout,
        "create_role",
        state.roles.create_role(name, payload.description.trim(), &username),
    )
    .await?;

    tracing::info!(role = %role.name, created_by = %username, "role created");
    let _ = reconcile_after(&state, "role_create").await;

    Ok((StatusCode::CREATED, Json(role)))
}

#[utoipa::path(
    get,
    path = "/role/read/{id}",
    params(("id" = String, Path, description = "Role ID")),
    responses(
        (status = 200, description = "Found", body = Role),
        (status = 404, description = "Not Found")
    )
)]
pub async fn role_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Role>, AppError> {
    bounded(state.config.store_timeout, "read_role", state.roles.read_role(&id))
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// role_update
///
/// [Admin Route] Renames a role or changes its description. Built-in roles keep
/// their names, since the default permissions are keyed on them.
#[utoipa::path(
    post,
    path = "/role/update/{id}",
    params(("id" = String, Path, description = "Role ID")),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Updated", body = Role),
        (status = 403, description = "Built-in role cannot be renamed"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn role_update(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut payload): Json<UpdateRoleRequest>,
) -> Result<Json<Role>, AppError> {
    let limit = state.config.store_timeout;
    let current = bounded(limit, "read_role", state.roles.read_role(&id))
        .await?
        .ok_or(AppError::NotFound)?;

    if let Some(name) = payload.name.take() {
        let name = validate_role_name(&name)?.to_string();
        if is_builtin_role(&current.name) && name != current.name {
            return Err(AppError::Forbidden(format!("built-in role '{}' cannot be renamed", current.name)));
        }
        payload.name = Some(name);
    }

    let role = bounded(limit, "update_role", state.roles.update_role(&id, payload, &username))
        .await?
        .ok_or(AppError::NotFound)?;

    tracing::info!(role = %role.name, modified_by = %username, "role updated");
    let _ = reconcile_after(&state, "role_update").await;

    Ok(Json(role))
}

/// role_delete
///
/// [Admin Route] Deletes a role and removes its permission entries. The response is
/// only sent once reconciliation has succeeded; on failure the caller gets a 500 and
/// should retry, which re-runs the orphan removal.
#[utoipa::path(
    post,
    path = "/role/delete/{id}",
    params(("id" = String, Path, description = "Role ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Built-in role cannot be deleted"),
        (status = 404, description = "Not Found"),
        (status = 500, description = "Permission cleanup failed, retry")
    )
)]
pub async fn role_delete(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let limit = state.config.store_timeout;
    let Some(role) = bounded(limit, "read_role", state.roles.read_role(&id)).await? else {
        // A retry after a failed cleanup finds the role gone with rows still left behind.
        let entries = bounded(
            limit,
            "list_permission_entries",
            state.permissions.list_permission_entries(),
        )
        .await?;
        if entries.iter().any(|entry| entry.role_id == id) {
            reconcile_after(&state, "role_delete").await?;
        }
        return Err(AppError::NotFound);
    };

    if is_builtin_role(&role.name) {
        return Err(AppError::Forbidden(format!("built-in role '{}' cannot be deleted", role.name)));
    }

    let deleted = bounded(limit, "delete_role", state.roles.delete_role(&id)).await?;
    tracing::info!(role = %role.name, deleted, modified_by = %username, "role deleted");

    reconcile_after(&state, "role_delete").await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Permission Matrix ---

/// route_list
///
/// [Admin Route] The full permission matrix: every role, every declared route and
/// every persisted entry.
#[utoipa::path(
    get,
    path = "/route/list",
    responses((status = 200, description = "Permission matrix", body = PermissionMatrix))
)]
pub async fn route_list(State(state): State<AppState>) -> Result<Json<PermissionMatrix>, AppError> {
    let limit = state.config.store_timeout;
    let roles = bounded(limit, "list_roles", state.roles.list_roles()).await?;
    let entries = bounded(
        limit,
        "list_permission_entries",
        state.permissions.list_permission_entries(),
    )
    .await?;

    Ok(Json(PermissionMatrix {
        roles,
        routes: state.registry.list_routes().to_vec(),
        entries,
    }))
}

/// route_update
///
/// [Admin Route] Bulk edit of the matrix. The whole batch is validated before the
/// first write: every route must be declared and every role must exist.
#[utoipa::path(
    post,
    path = "/route/list",
    request_body = [PermissionUpdate],
    responses(
        (status = 200, description = "Entries written", body = [PermissionEntry]),
        (status = 422, description = "Unknown route or role")
    )
)]
pub async fn route_update(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Json(updates): Json<Vec<PermissionUpdate>>,
) -> Result<Json<Vec<PermissionEntry>>, AppError> {
    let limit = state.config.store_timeout;
    let roles = bounded(limit, "list_roles", state.roles.list_roles()).await?;

    for update in &updates {
        if !state.registry.contains(&update.route) {
            return Err(AppError::Invalid(format!("unknown route '{}'", update.route)));
        }
        if !roles.iter().any(|role| role.id == update.role_id) {
            return Err(AppError::Invalid(format!("unknown role '{}'", update.role_id)));
        }
    }

    let mut written = Vec::with_capacity(updates.len());
    for update in updates {
        let entry = bounded(
            limit,
            "upsert_permission",
            state
                .permissions
                .upsert_permission(&update.role_id, &update.route, update.permission, &username),
        )
        .await?;
        tracing::info!(
            role_id = %entry.role_id,
            route = %entry.route,
            permission = entry.permission,
            modified_by = %username,
            "permission changed"
        );
        written.push(entry);
    }

    Ok(Json(written))
}

// --- User Management ---

#[utoipa::path(
    get,
    path = "/user/list",
    responses((status = 200, description = "All users", body = [User]))
)]
pub async fn user_list(State(state): State<AppState>) -> Result<Json<Vec<User>>, AppError> {
    let users = bounded(state.config.store_timeout, "list_users", state.users.list_users()).await?;
    Ok(Json(users))
}

#[utoipa::path(
    get,
    path = "/user/read/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "Found", body = User),
        (status = 404, description = "Not Found")
    )
)]
pub async fn user_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<User>, AppError> {
    bounded(state.config.store_timeout, "read_user", state.users.read_user(&id))
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

/// user_update
///
/// [Admin Route] Assigns a role to a user. Takes effect at the user's next login,
/// since live sessions carry the role id they were created with.
#[utoipa::path(
    post,
    path = "/user/update/{id}",
    params(("id" = String, Path, description = "User ID")),
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Role assigned", body = User),
        (status = 404, description = "Not Found"),
        (status = 422, description = "Unknown role")
    )
)]
pub async fn user_update(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<AssignRoleRequest>,
) -> Result<Json<User>, AppError> {
    let limit = state.config.store_timeout;
    let role = bounded(limit, "read_role", state.roles.read_role(&payload.role_id))
        .await?
        .ok_or_else(|| AppError::Invalid(format!("unknown role '{}'", payload.role_id)))?;

    let user = bounded(limit, "assign_role", state.users.assign_role(&id, &role.id, &username))
        .await?
        .ok_or(AppError::NotFound)?;

    tracing::info!(user = %user.username, role = %role.name, modified_by = %username, "role assigned");
    Ok(Json(user))
}

/// user_delete
///
/// [Admin Route] Removes an account. Its live sessions run until they expire or log
/// out; the next login recreates the user with the default role.
#[utoipa::path(
    post,
    path = "/user/delete/{id}",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn user_delete(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = bounded(state.config.store_timeout, "delete_user", state.users.delete_user(&id)).await?;
    if !deleted {
        return Err(AppError::NotFound);
    }

    tracing::info!(user_id = %id, deleted_by = %username, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- Session Handlers ---

/// session_list
///
/// [Admin Route] Active sessions, oldest first.
#[utoipa::path(
    get,
    path = "/session/list",
    responses((status = 200, description = "Active sessions", body = [SessionSummary]))
)]
pub async fn session_list(
    State(sessions): State<SessionStoreState>,
    State(config): State<AppConfig>,
) -> Result<Json<Vec<SessionSummary>>, AppError> {
    let active = bounded(config.store_timeout, "list_sessions", sessions.list()).await?;
    Ok(Json(active.into_iter().map(SessionSummary::from).collect()))
}

// --- Operations ---

/// health
///
/// Liveness check. Sits outside the request pipeline.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health() -> &'static str {
    "ok"
}
