use axum::routing::{get, post};

use super::RouteTable;
use crate::handlers;

/// Admin Router Module
///
/// Role, permission-matrix, user and session management. Access is decided entirely by the
/// permission matrix: a fresh Admin role can use all of these, Read Only only the
/// list and read views, custom roles none until granted.
pub fn admin_routes() -> RouteTable {
    RouteTable::new()
        // --- Roles ---
        // Every committed role mutation re-runs reconciliation before responding.
        .route("/role/list", get(handlers::role_list))
        .route("/role/create", post(handlers::role_create))
        .route("/role/read/{id}", get(handlers::role_read))
        .route("/role/update/{id}", post(handlers::role_update))
        .route("/role/delete/{id}", post(handlers::role_delete))
        // --- Permission Matrix ---
        // GET lists every (role, route) entry; POST applies a bulk edit.
        .route(
            "/route/list",
            get(handlers::route_list).post(handlers::route_update),
        )
        // --- Users ---
        .route("/user/list", get(handlers::user_list))
        .route("/user/read/{id}", get(handlers::user_read))
        .route("/user/update/{id}", post(handlers::user_update))
        .route("/user/delete/{id}", post(handlers::user_delete))
        // --- Sessions ---
        .route("/session/list", get(handlers::session_list))
}
