use axum::routing::get;

use super::RouteTable;
use crate::handlers;

/// Authenticated Router Module
///
/// Application pages for signed-in users. Unlike the public routes these are part of
/// the permission matrix, so each role needs an explicit grant.
pub fn authenticated_routes() -> RouteTable {
    RouteTable::new()
        // GET /home
        // Landing page: the caller's username and role.
        .route("/home", get(handlers::home))
}
