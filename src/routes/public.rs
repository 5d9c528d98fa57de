use axum::routing::get;

use super::RouteTable;
use crate::{
    handlers,
    registry::{LOGIN_ROUTE, LOGOUT_ROUTE, NOAUTH_ROUTE, ROOT_ROUTE},
};

/// Public Router Module
///
/// These templates are never written to the permission matrix and pass the
/// permission stage untouched. All but `/login` still require a session.
pub fn public_routes() -> RouteTable {
    RouteTable::new()
        // GET /
        // Sends signed-in users to their landing page.
        .route(ROOT_ROUTE, get(handlers::root))
        // GET /login, POST /login
        // POST exchanges an identity-provider token for a server-side session.
        .route(LOGIN_ROUTE, get(handlers::login_page).post(handlers::login))
        // GET /logout
        // Expires the session immediately.
        .route(LOGOUT_ROUTE, get(handlers::logout))
        // GET /noauth
        // Unauthorized landing page; reports the template that was blocked.
        .route(NOAUTH_ROUTE, get(handlers::noauth))
}
