/// Router Module Index
///
/// Every route the service exposes is declared here exactly once, through
/// `RouteTable`. The same declaration yields both the axum router and the
/// `RouteRegistry` that the permission matrix is reconciled against, so the two can
/// never drift apart.
use axum::{Router, routing::MethodRouter};

use crate::{AppState, registry::RouteRegistry};

/// Login, logout, the unauthorized landing page and the root redirect.
/// Exempt from permission checks.
pub mod public;

/// Routes for any signed-in user. Still checked against the permission matrix.
pub mod authenticated;

/// Role, permission-matrix and user administration.
pub mod admin;

/// RouteTable
///
/// Router builder that remembers each template it registers.
pub struct RouteTable {
    router: Router<AppState>,
    templates: Vec<&'static str>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            templates: Vec::new(),
        }
    }

    pub fn route(mut self, template: &'static str, method_router: MethodRouter<AppState>) -> Self {
        self.router = self.router.route(template, method_router);
        self.templates.push(template);
        self
    }

    pub fn merge(mut self, other: RouteTable) -> Self {
        self.router = self.router.merge(other.router);
        self.templates.extend(other.templates);
        self
    }

    pub fn templates(&self) -> &[&'static str] {
        &self.templates
    }

    /// The protected subset of the declared templates, sorted.
    pub fn registry(&self) -> RouteRegistry {
        RouteRegistry::from_templates(self.templates.iter().copied())
    }

    pub fn into_parts(self) -> (Router<AppState>, RouteRegistry) {
        let registry = self.registry();
        (self.router, registry)
    }
}

/// The complete route declaration for this build.
pub fn route_table() -> RouteTable {
    public::public_routes()
        .merge(authenticated::authenticated_routes())
        .merge(admin::admin_routes())
}

/// Registry derived from `route_table()`; pure and deterministic.
pub fn route_registry() -> RouteRegistry {
    route_table().registry()
}
