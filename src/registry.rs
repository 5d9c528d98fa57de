use std::sync::Arc;

pub const ROOT_ROUTE: &str = "/";
pub const LOGIN_ROUTE: &str = "/login";
pub const LOGOUT_ROUTE: &str = "/logout";
pub const NOAUTH_ROUTE: &str = "/noauth";
pub const STATIC_PREFIX: &str = "/static/";

/// Templates that bypass permission checks and never appear in the permission matrix.
pub const PUBLIC_ROUTES: &[&str] = &[ROOT_ROUTE, LOGIN_ROUTE, LOGOUT_ROUTE, NOAUTH_ROUTE];

/// is_public
///
/// True for the fixed public set: root, login, logout, the unauthorized landing page,
/// and anything served from the static asset prefix.
pub fn is_public(template: &str) -> bool {
    PUBLIC_ROUTES.contains(&template) || template.starts_with(STATIC_PREFIX)
}

/// RouteRegistry
///
/// The immutable, sorted set of protected route templates declared by this build.
/// Computed once from the route table and handed explicitly to whoever needs it;
/// cloning shares the underlying slice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteRegistry {
    routes: Arc<[String]>,
}

impl RouteRegistry {
    /// Builds a registry from declared templates, dropping public routes and
    /// duplicates and sorting lexicographically.
    pub fn from_templates<I, S>(templates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut routes: Vec<String> = templates
            .into_iter()
            .map(Into::into)
            .filter(|template| !is_public(template))
            .collect();
        routes.sort();
        routes.dedup();

        Self {
            routes: routes.into(),
        }
    }

    pub fn list_routes(&self) -> &[String] {
        &self.routes
    }

    pub fn contains(&self, template: &str) -> bool {
        self.routes
            .binary_search_by(|route| route.as_str().cmp(template))
            .is_ok()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
