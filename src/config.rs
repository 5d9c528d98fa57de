use std::{env, time::Duration};

/// AppConfig
///
/// Holds the service's entire configuration state. Loaded once at startup and never
/// mutated afterwards; it is pulled into handlers and middleware via `FromRef`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Postgres connection string. `None` in local mode selects the in-memory adapters.
    pub db_url: Option<String>,
    // Runtime environment marker. Controls secrets policy and the login bypass.
    pub env: Env,
    // HS256 secret used to validate identity-provider tokens presented at /login.
    pub jwt_secret: String,
    // Members of this identity-provider group are logged in with the Admin role.
    pub admin_group: String,
    // Sliding lifetime of a server-side session.
    pub session_ttl: Duration,
    // Upper bound on every individual store call (session, role, permission).
    pub store_timeout: Duration,
    // How many times startup reconciliation is attempted before giving up.
    pub reconcile_attempts: u32,
    pub bind_addr: String,
    // Marks the session cookie `Secure`. Always on in production.
    pub cookie_secure: bool,
}

/// Env
///
/// Runtime context: local development (in-memory fallback, header login bypass)
/// or hardened production (Postgres and secrets required).
#[derive(Clone, PartialEq, Debug)]
pub enum Env {
    Local,
    Production,
}

const LOCAL_JWT_SECRET: &str = "super-secure-test-secret-value-local";
const DEFAULT_ADMIN_GROUP: &str = "SomeADGroup";
const DEFAULT_SESSION_TTL_SECS: u64 = 20 * 60;
const DEFAULT_STORE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECONCILE_ATTEMPTS: u32 = 3;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

impl Default for AppConfig {
    /// Safe, non-panicking configuration for test state scaffolding.
    fn default() -> Self {
        Self {
            db_url: None,
            env: Env::Local,
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            admin_group: DEFAULT_ADMIN_GROUP.to_string(),
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            store_timeout: Duration::from_secs(DEFAULT_STORE_TIMEOUT_SECS),
            reconcile_attempts: DEFAULT_RECONCILE_ATTEMPTS,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            cookie_secure: false,
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every parameter from the environment and implements the **fail-fast** principle.
    ///
    /// # Panics
    /// Panics if `DATABASE_URL` or `JWT_SECRET` is missing while `APP_ENV=production`.
    /// The service must never come up in production without a persistent matrix store
    /// or with a guessable token secret.
    pub fn load() -> Self {
        let env = match env::var("APP_ENV").as_deref() {
            Ok("production") => Env::Production,
            _ => Env::Local,
        };

        let (db_url, jwt_secret) = match env {
            Env::Production => (
                Some(env::var("DATABASE_URL").expect("FATAL: DATABASE_URL required in prod")),
                env::var("JWT_SECRET").expect("FATAL: JWT_SECRET must be set in production."),
            ),
            Env::Local => (
                env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
                env::var("JWT_SECRET").unwrap_or_else(|_| LOCAL_JWT_SECRET.to_string()),
            ),
        };

        Self {
            db_url,
            jwt_secret,
            admin_group: env::var("ADMIN_GROUP").unwrap_or_else(|_| DEFAULT_ADMIN_GROUP.to_string()),
            session_ttl: Duration::from_secs(parse_var("SESSION_TTL_SECS", DEFAULT_SESSION_TTL_SECS)),
            store_timeout: Duration::from_secs(parse_var(
                "STORE_TIMEOUT_SECS",
                DEFAULT_STORE_TIMEOUT_SECS,
            )),
            reconcile_attempts: parse_var("RECONCILE_ATTEMPTS", DEFAULT_RECONCILE_ATTEMPTS).max(1),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            cookie_secure: env == Env::Production,
            env,
        }
    }
}

// Unparseable numeric overrides fall back to the default instead of aborting startup.
fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
