use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    AppState,
    error::{AccessError, StoreError},
    repository::bounded,
};

/// Name of the cookie carrying the opaque session id.
pub const SESSION_COOKIE: &str = "session";

/// Session
///
/// Server-side state for one browser, addressed by the id in its `session` cookie.
/// Every field is typed; enforcement reads `role_id` and writes `pending_denied_route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub remote_addr: String,
    pub host: String,
    pub username: String,
    pub role_id: Option<String>,
    pub pending_denied_route: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a fresh session with a random id. The expiry is set by the store on save.
    pub fn new(
        username: impl Into<String>,
        role_id: Option<String>,
        remote_addr: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr: remote_addr.into(),
            host: host.into(),
            username: username.into(),
            role_id,
            pending_denied_route: None,
            created_at: now,
            expires_at: now,
        }
    }

    /// The assigned role, treating an empty id the same as none.
    pub fn role_id(&self) -> Option<&str> {
        self.role_id.as_deref().filter(|id| !id.is_empty())
    }

    /// Records the template that was just blocked so /noauth can show it.
    pub fn set_denied_route(&mut self, route: &str) {
        self.pending_denied_route = Some(route.to_string());
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// SessionStore
///
/// Persisted session backend. `create` starts a session at login; `save` writes back
/// changes to a session that is still live and never brings back one that was destroyed
/// or has expired. Both refresh the expiry (sliding TTL). `load` and `list` never return
/// an expired session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;
    async fn create(&self, session: &Session) -> Result<(), StoreError>;
    async fn save(&self, session: &Session) -> Result<(), StoreError>;
    async fn destroy(&self, id: &str) -> Result<(), StoreError>;
    // Active sessions, oldest first.
    async fn list(&self) -> Result<Vec<Session>, StoreError>;
    // Returns the number of expired sessions removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;
}

pub type SessionStoreState = Arc<dyn SessionStore>;

pub(crate) fn expiry_from(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// MemorySessionStore
///
/// In-process session backend for local runs and tests. Expired sessions are dropped
/// when they are next loaded and swept on every login, so the map stays bounded by
/// the number of live sessions.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }
}

fn sweep(sessions: &mut HashMap<String, Session>, now: DateTime<Utc>) -> u64 {
    let before = sessions.len();
    sessions.retain(|_, session| !session.is_expired(now));
    (before - sessions.len()) as u64
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(id) {
                None => return Ok(None),
                Some(session) if !session.is_expired(now) => return Ok(Some(session.clone())),
                Some(_) => {}
            }
        }
        self.sessions.write().await.remove(id);
        Ok(None)
    }

    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut stored = session.clone();
        stored.expires_at = expiry_from(now, self.ttl);

        let mut sessions = self.sessions.write().await;
        let purged = sweep(&mut sessions, now);
        if purged > 0 {
            tracing::debug!(purged, "dropped expired sessions");
        }
        sessions.insert(stored.id.clone(), stored);
        Ok(())
    }

    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        if let Some(stored) = sessions.get_mut(&session.id) {
            if stored.is_expired(now) {
                return Ok(());
            }
            stored.role_id = session.role_id.clone();
            stored.pending_denied_route = session.pending_denied_route.clone();
            stored.expires_at = expiry_from(now, self.ttl);
        }
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let now = Utc::now();
        let mut active: Vec<Session> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|session| !session.is_expired(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(sweep(&mut *self.sessions.write().await, Utc::now()))
    }
}

/// load_session
///
/// First pipeline stage. Resolves the `session` cookie against the session store and
/// places the live `Session` into the request extensions for every later stage.
/// Unknown or expired ids simply leave the request without a session.
pub async fn load_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response, AccessError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        let session = bounded(
            state.config.store_timeout,
            "load_session",
            state.sessions.load(cookie.value()),
        )
        .await?;

        if let Some(session) = session {
            request.extensions_mut().insert(session);
        }
    }

    Ok(next.run(request).await)
}
