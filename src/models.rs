use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;

use crate::session::Session;

// --- Core Schemas (Mapped to Database) ---

/// Role
///
/// A named level of access from the `roles` table. Names are unique; ids are opaque
/// and never change once assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_by: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub modified_by: String,
    #[ts(type = "string")]
    pub modified_at: DateTime<Utc>,
}

impl Role {
    /// Builds a role stamped with the current time, as the in-memory adapter and
    /// test fixtures create them.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        actor: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            created_by: actor.to_string(),
            created_at: now,
            modified_by: actor.to_string(),
            modified_at: now,
        }
    }
}

/// PermissionEntry
///
/// One cell of the permission matrix from the `permissions` table.
/// `(role_id, route)` is the natural key; `id` only addresses the row in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct PermissionEntry {
    pub id: String,
    pub role_id: String,
    // Route template, e.g. "/role/update/{id}".
    pub route: String,
    pub permission: bool,
    pub created_by: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub modified_by: String,
    #[ts(type = "string")]
    pub modified_at: DateTime<Utc>,
}

/// User
///
/// A known account from the `users` table. `role_id` is `None` until one is assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct User {
    pub id: String,
    pub username: String,
    pub role_id: Option<String>,
    pub created_by: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    pub modified_by: String,
    #[ts(type = "string")]
    pub modified_at: DateTime<Utc>,
}

// --- Request Payloads ---

/// CreateRoleRequest
///
/// Input for POST /role/create.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// UpdateRoleRequest
///
/// Partial update for POST /role/update/{id}; absent fields are left untouched.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateRoleRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// PermissionUpdate
///
/// One element of the bulk matrix edit submitted to POST /route/list.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PermissionUpdate {
    pub role_id: String,
    pub route: String,
    pub permission: bool,
}

/// AssignRoleRequest
///
/// Input for POST /user/update/{id}.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AssignRoleRequest {
    pub role_id: String,
}

// --- Responses ---

/// PermissionMatrix
///
/// Output of GET /route/list: every role, every declared route, and every entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PermissionMatrix {
    pub roles: Vec<Role>,
    pub routes: Vec<String>,
    pub entries: Vec<PermissionEntry>,
}

/// Profile
///
/// Output of GET /home and POST /login: who the caller is and which role they hold.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct Profile {
    pub username: String,
    pub role_id: Option<String>,
    pub role_name: Option<String>,
}

/// DeniedRoute
///
/// Output of GET /noauth: the template that was last blocked for this session.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct DeniedRoute {
    pub route: Option<String>,
}

/// SessionSummary
///
/// One row of GET /session/list. The session id is the bearer credential and is
/// never listed.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct SessionSummary {
    pub username: String,
    pub remote_addr: String,
    pub host: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
}

impl From<Session> for SessionSummary {
    fn from(session: Session) -> Self {
        Self {
            username: session.username,
            remote_addr: session.remote_addr,
            host: session.host,
            created_at: session.created_at,
            expires_at: session.expires_at,
        }
    }
}
