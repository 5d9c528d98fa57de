use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::{PermissionStore, RoleDirectory, UserDirectory};
use crate::{
    error::StoreError,
    models::{PermissionEntry, Role, UpdateRoleRequest, User},
    session::{Session, SessionStore, expiry_from},
};

const ROLE_COLUMNS: &str = "id, name, description, created_by, created_at, modified_by, modified_at";
const PERMISSION_COLUMNS: &str =
    "id, role_id, route, permission, created_by, created_at, modified_by, modified_at";
const USER_COLUMNS: &str = "id, username, role_id, created_by, created_at, modified_by, modified_at";
const SESSION_COLUMNS: &str =
    "id, remote_addr, host, username, role_id, pending_denied_route, created_at, expires_at";

/// PostgresRepository
///
/// The production implementation of every store trait, backed by PostgreSQL.
/// Schema lives in `migrations/`; the `(role_id, route)` unique index is what makes
/// `upsert_permission` safe under concurrent reconciliation.
#[derive(Clone)]
pub struct PostgresRepository {
    pool: PgPool,
    session_ttl: Duration,
}

impl PostgresRepository {
    /// Creates a new repository using the initialized connection pool.
    pub fn new(pool: PgPool, session_ttl: Duration) -> Self {
        Self { pool, session_ttl }
    }
}

// Unique-constraint violations are caller errors (duplicate name), not outages.
fn write_error(err: sqlx::Error, what: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(format!("{what} already exists"))
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl RoleDirectory for PostgresRepository {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles ORDER BY name");
        Ok(sqlx::query_as::<_, Role>(&query).fetch_all(&self.pool).await?)
    }

    async fn read_role(&self, id: &str) -> Result<Option<Role>, StoreError> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1");
        Ok(sqlx::query_as::<_, Role>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn read_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let query = format!("SELECT {ROLE_COLUMNS} FROM roles WHERE name = $1");
        Ok(sqlx::query_as::<_, Role>(&query)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_role(&self, name: &str, description: &str, created_by: &str) -> Result<Role, StoreError> {
        let query = format!(
            "INSERT INTO roles (id, name, description, created_by, created_at, modified_by, modified_at) \
             VALUES ($1, $2, $3, $4, NOW(), $4, NOW()) RETURNING {ROLE_COLUMNS}"
        );
        sqlx::query_as::<_, Role>(&query)
            .bind(Uuid::new_v4().to_string())
            .bind(name)
            .bind(description)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error(e, &format!("role '{name}'")))
    }

    /// Partial update: `COALESCE` keeps columns whose field is `None`.
    async fn update_role(
        &self,
        id: &str,
        changes: UpdateRoleRequest,
        modified_by: &str,
    ) -> Result<Option<Role>, StoreError> {
        let query = format!(
            "UPDATE roles SET name = COALESCE($2, name), description = COALESCE($3, description), \
             modified_by = $4, modified_at = NOW() WHERE id = $1 RETURNING {ROLE_COLUMNS}"
        );
        sqlx::query_as::<_, Role>(&query)
            .bind(id)
            .bind(changes.name.as_deref())
            .bind(changes.description.as_deref())
            .bind(modified_by)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| write_error(e, "role name"))
    }

    async fn delete_role(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PermissionStore for PostgresRepository {
    async fn list_permission_entries(&self) -> Result<Vec<PermissionEntry>, StoreError> {
        let query = format!("SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY route, role_id");
        Ok(sqlx::query_as::<_, PermissionEntry>(&query)
            .fetch_all(&self.pool)
            .await?)
    }

    /// Served by the `(role_id, route)` unique index.
    async fn read_permission(&self, role_id: &str, route: &str) -> Result<Option<PermissionEntry>, StoreError> {
        let query = format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE role_id = $1 AND route = $2");
        Ok(sqlx::query_as::<_, PermissionEntry>(&query)
            .bind(role_id)
            .bind(route)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Single-statement find-or-create / find-or-update. Concurrent callers for the
    /// same pair serialize on the unique index; the last writer wins.
    async fn upsert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        modified_by: &str,
    ) -> Result<PermissionEntry, StoreError> {
        let query = format!(
            "INSERT INTO permissions (id, role_id, route, permission, created_by, created_at, modified_by, modified_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), $5, NOW()) \
             ON CONFLICT (role_id, route) DO UPDATE SET \
                 permission = EXCLUDED.permission, \
                 modified_by = EXCLUDED.modified_by, \
                 modified_at = NOW() \
             RETURNING {PERMISSION_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, PermissionEntry>(&query)
            .bind(Uuid::new_v4().to_string())
            .bind(role_id)
            .bind(route)
            .bind(permission)
            .bind(modified_by)
            .fetch_one(&self.pool)
            .await?)
    }

    async fn insert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        created_by: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO permissions (id, role_id, route, permission, created_by, created_at, modified_by, modified_at) \
             VALUES ($1, $2, $3, $4, $5, NOW(), $5, NOW()) \
             ON CONFLICT (role_id, route) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(role_id)
        .bind(route)
        .bind(permission)
        .bind(created_by)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_permission(&self, id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl UserDirectory for PostgresRepository {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY username");
        Ok(sqlx::query_as::<_, User>(&query).fetch_all(&self.pool).await?)
    }

    async fn read_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn read_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_user(&self, username: &str, role_id: Option<&str>, created_by: &str) -> Result<User, StoreError> {
        let query = format!(
            "INSERT INTO users (id, username, role_id, created_by, created_at, modified_by, modified_at) \
             VALUES ($1, $2, $3, $4, NOW(), $4, NOW()) RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(Uuid::new_v4().to_string())
            .bind(username)
            .bind(role_id)
            .bind(created_by)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| write_error(e, &format!("user '{username}'")))
    }

    async fn assign_role(&self, id: &str, role_id: &str, modified_by: &str) -> Result<Option<User>, StoreError> {
        let query = format!(
            "UPDATE users SET role_id = $2, modified_by = $3, modified_at = NOW() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, User>(&query)
            .bind(id)
            .bind(role_id)
            .bind(modified_by)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionStore for PostgresRepository {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 AND expires_at > NOW()");
        Ok(sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let expires_at = expiry_from(Utc::now(), self.session_ttl);
        sqlx::query(
            "INSERT INTO sessions (id, remote_addr, host, username, role_id, pending_denied_route, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&session.id)
        .bind(&session.remote_addr)
        .bind(&session.host)
        .bind(&session.username)
        .bind(session.role_id.as_deref())
        .bind(session.pending_denied_route.as_deref())
        .bind(session.created_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Updates the row only while it is live; a destroyed or expired session stays gone.
    async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let expires_at = expiry_from(Utc::now(), self.session_ttl);
        sqlx::query(
            "UPDATE sessions SET role_id = $2, pending_denied_route = $3, expires_at = $4 \
             WHERE id = $1 AND expires_at > NOW()",
        )
        .bind(&session.id)
        .bind(session.role_id.as_deref())
        .bind(session.pending_denied_route.as_deref())
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn destroy(&self, id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>, StoreError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE expires_at > NOW() ORDER BY created_at, id"
        );
        Ok(sqlx::query_as::<_, Session>(&query).fetch_all(&self.pool).await?)
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
