use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    error::StoreError,
    models::{PermissionEntry, Role, UpdateRoleRequest, User},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// RoleDirectory
///
/// Authoritative list of roles. The reconciler only reads it; role management
/// handlers mutate it and then trigger reconciliation.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;
    async fn read_role(&self, id: &str) -> Result<Option<Role>, StoreError>;
    async fn read_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;
    // Fails with `StoreError::Conflict` when the name is already taken.
    async fn create_role(&self, name: &str, description: &str, created_by: &str) -> Result<Role, StoreError>;
    async fn update_role(
        &self,
        id: &str,
        changes: UpdateRoleRequest,
        modified_by: &str,
    ) -> Result<Option<Role>, StoreError>;
    async fn delete_role(&self, id: &str) -> Result<bool, StoreError>;
}

/// PermissionStore
///
/// The persisted permission matrix, keyed by `(role_id, route)`.
///
/// `upsert_permission` is the serialization point for a pair: implementations must
/// perform find-or-create / find-or-update as one atomic operation so concurrent
/// reconciliations can never produce duplicate entries.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn list_permission_entries(&self) -> Result<Vec<PermissionEntry>, StoreError>;
    // Hot path: called once per protected request.
    async fn read_permission(&self, role_id: &str, route: &str) -> Result<Option<PermissionEntry>, StoreError>;
    async fn upsert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        modified_by: &str,
    ) -> Result<PermissionEntry, StoreError>;
    /// Creates the entry only when the pair has none; an existing entry is left as is.
    /// Returns whether a row was written. Reconciliation fills gaps through this so a
    /// concurrent administrator edit is never replaced by a default.
    async fn insert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        created_by: &str,
    ) -> Result<bool, StoreError>;
    // Returns the number of rows removed (0 when the id is already gone).
    async fn delete_permission(&self, id: &str) -> Result<u64, StoreError>;
}

/// UserDirectory
///
/// Accounts known to the service and the role each one holds.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
    async fn read_user(&self, id: &str) -> Result<Option<User>, StoreError>;
    async fn read_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn create_user(&self, username: &str, role_id: Option<&str>, created_by: &str) -> Result<User, StoreError>;
    async fn assign_role(&self, id: &str, role_id: &str, modified_by: &str) -> Result<Option<User>, StoreError>;
    async fn delete_user(&self, id: &str) -> Result<bool, StoreError>;
}

pub type RoleDirectoryState = Arc<dyn RoleDirectory>;
pub type PermissionStoreState = Arc<dyn PermissionStore>;
pub type UserDirectoryState = Arc<dyn UserDirectory>;

/// bounded
///
/// Runs one store call under a deadline, converting an elapsed timer into
/// `StoreError::Timeout`. Dropping the returned future cancels the call.
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout { operation, limit }),
    }
}
