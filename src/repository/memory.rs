use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{PermissionStore, RoleDirectory, UserDirectory};
use crate::{
    error::StoreError,
    models::{PermissionEntry, Role, UpdateRoleRequest, User},
};

/// MemoryRepository
///
/// In-process implementation of every directory trait, used when no database is
/// configured in local mode and as the backing store for tests.
///
/// Each map sits behind its own async `RwLock`; a write guard is held for the whole
/// of any find-then-modify so upserts stay atomic per `(role_id, route)` pair.
#[derive(Default)]
pub struct MemoryRepository {
    roles: RwLock<BTreeMap<String, Role>>,
    // Keyed by the natural key so reads on the enforcement path are a single lookup.
    permissions: RwLock<BTreeMap<(String, String), PermissionEntry>>,
    users: RwLock<BTreeMap<String, User>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a role with a caller-chosen id, replacing any role with the same id.
    pub async fn seed_role(&self, role: Role) {
        self.roles.write().await.insert(role.id.clone(), role);
    }

    /// Inserts a matrix entry directly, bypassing the upsert path.
    pub async fn seed_permission(&self, role_id: &str, route: &str, permission: bool) -> PermissionEntry {
        let now = Utc::now();
        let entry = PermissionEntry {
            id: Uuid::new_v4().to_string(),
            role_id: role_id.to_string(),
            route: route.to_string(),
            permission,
            created_by: "seed".to_string(),
            created_at: now,
            modified_by: "seed".to_string(),
            modified_at: now,
        };
        self.permissions
            .write()
            .await
            .insert((entry.role_id.clone(), entry.route.clone()), entry.clone());
        entry
    }
}

#[async_trait]
impl RoleDirectory for MemoryRepository {
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let mut roles: Vec<Role> = self.roles.read().await.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn read_role(&self, id: &str) -> Result<Option<Role>, StoreError> {
        Ok(self.roles.read().await.get(id).cloned())
    }

    async fn read_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        Ok(self.roles.read().await.values().find(|role| role.name == name).cloned())
    }

    async fn create_role(&self, name: &str, description: &str, created_by: &str) -> Result<Role, StoreError> {
        let mut roles = self.roles.write().await;
        if roles.values().any(|role| role.name == name) {
            return Err(StoreError::Conflict(format!("role '{name}' already exists")));
        }
        let role = Role::new(Uuid::new_v4().to_string(), name, description, created_by);
        roles.insert(role.id.clone(), role.clone());
        Ok(role)
    }

    async fn update_role(
        &self,
        id: &str,
        changes: UpdateRoleRequest,
        modified_by: &str,
    ) -> Result<Option<Role>, StoreError> {
        let mut roles = self.roles.write().await;
        if let Some(name) = &changes.name {
            if roles.values().any(|role| role.id != id && &role.name == name) {
                return Err(StoreError::Conflict(format!("role '{name}' already exists")));
            }
        }
        let Some(role) = roles.get_mut(id) else {
            return Ok(None);
        };
        if let Some(name) = changes.name {
            role.name = name;
        }
        if let Some(description) = changes.description {
            role.description = description;
        }
        role.modified_by = modified_by.to_string();
        role.modified_at = Utc::now();
        Ok(Some(role.clone()))
    }

    async fn delete_role(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.roles.write().await.remove(id).is_some())
    }
}

#[async_trait]
impl PermissionStore for MemoryRepository {
    async fn list_permission_entries(&self) -> Result<Vec<PermissionEntry>, StoreError> {
        Ok(self.permissions.read().await.values().cloned().collect())
    }

    async fn read_permission(&self, role_id: &str, route: &str) -> Result<Option<PermissionEntry>, StoreError> {
        let key = (role_id.to_string(), route.to_string());
        Ok(self.permissions.read().await.get(&key).cloned())
    }

    async fn upsert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        modified_by: &str,
    ) -> Result<PermissionEntry, StoreError> {
        let now = Utc::now();
        let mut permissions = self.permissions.write().await;
        let entry = permissions
            .entry((role_id.to_string(), route.to_string()))
            .and_modify(|entry| {
                entry.permission = permission;
                entry.modified_by = modified_by.to_string();
                entry.modified_at = now;
            })
            .or_insert_with(|| PermissionEntry {
                id: Uuid::new_v4().to_string(),
                role_id: role_id.to_string(),
                route: route.to_string(),
                permission,
                created_by: modified_by.to_string(),
                created_at: now,
                modified_by: modified_by.to_string(),
                modified_at: now,
            });
        Ok(entry.clone())
    }

    async fn insert_permission(
        &self,
        role_id: &str,
        route: &str,
        permission: bool,
        created_by: &str,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut inserted = false;
        self.permissions
            .write()
            .await
            .entry((role_id.to_string(), route.to_string()))
            .or_insert_with(|| {
                inserted = true;
                PermissionEntry {
                    id: Uuid::new_v4().to_string(),
                    role_id: role_id.to_string(),
                    route: route.to_string(),
                    permission,
                    created_by: created_by.to_string(),
                    created_at: now,
                    modified_by: created_by.to_string(),
                    modified_at: now,
                }
            });
        Ok(inserted)
    }

    async fn delete_permission(&self, id: &str) -> Result<u64, StoreError> {
        let mut permissions = self.permissions.write().await;
        let before = permissions.len();
        permissions.retain(|_, entry| entry.id != id);
        Ok((before - permissions.len()) as u64)
    }
}

#[async_trait]
impl UserDirectory for MemoryRepository {
    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn read_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn read_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    async fn create_user(&self, username: &str, role_id: Option<&str>, created_by: &str) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|user| user.username == username) {
            return Err(StoreError::Conflict(format!("user '{username}' already exists")));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            role_id: role_id.map(str::to_string),
            created_by: created_by.to_string(),
            created_at: now,
            modified_by: created_by.to_string(),
            modified_at: now,
        };
        users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    async fn assign_role(&self, id: &str, role_id: &str, modified_by: &str) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(id) else {
            return Ok(None);
        };
        user.role_id = Some(role_id.to_string());
        user.modified_by = modified_by.to_string();
        user.modified_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.users.write().await.remove(id).is_some())
    }
}
