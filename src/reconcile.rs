use std::{collections::HashSet, time::Duration};

use serde::Serialize;

use crate::{
    error::{ReconcileError, StoreError},
    models::Role,
    registry::RouteRegistry,
    repository::{PermissionStoreState, RoleDirectory, RoleDirectoryState, bounded},
};

/// Actor recorded in audit fields for writes made by the service itself.
pub const SYSTEM_ACTOR: &str = "System";

pub const ADMIN_ROLE: &str = "Admin";
pub const READ_ONLY_ROLE: &str = "Read Only";

/// Routes a freshly reconciled "Read Only" role may use: landing page, listings and
/// single-record views. Everything that mutates stays locked down.
pub const READ_ONLY_ROUTES: &[&str] = &[
    "/home",
    "/role/list",
    "/role/read/{id}",
    "/user/list",
    "/user/read/{id}",
];

pub fn is_builtin_role(name: &str) -> bool {
    name == ADMIN_ROLE || name == READ_ONLY_ROLE
}

/// default_permission
///
/// Fail-closed default for a pair the matrix has never seen: Admin gets every route,
/// Read Only gets the safe list, every other role gets nothing.
pub fn default_permission(role: &Role, route: &str) -> bool {
    match role.name.as_str() {
        ADMIN_ROLE => true,
        READ_ONLY_ROLE => READ_ONLY_ROUTES.contains(&route),
        _ => false,
    }
}

/// ReconcileReport
///
/// What one pass changed. A pass over an already consistent matrix reports zero for both.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub upserted: usize,
    pub deleted: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.upserted == 0 && self.deleted == 0
    }

    fn abort(self, source: StoreError) -> ReconcileError {
        ReconcileError {
            upserted: self.upserted,
            deleted: self.deleted,
            source,
        }
    }
}

/// Reconciler
///
/// Brings the persisted permission matrix into agreement with
/// `{declared routes} x {current roles}`:
///
/// 1. entries whose role no longer exists are deleted;
/// 2. every missing `(role, route)` pair is inserted with its default permission.
///
/// Entries that already exist are never rewritten, so administrator edits survive and
/// a second pass with no intervening change is a no-op. The pass is not atomic: readers
/// may observe a half-filled matrix, which enforcement treats as deny.
///
/// Passes may overlap (startup, several role mutations, several instances). The entry
/// snapshot is taken before the role snapshot: role ids are never reused, so an entry
/// whose role is absent from the later snapshot belongs to a role that was really
/// deleted. Gap filling goes through `insert_permission`, which leaves a row written
/// in the meantime alone.
#[derive(Clone)]
pub struct Reconciler {
    roles: RoleDirectoryState,
    permissions: PermissionStoreState,
    registry: RouteRegistry,
    timeout: Duration,
}

impl Reconciler {
    pub fn new(
        roles: RoleDirectoryState,
        permissions: PermissionStoreState,
        registry: RouteRegistry,
        timeout: Duration,
    ) -> Self {
        Self {
            roles,
            permissions,
            registry,
            timeout,
        }
    }

    /// reconcile
    ///
    /// Runs one full pass. The first store failure aborts the pass and is returned with
    /// the counts applied so far; re-running the pass completes the repair.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ReconcileError> {
        let mut report = ReconcileReport::default();

        let entries = bounded(
            self.timeout,
            "list_permission_entries",
            self.permissions.list_permission_entries(),
        )
        .await
        .map_err(|e| report.abort(e))?;
        let roles = bounded(self.timeout, "list_roles", self.roles.list_roles())
            .await
            .map_err(|e| report.abort(e))?;

        let live_roles: HashSet<&str> = roles.iter().map(|role| role.id.as_str()).collect();

        // Orphan removal.
        for entry in entries.iter().filter(|entry| !live_roles.contains(entry.role_id.as_str())) {
            let removed = bounded(
                self.timeout,
                "delete_permission",
                self.permissions.delete_permission(&entry.id),
            )
            .await
            .map_err(|e| report.abort(e))?;
            tracing::debug!(role_id = %entry.role_id, route = %entry.route, "removed orphaned permission");
            report.deleted += removed as usize;
        }

        // Gap filling.
        let present: HashSet<(&str, &str)> = entries
            .iter()
            .filter(|entry| live_roles.contains(entry.role_id.as_str()))
            .map(|entry| (entry.role_id.as_str(), entry.route.as_str()))
            .collect();

        for route in self.registry.list_routes() {
            for role in &roles {
                if present.contains(&(role.id.as_str(), route.as_str())) {
                    continue;
                }
                let permission = default_permission(role, route);
                let inserted = bounded(
                    self.timeout,
                    "insert_permission",
                    self.permissions
                        .insert_permission(&role.id, route, permission, SYSTEM_ACTOR),
                )
                .await
                .map_err(|e| report.abort(e))?;
                if inserted {
                    tracing::debug!(role = %role.name, %route, permission, "added missing permission");
                    report.upserted += 1;
                }
            }
        }

        tracing::info!(
            roles = roles.len(),
            routes = self.registry.len(),
            upserted = report.upserted,
            deleted = report.deleted,
            "permission matrix reconciled"
        );
        Ok(report)
    }
}

/// seed_builtin_roles
///
/// Ensures "Admin" and "Read Only" exist before the first reconciliation so the
/// matrix always has rows for them. Existing roles are left untouched.
pub async fn seed_builtin_roles(directory: &dyn RoleDirectory) -> Result<Vec<Role>, StoreError> {
    let builtins = [
        (ADMIN_ROLE, "Administrative Role (Built-In)"),
        (READ_ONLY_ROLE, "Read Only Role (Built-In)"),
    ];

    let mut seeded = Vec::with_capacity(builtins.len());
    for (name, description) in builtins {
        let role = match directory.read_role_by_name(name).await? {
            Some(role) => role,
            None => {
                tracing::info!(role = name, "creating built-in role");
                match directory.create_role(name, description, SYSTEM_ACTOR).await {
                    Ok(role) => role,
                    // Another instance seeded it between our read and create.
                    Err(StoreError::Conflict(_)) => directory
                        .read_role_by_name(name)
                        .await?
                        .ok_or_else(|| StoreError::Unavailable(format!("built-in role {name} vanished")))?,
                    Err(e) => return Err(e),
                }
            }
        };
        seeded.push(role);
    }
    Ok(seeded)
}
