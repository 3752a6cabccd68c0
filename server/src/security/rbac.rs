use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::error::SecurityError;
use crate::store::{SecurityStore, keys, with_timeout};

/// One resource with the actions a role may perform on it.
///
/// `"*"` as resource matches every resource; `"*"` as an action matches
/// every action on a matched resource.  There is no prefix or partial
/// matching — ambiguity here is a privilege-escalation risk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub actions: Vec<String>,
}

impl Permission {
    pub fn new(resource: &str, actions: &[&str]) -> Self {
        Self {
            resource: resource.to_string(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn grants(&self, resource: &str, action: &str) -> bool {
        if self.resource != "*" && self.resource != resource {
            return false;
        }
        self.actions.iter().any(|a| a == "*" || a == action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub permissions: Vec<Permission>,
    /// System roles are seeded at startup and immutable; mutating one is a
    /// hard error so misconfiguration is visible, never a silent no-op.
    pub system: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RoleError {
    #[error("role '{0}' is a system role and cannot be modified")]
    SystemRoleImmutable(String),

    #[error("role '{0}' does not exist")]
    NotFound(String),

    #[error("role '{0}' already exists")]
    AlreadyExists(String),
}

/// The role catalog plus per-user assignments.
///
/// Explicitly constructed and injected — never a process-global.  The
/// catalog is read-mostly: permission checks take the read lock on the
/// request hot path, role mutation takes the write lock outside it.
/// Assignments live in the shared store like all other mutable security
/// state.
pub struct RoleRegistry {
    catalog: RwLock<HashMap<String, Role>>,
    store: Arc<dyn SecurityStore>,
    store_timeout: Duration,
}

impl RoleRegistry {
    /// Build a registry seeded with the fixed system roles.
    ///
    /// guest < user < premium < moderator < admin < superadmin — informally
    /// nested, but each role lists its own full permission set explicitly;
    /// there is no inheritance to hide coupling in.
    pub fn with_system_roles(store: Arc<dyn SecurityStore>, store_timeout: Duration) -> Self {
        let mut catalog = HashMap::new();
        for role in system_roles() {
            catalog.insert(role.id.clone(), role);
        }
        info!(roles = catalog.len(), "role catalog seeded");
        Self {
            catalog: RwLock::new(catalog),
            store,
            store_timeout,
        }
    }

    /// Allow/deny for a set of role names against one (resource, action).
    ///
    /// Unknown role names are skipped — a stale assignment must degrade to
    /// "no extra rights", never to an error that blocks the request.
    pub async fn has_permission(&self, roles: &[String], resource: &str, action: &str) -> bool {
        let catalog = self.catalog.read().await;
        for name in roles {
            let Some(role) = catalog.get(name) else {
                debug!(role = %name, "unknown role in claim set");
                continue;
            };
            if role.permissions.iter().any(|p| p.grants(resource, action)) {
                return true;
            }
        }
        false
    }

    /// Ownership rule, layered above RBAC: the authenticated subject may
    /// act on a resource they own, OR hold a moderation override.  An
    /// OR-extension of RBAC, never a replacement.
    pub async fn allows_owner(
        &self,
        roles: &[String],
        subject: i64,
        owner: i64,
        resource: &str,
    ) -> bool {
        subject == owner || self.has_permission(roles, resource, "moderate").await
    }

    // ── Catalog mutation (custom roles only) ─────────────────────────────

    pub async fn create_role(&self, id: &str, permissions: Vec<Permission>) -> Result<(), RoleError> {
        let mut catalog = self.catalog.write().await;
        if catalog.contains_key(id) {
            return Err(RoleError::AlreadyExists(id.to_string()));
        }
        catalog.insert(
            id.to_string(),
            Role {
                id: id.to_string(),
                permissions,
                system: false,
            },
        );
        info!(role = id, "custom role created");
        Ok(())
    }

    pub async fn update_role(&self, id: &str, permissions: Vec<Permission>) -> Result<(), RoleError> {
        let mut catalog = self.catalog.write().await;
        let role = catalog
            .get_mut(id)
            .ok_or_else(|| RoleError::NotFound(id.to_string()))?;
        if role.system {
            warn!(role = id, "attempted update of a system role");
            return Err(RoleError::SystemRoleImmutable(id.to_string()));
        }
        role.permissions = permissions;
        info!(role = id, "custom role updated");
        Ok(())
    }

    pub async fn delete_role(&self, id: &str) -> Result<(), RoleError> {
        let mut catalog = self.catalog.write().await;
        match catalog.get(id) {
            None => Err(RoleError::NotFound(id.to_string())),
            Some(role) if role.system => {
                warn!(role = id, "attempted delete of a system role");
                Err(RoleError::SystemRoleImmutable(id.to_string()))
            }
            Some(_) => {
                catalog.remove(id);
                info!(role = id, "custom role deleted");
                Ok(())
            }
        }
    }

    pub async fn get_role(&self, id: &str) -> Option<Role> {
        self.catalog.read().await.get(id).cloned()
    }

    // ── Per-user assignment (store-backed) ───────────────────────────────

    /// Grant a role to a user.  Assignments are only ever created through
    /// this call — never inferred.
    pub async fn assign_role(&self, user_id: i64, role_id: &str) -> Result<(), SecurityError> {
        if self.get_role(role_id).await.is_none() {
            return Err(SecurityError::Internal(format!(
                "cannot assign unknown role '{}'",
                role_id
            )));
        }
        with_timeout(
            self.store_timeout,
            self.store.index_add(&keys::user_roles(user_id), role_id, None),
        )
        .await
        .map_err(SecurityError::from_store)?;
        info!(user_id, role = role_id, "role assigned");
        Ok(())
    }

    pub async fn unassign_role(&self, user_id: i64, role_id: &str) -> Result<(), SecurityError> {
        with_timeout(
            self.store_timeout,
            self.store.index_remove(&keys::user_roles(user_id), role_id),
        )
        .await
        .map_err(SecurityError::from_store)?;
        info!(user_id, role = role_id, "role unassigned");
        Ok(())
    }

    pub async fn roles_for_user(&self, user_id: i64) -> Result<Vec<String>, SecurityError> {
        with_timeout(
            self.store_timeout,
            self.store.index_members(&keys::user_roles(user_id)),
        )
        .await
        .map_err(SecurityError::from_store)
    }
}

/// The fixed system roles, each with its full permission set spelled out.
fn system_roles() -> Vec<Role> {
    let role = |id: &str, permissions: Vec<Permission>| Role {
        id: id.to_string(),
        permissions,
        system: true,
    };

    vec![
        role(
            "guest",
            vec![
                Permission::new("recipe", &["read"]),
                Permission::new("comment", &["read"]),
            ],
        ),
        role(
            "user",
            vec![
                Permission::new("recipe", &["read", "create"]),
                Permission::new("comment", &["read", "create"]),
                Permission::new("chat", &["read", "create"]),
                Permission::new("profile", &["read", "update"]),
            ],
        ),
        role(
            "premium",
            vec![
                Permission::new("recipe", &["read", "create", "import", "export"]),
                Permission::new("comment", &["read", "create"]),
                Permission::new("chat", &["read", "create"]),
                Permission::new("profile", &["read", "update"]),
            ],
        ),
        role(
            "moderator",
            vec![
                Permission::new("recipe", &["read", "create", "moderate"]),
                Permission::new("comment", &["read", "create", "moderate"]),
                Permission::new("chat", &["read", "create", "moderate"]),
                Permission::new("profile", &["read", "update"]),
                Permission::new("user", &["read"]),
            ],
        ),
        role(
            "admin",
            vec![
                Permission::new("recipe", &["read", "create", "update", "delete", "moderate"]),
                Permission::new("comment", &["read", "create", "update", "delete", "moderate"]),
                Permission::new("chat", &["read", "create", "update", "delete", "moderate"]),
                Permission::new("profile", &["read", "update", "delete"]),
                Permission::new("user", &["read", "create", "update", "delete"]),
                Permission::new("role", &["read", "create", "update", "delete"]),
                Permission::new("audit", &["read"]),
            ],
        ),
        role("superadmin", vec![Permission::new("*", &["*"])]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registry() -> RoleRegistry {
        RoleRegistry::with_system_roles(Arc::new(MemoryStore::new()), Duration::from_millis(200))
    }

    fn roles(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test]
    async fn superadmin_wildcard_grants_every_pair() {
        let reg = registry();
        for resource in ["recipe", "user", "role", "made-up-resource"] {
            for action in ["read", "create", "delete", "made-up-action"] {
                assert!(
                    reg.has_permission(&roles(&["superadmin"]), resource, action)
                        .await,
                    "superadmin denied {}:{}",
                    resource,
                    action
                );
            }
        }
    }

    #[tokio::test]
    async fn empty_and_unknown_roles_deny_everything() {
        let reg = registry();
        assert!(!reg.has_permission(&[], "recipe", "read").await);
        assert!(
            !reg.has_permission(&roles(&["no-such-role"]), "recipe", "read")
                .await
        );
    }

    #[tokio::test]
    async fn exact_membership_is_required_without_wildcards() {
        let reg = registry();
        let user = roles(&["user"]);
        assert!(reg.has_permission(&user, "recipe", "create").await);
        assert!(!reg.has_permission(&user, "recipe", "delete").await);
        assert!(!reg.has_permission(&user, "role", "create").await);
        // No prefix matching.
        assert!(!reg.has_permission(&user, "recipes", "read").await);
    }

    #[tokio::test]
    async fn any_granting_role_in_the_set_is_enough() {
        let reg = registry();
        let set = roles(&["guest", "moderator"]);
        assert!(reg.has_permission(&set, "comment", "moderate").await);
    }

    #[tokio::test]
    async fn system_roles_are_immutable_and_that_is_a_hard_error() {
        let reg = registry();
        for id in ["guest", "user", "admin", "superadmin"] {
            assert_eq!(
                reg.update_role(id, vec![]).await,
                Err(RoleError::SystemRoleImmutable(id.to_string()))
            );
            assert_eq!(
                reg.delete_role(id).await,
                Err(RoleError::SystemRoleImmutable(id.to_string()))
            );
        }
    }

    #[tokio::test]
    async fn custom_roles_can_be_created_updated_and_deleted() {
        let reg = registry();
        reg.create_role("recipe-bot", vec![Permission::new("recipe", &["read"])])
            .await
            .unwrap();
        assert_eq!(
            reg.create_role("recipe-bot", vec![]).await,
            Err(RoleError::AlreadyExists("recipe-bot".to_string()))
        );
        assert!(
            reg.has_permission(&roles(&["recipe-bot"]), "recipe", "read")
                .await
        );

        reg.update_role("recipe-bot", vec![Permission::new("recipe", &["read", "create"])])
            .await
            .unwrap();
        assert!(
            reg.has_permission(&roles(&["recipe-bot"]), "recipe", "create")
                .await
        );

        reg.delete_role("recipe-bot").await.unwrap();
        assert!(
            !reg.has_permission(&roles(&["recipe-bot"]), "recipe", "read")
                .await
        );
        assert_eq!(
            reg.delete_role("recipe-bot").await,
            Err(RoleError::NotFound("recipe-bot".to_string()))
        );
    }

    #[tokio::test]
    async fn assignments_roundtrip_through_the_store() {
        let reg = registry();
        reg.assign_role(42, "premium").await.unwrap();
        reg.assign_role(42, "moderator").await.unwrap();

        let mut assigned = reg.roles_for_user(42).await.unwrap();
        assigned.sort();
        assert_eq!(assigned, vec!["moderator", "premium"]);

        reg.unassign_role(42, "premium").await.unwrap();
        assert_eq!(reg.roles_for_user(42).await.unwrap(), vec!["moderator"]);

        // Unknown roles cannot be assigned.
        assert!(reg.assign_role(42, "no-such-role").await.is_err());
    }

    #[tokio::test]
    async fn ownership_is_an_or_extension_of_rbac() {
        let reg = registry();
        // Owner may act without any moderation permission.
        assert!(reg.allows_owner(&roles(&["user"]), 42, 42, "recipe").await);
        // Non-owner without override is denied.
        assert!(!reg.allows_owner(&roles(&["user"]), 42, 7, "recipe").await);
        // Non-owner with the moderation override is allowed.
        assert!(
            reg.allows_owner(&roles(&["moderator"]), 42, 7, "recipe")
                .await
        );
    }
}
