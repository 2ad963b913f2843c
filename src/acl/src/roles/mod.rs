//! Role store
//!
//! Roles are named within a scope partition and assigned to users through
//! [`Mapping`] edges. A role may inherit from parent roles; the effective role
//! set of a user is expanded by [`RoleStore::all_roles`].

mod graph;

pub use graph::RoleGraph;

use crate::error::{AclError, Result};
use crate::repository::{Filter, Repositories, Repository};
use crate::types::{
    Batch, IdList, Mapping, Permission, Role, RoleId, RolePatch, RoleScope, UserId,
};
use futures::future::join_all;
use graph::InheritanceWalk;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Row counts removed by a role cascade
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRemoval {
    /// Permissions where the role was the subject
    pub permissions: usize,

    /// User assignment edges
    pub mappings: usize,

    /// Role rows
    pub roles: usize,
}

/// Roles, user assignments, and inheritance expansion
#[derive(Clone)]
pub struct RoleStore {
    roles: Arc<dyn Repository<Role>>,
    mappings: Arc<dyn Repository<Mapping>>,
    permissions: Arc<dyn Repository<Permission>>,
    max_depth: usize,
}

impl RoleStore {
    /// Create a store over the role, mapping, and permission repositories
    pub fn new(repos: &Repositories) -> Self {
        Self {
            roles: repos.roles.clone(),
            mappings: repos.mappings.clone(),
            permissions: repos.permissions.clone(),
            max_depth: 64,
        }
    }

    /// Limit the number of parent levels walked by [`Self::all_roles`]
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth.max(1);
        self
    }

    /// Create a role, or return the existing one with the same name and scope
    pub async fn create_role(&self, name: &str, scope: Option<&str>) -> Result<Role> {
        let filter = Filter::new()
            .eq(Role::NAME, name.to_string())
            .and(RoleScope::from(scope).filter());

        let (role, created) = self
            .roles
            .find_or_create(&filter, Role::new(name, scope))
            .await?;

        if created {
            info!("Created role '{}' ({}) in scope {}", role.name, role.id, RoleScope::from(scope));
        }
        Ok(role)
    }

    /// Look up a role by id
    pub async fn find_role(&self, role_id: &str) -> Result<Option<Role>> {
        self.roles.find_one(&Self::role_filter(role_id)).await
    }

    /// Look up a role by name within a scope partition
    ///
    /// # Errors
    ///
    /// [`AclError::InvalidArgument`] when the name matches roles in more than
    /// one partition, which only [`RoleScope::Any`] allows.
    pub async fn find_role_by_name(
        &self,
        name: &str,
        scope: impl Into<RoleScope>,
    ) -> Result<Option<Role>> {
        let scope: RoleScope = scope.into();
        let mut matches = self.find_roles_by_name(name, scope.clone()).await?;
        if matches.len() > 1 {
            return Err(AclError::invalid(format!(
                "role name '{}' is ambiguous in scope {} ({} matches)",
                name,
                scope,
                matches.len()
            )));
        }
        Ok(matches.pop())
    }

    /// Every role with this name in the scope, one per partition
    pub async fn find_roles_by_name(
        &self,
        name: &str,
        scope: impl Into<RoleScope>,
    ) -> Result<Vec<Role>> {
        let scope: RoleScope = scope.into();
        let filter = Filter::new()
            .eq(Role::NAME, name.to_string())
            .and(scope.filter());
        self.roles.find(&filter).await
    }

    /// Add parents to a role's inheritance list
    ///
    /// Returns `None` when the role does not exist.
    pub async fn add_role_parents(
        &self,
        role_id: &str,
        parents: impl Into<IdList>,
    ) -> Result<Option<Role>> {
        let parents: IdList = parents.into();
        self.patch_parents(role_id, |inherits| {
            for parent in parents.iter() {
                if !inherits.iter().any(|p| p == parent) {
                    inherits.push(parent.to_string());
                }
            }
        })
        .await
    }

    /// Remove parents from a role's inheritance list
    ///
    /// Returns `None` when the role does not exist.
    pub async fn remove_role_parents(
        &self,
        role_id: &str,
        parents: impl Into<IdList>,
    ) -> Result<Option<Role>> {
        let parents: IdList = parents.into();
        self.patch_parents(role_id, |inherits| {
            inherits.retain(|p| !parents.iter().any(|removed| removed == p));
        })
        .await
    }

    /// Inheritance cycles among the roles of a partition
    ///
    /// Cycles are legal and never break expansion; this is a diagnostic.
    pub async fn find_inheritance_cycles(
        &self,
        scope: impl Into<RoleScope>,
    ) -> Result<Vec<Vec<RoleId>>> {
        let scope: RoleScope = scope.into();
        let roles = self.roles.find(&scope.filter()).await?;
        Ok(RoleGraph::from_roles(&roles).find_cycles())
    }

    /// Roles directly assigned to a user within a scope partition
    pub async fn find_user_roles(
        &self,
        user: &str,
        scope: impl Into<RoleScope>,
    ) -> Result<Vec<Role>> {
        let mappings = self
            .mappings
            .find(&Filter::new().eq(Mapping::USER_ID, user.to_string()))
            .await?;

        if mappings.is_empty() {
            return Ok(Vec::new());
        }

        let scope: RoleScope = scope.into();
        let filter = scope
            .filter()
            .is_in(Role::ID, mappings.into_iter().map(|m| m.role_id));
        self.roles.find(&filter).await
    }

    /// Assign roles to a user; existing edges are left as they are
    pub async fn add_user_roles(&self, user: &str, roles: impl Into<IdList>) -> Batch<Mapping> {
        let roles: IdList = roles.into();
        let results = join_all(roles.iter().map(|role| self.assign(user, role))).await;
        Batch::new(results)
    }

    /// Unassign roles from a user, returning the number of edges removed
    pub async fn remove_user_roles(&self, user: &str, roles: impl Into<IdList>) -> Result<usize> {
        let roles: IdList = roles.into();
        if roles.is_empty() {
            return Ok(0);
        }

        let filter = Filter::new()
            .eq(Mapping::USER_ID, user.to_string())
            .is_in(Mapping::ROLE_ID, roles.into_vec());
        self.mappings.remove(&filter, None).await
    }

    /// Users assigned to a role
    pub async fn find_role_user_ids(&self, role_id: &str) -> Result<Vec<UserId>> {
        let mappings = self
            .mappings
            .find(&Filter::new().eq(Mapping::ROLE_ID, role_id.to_string()))
            .await?;
        Ok(mappings.into_iter().map(|m| m.user_id).collect())
    }

    /// Assign users to a role; existing edges are left as they are
    pub async fn add_role_users(&self, role_id: &str, users: impl Into<IdList>) -> Batch<Mapping> {
        let users: IdList = users.into();
        let results = join_all(users.iter().map(|user| self.assign(user, role_id))).await;
        Batch::new(results)
    }

    /// Unassign users from a role, returning the number of edges removed
    pub async fn remove_role_users(&self, role_id: &str, users: impl Into<IdList>) -> Result<usize> {
        let users: IdList = users.into();
        if users.is_empty() {
            return Ok(0);
        }

        let filter = Filter::new()
            .eq(Mapping::ROLE_ID, role_id.to_string())
            .is_in(Mapping::USER_ID, users.into_vec());
        self.mappings.remove(&filter, None).await
    }

    /// Whether the user has a direct assignment to any of the roles
    pub async fn has_role(&self, user: &str, roles: impl Into<IdList>) -> Result<bool> {
        let roles: IdList = roles.into();
        if roles.is_empty() {
            return Ok(false);
        }

        let filter = Filter::new()
            .eq(Mapping::USER_ID, user.to_string())
            .is_in(Mapping::ROLE_ID, roles.into_vec());
        Ok(self.mappings.count(&filter).await? > 0)
    }

    /// Whether the user is assigned the named role of a partition
    ///
    /// An unknown role name is `false`, not an error. With
    /// [`RoleScope::Any`] every partition's role of that name counts.
    pub async fn has_role_by_name(
        &self,
        user: &str,
        name: &str,
        scope: impl Into<RoleScope>,
    ) -> Result<bool> {
        let matches = self.find_roles_by_name(name, scope).await?;
        self.has_role(user, matches).await
    }

    /// Remove roles with their grants and assignments
    ///
    /// Accepts role ids or role rows. Permissions go first, then mappings,
    /// then the role rows. The steps are not transactional: a failure part
    /// way leaves the earlier steps applied. Other roles that list a removed
    /// one as a parent keep the dangling id, which expansion skips.
    pub async fn remove_role(&self, roles: impl Into<IdList>) -> Result<RoleRemoval> {
        let ids: IdList = roles.into();
        if ids.is_empty() {
            return Ok(RoleRemoval::default());
        }
        let ids = ids.into_vec();

        let subjects = Filter::new()
            .eq(Permission::SUBJECT_TYPE, Role::TYPE_NAME.to_string())
            .is_in(Permission::SUBJECT_ID, ids.clone());
        let permissions = self.permissions.remove(&subjects, None).await?;
        let mappings = self
            .mappings
            .remove(&Filter::new().is_in(Mapping::ROLE_ID, ids.clone()), None)
            .await?;
        let roles = self
            .roles
            .remove(&Filter::new().is_in(Role::ID, ids.clone()), None)
            .await?;

        let removal = RoleRemoval {
            permissions,
            mappings,
            roles,
        };
        info!(
            "Removed roles {:?}: {} permissions, {} mappings, {} roles",
            ids, removal.permissions, removal.mappings, removal.roles
        );
        Ok(removal)
    }

    /// Remove the named role of a partition, `None` if it does not exist
    ///
    /// A name matching roles in several partitions is rejected, see
    /// [`Self::find_role_by_name`].
    pub async fn remove_role_by_name(
        &self,
        name: &str,
        scope: impl Into<RoleScope>,
    ) -> Result<Option<RoleRemoval>> {
        match self.find_role_by_name(name, scope).await? {
            Some(role) => Ok(Some(self.remove_role(&role).await?)),
            None => Ok(None),
        }
    }

    /// Expand roles with everything they transitively inherit
    ///
    /// Each role appears once, even with diamonds or cycles. Parents outside
    /// the scope partition are left out (global parents are always shared),
    /// as are parents that no longer exist. If the depth limit is reached the
    /// deeper ancestors are absent from the result.
    pub async fn all_roles(&self, roles: Vec<Role>, scope: impl Into<RoleScope>) -> Result<Vec<Role>> {
        let scope: RoleScope = scope.into();
        let mut walk = InheritanceWalk::new(roles, &scope);

        for _ in 0..self.max_depth {
            let ids = match walk.frontier() {
                Some(ids) => ids,
                None => break,
            };
            let parents = self.roles.find(&Filter::new().is_in(Role::ID, ids)).await?;
            walk.absorb(parents);
        }

        if walk.has_pending() {
            warn!(
                "Role inheritance deeper than {} levels, ancestors were dropped",
                self.max_depth
            );
        }

        let roles = walk.finish();
        debug!("Expanded to {} effective roles in scope {}", roles.len(), scope);
        Ok(roles)
    }

    /// Direct roles of a user, expanded with inherited roles
    pub async fn all_user_roles(&self, user: &str, scope: impl Into<RoleScope>) -> Result<Vec<Role>> {
        let scope: RoleScope = scope.into();
        let direct = self.find_user_roles(user, scope.clone()).await?;
        self.all_roles(direct, scope).await
    }

    async fn assign(&self, user: &str, role_id: &str) -> Result<Mapping> {
        let (mapping, created) = self
            .mappings
            .find_or_create(&Mapping::edge(user, role_id), Mapping::new(user, role_id))
            .await?;

        if created {
            debug!("Assigned role {} to user {}", role_id, user);
        }
        Ok(mapping)
    }

    async fn patch_parents<F>(&self, role_id: &str, edit: F) -> Result<Option<Role>>
    where
        F: FnOnce(&mut Vec<RoleId>),
    {
        let mut role = match self.find_role(role_id).await? {
            Some(role) => role,
            None => return Ok(None),
        };

        let mut inherits = role.inherits.clone();
        edit(&mut inherits);
        if inherits == role.inherits {
            return Ok(Some(role));
        }

        let patch = RolePatch { inherits };
        self.roles
            .update_where(&Self::role_filter(role_id), &patch, None)
            .await?;
        role.inherits = patch.inherits;

        debug!("Role {} now inherits from {:?}", role_id, role.inherits);
        Ok(Some(role))
    }

    fn role_filter(role_id: &str) -> Filter {
        Filter::new().eq(Role::ID, role_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RoleStore {
        RoleStore::new(&Repositories::in_memory())
    }

    #[tokio::test]
    async fn test_create_role_is_idempotent_per_scope() {
        let roles = store();

        let admin = roles.create_role("admin", None).await.unwrap();
        let again = roles.create_role("admin", None).await.unwrap();
        let tenant = roles.create_role("admin", Some("tenant-a")).await.unwrap();

        assert_eq!(admin.id, again.id);
        assert_ne!(admin.id, tenant.id);
        assert_eq!(
            roles.find_role_by_name("admin", "tenant-a").await.unwrap(),
            Some(tenant)
        );

        assert_eq!(roles.find_roles_by_name("admin", RoleScope::Any).await.unwrap().len(), 2);
        let err = roles.find_role_by_name("admin", RoleScope::Any).await.unwrap_err();
        assert!(matches!(err, AclError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_user_role_assignment() {
        let roles = store();
        let admin = roles.create_role("admin", None).await.unwrap();
        let editor = roles.create_role("editor", Some("tenant-a")).await.unwrap();

        let batch = roles
            .add_user_roles("alice", vec![admin.clone(), editor.clone()])
            .await;
        assert!(batch.is_success());

        assert_eq!(roles.find_user_roles("alice", RoleScope::Any).await.unwrap().len(), 2);
        assert_eq!(
            roles.find_user_roles("alice", RoleScope::Global).await.unwrap(),
            vec![admin.clone()]
        );
        assert!(roles.has_role("alice", &editor.id).await.unwrap());

        assert_eq!(roles.remove_user_roles("alice", &admin).await.unwrap(), 1);
        assert!(!roles.has_role("alice", &admin.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_has_role_by_name_missing_role() {
        let roles = store();
        assert!(!roles
            .has_role_by_name("alice", "ghost", RoleScope::Global)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_parent_edits() {
        let roles = store();
        let base = roles.create_role("base", None).await.unwrap();
        let child = roles.create_role("child", None).await.unwrap();

        let updated = roles
            .add_role_parents(&child.id, &base)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.inherits, vec![base.id.clone()]);

        let stored = roles.find_role(&child.id).await.unwrap().unwrap();
        assert_eq!(stored.inherits, vec![base.id.clone()]);

        let cleared = roles
            .remove_role_parents(&child.id, &base)
            .await
            .unwrap()
            .unwrap();
        assert!(cleared.inherits.is_empty());

        assert!(roles.add_role_parents("missing", "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_depth_limit_truncates() {
        let roles = store().with_max_depth(1);
        let a = roles.create_role("a", None).await.unwrap();
        let b = roles.create_role("b", None).await.unwrap();
        let c = roles.create_role("c", None).await.unwrap();
        roles.add_role_parents(&b.id, &a).await.unwrap();
        let c = roles.add_role_parents(&c.id, &b).await.unwrap().unwrap();

        let effective = roles.all_roles(vec![c], RoleScope::Any).await.unwrap();
        let names: Vec<&str> = effective.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
    }
}
