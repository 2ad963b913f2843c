//! Permission store: grants of action sets to subject/resource pairs
//!
//! `allow` unions actions into a grant and registers them in the resource's
//! ability vocabulary. `disallow` takes actions away from a grant only; the
//! vocabulary never shrinks.
//!
//! Grant rows are versioned. A write that lost to a concurrent writer re-reads
//! the row and recomputes, so neither a revocation nor a grant is lost.

use crate::abilities::AbilityRegistry;
use crate::error::{AclError, Result};
use crate::identity::{Identity, Reference, References};
use crate::repository::{Entity, Filter, Repository};
use crate::types::{resolve_typed, ActionSet, Batch, Permission, PermissionPatch, Role, RoleId};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Grants keyed by `(subject, resource)`
#[derive(Clone)]
pub struct PermissionStore {
    repo: Arc<dyn Repository<Permission>>,
    abilities: AbilityRegistry,
    conflict_retries: usize,
}

impl PermissionStore {
    /// Create a store over a permission repository and the ability registry
    pub fn new(repo: Arc<dyn Repository<Permission>>, abilities: AbilityRegistry) -> Self {
        Self {
            repo,
            abilities,
            conflict_retries: 3,
        }
    }

    /// Attempts per grant before a contended write gives up with a conflict
    pub fn with_conflict_retries(mut self, attempts: usize) -> Self {
        self.conflict_retries = attempts.max(1);
        self
    }

    /// Exact grant lookup
    pub async fn find_permission(
        &self,
        subject: impl Into<Reference>,
        resource: impl Into<Reference>,
    ) -> Result<Option<Permission>> {
        let subject = resolve_typed(&subject.into(), "permission subject")?;
        let resource = resolve_typed(&resource.into(), "permission resource")?;
        self.repo.find_one(&Self::key_filter(&subject, &resource)).await
    }

    /// Grant actions on each resource
    ///
    /// Every resource is handled independently and reported in the batch. The
    /// ability vocabulary grows first; a concurrent vocabulary update fails
    /// that item with a conflict and leaves its grant untouched. A concurrent
    /// change to the grant itself is merged by re-reading.
    ///
    /// # Errors
    ///
    /// Fails as a whole when the subject is not a typed reference or no
    /// actions are given.
    pub async fn allow(
        &self,
        subject: impl Into<Reference>,
        resources: impl Into<References>,
        actions: impl Into<ActionSet>,
    ) -> Result<Batch<Permission>> {
        let subject = resolve_typed(&subject.into(), "permission subject")?;
        let actions: ActionSet = actions.into();
        if actions.is_empty() {
            return Err(AclError::invalid("no actions to allow"));
        }
        let resources: References = resources.into();

        let results = join_all(
            resources
                .iter()
                .map(|resource| self.allow_one(&subject, resource, &actions)),
        )
        .await;
        Ok(Batch::new(results))
    }

    /// Revoke actions on each resource
    ///
    /// Resources without an ability row are skipped. An item yields the
    /// remaining grant, or `None` when there was none or it became empty and
    /// was deleted.
    pub async fn disallow(
        &self,
        subject: impl Into<Reference>,
        resources: impl Into<References>,
        actions: impl Into<ActionSet>,
    ) -> Result<Batch<Option<Permission>>> {
        let subject = resolve_typed(&subject.into(), "permission subject")?;
        let actions: ActionSet = actions.into();
        let resources: References = resources.into();

        let results = join_all(
            resources
                .iter()
                .map(|resource| self.disallow_one(&subject, resource, &actions)),
        )
        .await;
        Ok(Batch::new(results))
    }

    /// Delete every grant on a resource, whatever the subject
    ///
    /// The wildcard matches every resource.
    pub async fn remove_resource_permissions(&self, resource: impl Into<Reference>) -> Result<usize> {
        let resource: Reference = resource.into();
        let filter = Permission::RESOURCE
            .filter(&resource, false)?
            .unwrap_or_default();

        let removed = self.repo.remove(&filter, None).await?;
        info!("Removed {} permissions on {}", removed, resource);
        Ok(removed)
    }

    /// Union of the actions granted to any of the roles on the resource
    ///
    /// No roles, or a wildcard resource, yields the empty set.
    pub async fn resource_permissions(
        &self,
        role_ids: &[RoleId],
        resource: &Reference,
    ) -> Result<ActionSet> {
        if role_ids.is_empty() {
            return Ok(ActionSet::new());
        }

        let resource_filter = match Permission::RESOURCE.filter(resource, false)? {
            Some(filter) => filter,
            None => return Ok(ActionSet::new()),
        };

        let filter = Filter::new()
            .eq(Permission::SUBJECT_TYPE, Role::TYPE_NAME.to_string())
            .is_in(Permission::SUBJECT_ID, role_ids.iter().cloned())
            .and(resource_filter);

        let mut granted = ActionSet::new();
        for permission in self.repo.find(&filter).await? {
            granted.extend(&permission.actions);
        }
        Ok(granted)
    }

    async fn allow_one(
        &self,
        subject: &Identity,
        resource: &Reference,
        actions: &ActionSet,
    ) -> Result<Permission> {
        let resource = resolve_typed(resource, "permission resource")?;
        self.abilities.add_actions(&resource, actions.clone()).await?;

        let filter = Self::key_filter(subject, &resource);
        let mut seen = 0;
        for _ in 0..self.conflict_retries {
            let (current, created) = self
                .repo
                .find_or_create(&filter, Permission::new(subject, &resource, actions.clone()))
                .await?;

            if created {
                debug!("Granted {} on {} to {}", actions, resource, subject);
                return Ok(current);
            }

            let union = current.actions.union(actions);
            if union == current.actions {
                return Ok(current);
            }

            seen = current.version;
            if let Some(next) = self.replace_actions(current, union, &filter).await? {
                return Ok(next);
            }
        }

        Err(Self::contended(subject, &resource, seen))
    }

    async fn disallow_one(
        &self,
        subject: &Identity,
        resource: &Reference,
        actions: &ActionSet,
    ) -> Result<Option<Permission>> {
        let resource = resolve_typed(resource, "permission resource")?;
        if self.abilities.find_by_resource(&resource).await?.is_none() {
            debug!("No ability registered for {}, nothing to revoke", resource);
            return Ok(None);
        }

        let filter = Self::key_filter(subject, &resource);
        let mut seen = 0;
        for _ in 0..self.conflict_retries {
            let current = match self.repo.find_one(&filter).await? {
                Some(current) => current,
                None => return Ok(None),
            };

            let remaining = current.actions.difference(actions);
            if remaining == current.actions {
                return Ok(Some(current));
            }

            seen = current.version;
            if remaining.is_empty() {
                if self.repo.remove(&filter, Some(current.version)).await? > 0 {
                    debug!("Revoked last actions on {} from {}", resource, subject);
                    return Ok(None);
                }
                continue;
            }

            if let Some(next) = self.replace_actions(current, remaining, &filter).await? {
                return Ok(Some(next));
            }
        }

        Err(Self::contended(subject, &resource, seen))
    }

    /// Commit a new action set if the grant is still at the version read
    ///
    /// `None` means another writer got there first and the caller must
    /// re-read.
    async fn replace_actions(
        &self,
        current: Permission,
        actions: ActionSet,
        filter: &Filter,
    ) -> Result<Option<Permission>> {
        let patch = PermissionPatch { actions };
        let updated = self
            .repo
            .update_where(filter, &patch, Some(current.version))
            .await?;

        if updated == 0 {
            debug!(
                "Grant {} on {} moved past version {}, re-reading",
                current.subject(),
                current.resource(),
                current.version
            );
            return Ok(None);
        }

        let mut next = current;
        next.apply(&patch);
        debug!(
            "Grant {} on {} is now {} at version {}",
            next.subject(),
            next.resource(),
            next.actions,
            next.version
        );
        Ok(Some(next))
    }

    fn contended(subject: &Identity, resource: &Identity, expected_version: u64) -> AclError {
        warn!(
            "Grant {} on {} kept moving, giving up after version {}",
            subject, resource, expected_version
        );
        AclError::Conflict {
            resource: format!("{} on {}", subject, resource),
            expected_version,
        }
    }

    fn key_filter(subject: &Identity, resource: &Identity) -> Filter {
        Permission::SUBJECT
            .filter_for(subject)
            .and(Permission::RESOURCE.filter_for(resource))
    }
}
