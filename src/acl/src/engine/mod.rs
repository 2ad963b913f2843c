//! Authorization engine
//!
//! Orchestrates role expansion and permission aggregation to answer access
//! questions. Every path that cannot positively establish a grant answers
//! "not allowed".

pub mod metrics;

pub use metrics::{AclMetrics, MetricsCollector};

use crate::abilities::AbilityRegistry;
use crate::config::AclConfig;
use crate::error::Result;
use crate::identity::{Reference, References};
use crate::permissions::PermissionStore;
use crate::repository::Repositories;
use crate::roles::{RoleRemoval, RoleStore};
use crate::types::{ActionSet, Batch, IdList, Mapping, Permission, Role, RoleId, RoleScope, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Role-based access control engine
///
/// # Architecture
///
/// ```text
/// user → RoleStore (direct roles) → RoleStore::all_roles (inheritance)
///                                        ↓
///        PermissionStore (union of grants per resource) → subset test
/// ```
#[derive(Clone)]
pub struct AclEngine {
    /// Role and assignment storage with inheritance expansion
    roles: RoleStore,

    /// Action vocabularies
    abilities: AbilityRegistry,

    /// Subject grants
    permissions: PermissionStore,

    /// Decision metrics
    metrics: Option<Arc<MetricsCollector>>,

    /// Engine configuration
    config: AclConfig,
}

impl AclEngine {
    /// Create an engine over injected repositories
    ///
    /// # Errors
    ///
    /// Returns [`crate::AclError::Config`] if the configuration is invalid.
    pub fn new(config: AclConfig, repos: Repositories) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, repos))
    }

    /// Engine with default configuration over fresh in-memory repositories
    pub fn in_memory() -> Self {
        Self::build(AclConfig::default(), Repositories::in_memory())
    }

    fn build(config: AclConfig, repos: Repositories) -> Self {
        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        let abilities = AbilityRegistry::new(repos.abilities.clone())
            .with_conflict_retries(config.conflict_retries)
            .with_metrics(metrics.clone());
        let permissions = PermissionStore::new(repos.permissions.clone(), abilities.clone())
            .with_conflict_retries(config.conflict_retries);
        let roles = RoleStore::new(&repos).with_max_depth(config.max_inheritance_depth);

        info!(
            "AclEngine initialized with metrics={}, max_inheritance_depth={}",
            config.enable_metrics, config.max_inheritance_depth
        );

        Self {
            roles,
            abilities,
            permissions,
            metrics,
            config,
        }
    }

    /// Ability registry
    pub fn abilities(&self) -> &AbilityRegistry {
        &self.abilities
    }

    /// Role store
    pub fn roles(&self) -> &RoleStore {
        &self.roles
    }

    /// Permission store
    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    /// Active configuration
    pub fn config(&self) -> &AclConfig {
        &self.config
    }

    /// Metrics snapshot, `None` when metrics are disabled
    pub async fn get_metrics(&self) -> Option<AclMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Metrics in Prometheus text format, `None` when metrics are disabled
    pub async fn export_metrics(&self) -> Option<String> {
        match &self.metrics {
            Some(metrics) => Some(metrics.export_prometheus().await),
            None => None,
        }
    }

    /// Roles directly assigned to a user
    pub async fn find_user_roles(&self, user: &str, scope: impl Into<RoleScope>) -> Result<Vec<Role>> {
        self.roles.find_user_roles(user, scope).await
    }

    /// Assign roles to a user
    pub async fn add_user_roles(&self, user: &str, roles: impl Into<IdList>) -> Batch<Mapping> {
        self.roles.add_user_roles(user, roles).await
    }

    /// Unassign roles from a user
    pub async fn remove_user_roles(&self, user: &str, roles: impl Into<IdList>) -> Result<usize> {
        self.roles.remove_user_roles(user, roles).await
    }

    /// Users assigned to a role
    pub async fn find_role_user_ids(&self, role_id: &str) -> Result<Vec<UserId>> {
        self.roles.find_role_user_ids(role_id).await
    }

    /// Assign users to a role
    pub async fn add_role_users(&self, role_id: &str, users: impl Into<IdList>) -> Batch<Mapping> {
        self.roles.add_role_users(role_id, users).await
    }

    /// Unassign users from a role
    pub async fn remove_role_users(&self, role_id: &str, users: impl Into<IdList>) -> Result<usize> {
        self.roles.remove_role_users(role_id, users).await
    }

    /// Direct roles of a user expanded with inherited roles
    pub async fn all_user_roles(&self, user: &str, scope: impl Into<RoleScope>) -> Result<Vec<Role>> {
        self.roles.all_user_roles(user, scope).await
    }

    /// Expand roles with everything they transitively inherit
    pub async fn all_roles(&self, roles: Vec<Role>, scope: impl Into<RoleScope>) -> Result<Vec<Role>> {
        self.roles.all_roles(roles, scope).await
    }

    /// Whether the user has a direct assignment to any of the roles
    pub async fn has_role(&self, user: &str, roles: impl Into<IdList>) -> Result<bool> {
        self.roles.has_role(user, roles).await
    }

    /// Whether the user is assigned the named role of a partition
    pub async fn has_role_by_name(
        &self,
        user: &str,
        name: &str,
        scope: impl Into<RoleScope>,
    ) -> Result<bool> {
        self.roles.has_role_by_name(user, name, scope).await
    }

    /// Remove roles with their grants and assignments
    pub async fn remove_role(&self, roles: impl Into<IdList>) -> Result<RoleRemoval> {
        self.roles.remove_role(roles).await
    }

    /// Remove the named role of a partition
    pub async fn remove_role_by_name(
        &self,
        name: &str,
        scope: impl Into<RoleScope>,
    ) -> Result<Option<RoleRemoval>> {
        self.roles.remove_role_by_name(name, scope).await
    }

    /// Delete every grant on a resource
    pub async fn remove_resource_permissions(&self, resource: impl Into<Reference>) -> Result<usize> {
        self.permissions.remove_resource_permissions(resource).await
    }

    /// Grant actions on resources to a subject
    pub async fn allow(
        &self,
        subject: impl Into<Reference>,
        resources: impl Into<References>,
        actions: impl Into<ActionSet>,
    ) -> Result<Batch<Permission>> {
        self.permissions.allow(subject, resources, actions).await
    }

    /// Revoke actions on resources from a subject
    pub async fn disallow(
        &self,
        subject: impl Into<Reference>,
        resources: impl Into<References>,
        actions: impl Into<ActionSet>,
    ) -> Result<Batch<Option<Permission>>> {
        self.permissions.disallow(subject, resources, actions).await
    }

    /// Actions the user may perform on each resource
    ///
    /// Keyed by the canonical `Type:id` (or `Type`) of each resource. A
    /// wildcard resource is keyed `*` and maps to the empty set.
    pub async fn allowed_permissions(
        &self,
        user: &str,
        resources: impl Into<References>,
    ) -> Result<HashMap<String, ActionSet>> {
        let resources: References = resources.into();
        let role_ids = Self::role_ids(&self.all_user_roles(user, RoleScope::Any).await?);

        let mut allowed = HashMap::with_capacity(resources.len());
        for resource in resources {
            let key = match resource.resolve(false)? {
                Some(identity) => identity.to_string(),
                None => resource.to_string(),
            };
            let actions = self.permissions.resource_permissions(&role_ids, &resource).await?;
            allowed.entry(key).or_insert_with(ActionSet::new).extend(&actions);
        }

        debug!("Allowed permissions for {}: {} resources", user, allowed.len());
        Ok(allowed)
    }

    /// Whether the user may perform every requested action on the resource
    pub async fn is_allowed(
        &self,
        user: &str,
        resource: impl Into<Reference>,
        actions: impl Into<ActionSet>,
    ) -> Result<bool> {
        let start = Instant::now();
        let resource: Reference = resource.into();
        let actions: ActionSet = actions.into();

        let roles = match self.all_user_roles(user, RoleScope::Any).await {
            Ok(roles) => roles,
            Err(err) => {
                self.record_error().await;
                return Err(err);
            }
        };
        debug!("User {} resolved to {} effective roles", user, roles.len());

        self.decide(&Self::role_ids(&roles), &resource, &actions, start)
            .await
    }

    /// Whether the roles together cover every requested action on the resource
    ///
    /// No roles or no requested actions is always `false`. Partial coverage is
    /// `false`.
    pub async fn is_roles_allowed(
        &self,
        roles: impl Into<IdList>,
        resource: impl Into<Reference>,
        actions: impl Into<ActionSet>,
    ) -> Result<bool> {
        let start = Instant::now();
        let roles: IdList = roles.into();
        let resource: Reference = resource.into();
        let actions: ActionSet = actions.into();

        self.decide(roles.as_slice(), &resource, &actions, start).await
    }

    async fn decide(
        &self,
        role_ids: &[RoleId],
        resource: &Reference,
        actions: &ActionSet,
        start: Instant,
    ) -> Result<bool> {
        if role_ids.is_empty() || actions.is_empty() {
            debug!("Denied {} on {}: nothing to check", actions, resource);
            return Ok(self.finalize(false, start).await);
        }

        let granted = match self.permissions.resource_permissions(role_ids, resource).await {
            Ok(granted) => granted,
            Err(err) => {
                self.record_error().await;
                return Err(err);
            }
        };

        let allowed = actions.is_subset(&granted);
        debug!(
            "{} {} on {}: granted {}",
            if allowed { "Allowed" } else { "Denied" },
            actions,
            resource,
            granted
        );

        Ok(self.finalize(allowed, start).await)
    }

    async fn finalize(&self, allowed: bool, start: Instant) -> bool {
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(allowed).await;
            metrics.record_latency(start.elapsed()).await;
        }
        allowed
    }

    async fn record_error(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_error().await;
        }
    }

    fn role_ids(roles: &[Role]) -> Vec<RoleId> {
        roles.iter().map(|r| r.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AclError;

    #[tokio::test]
    async fn test_engine_creation() {
        let engine = AclEngine::new(AclConfig::default(), Repositories::in_memory());
        assert!(engine.is_ok());

        let config = AclConfig {
            max_inheritance_depth: 0,
            ..Default::default()
        };
        let err = AclEngine::new(config, Repositories::in_memory()).err();
        assert!(matches!(err, Some(AclError::Config(_))));
    }

    #[tokio::test]
    async fn test_no_roles_fails_closed() {
        let engine = AclEngine::in_memory();

        assert!(!engine.is_allowed("nobody", "Article", ["READ"]).await.unwrap());
        assert!(!engine
            .is_roles_allowed(Vec::<String>::new(), "Article", ["READ"])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_direct_grant() {
        let engine = AclEngine::in_memory();
        let editor = engine.roles().create_role("editor", None).await.unwrap();

        engine.add_user_roles("alice", &editor).await;
        engine.allow(&editor, "Article", ["read", "update"]).await.unwrap();

        assert!(engine.is_allowed("alice", "Article", ["read"]).await.unwrap());
        assert!(engine.is_allowed("alice", "Article", ["READ", "UPDATE"]).await.unwrap());
        assert!(!engine.is_allowed("alice", "Article", ["READ", "DELETE"]).await.unwrap());
        assert!(!engine.is_allowed("alice", "Article", Vec::<String>::new()).await.unwrap());
        assert!(!engine.is_allowed("alice", "*", ["READ"]).await.unwrap());
    }

    #[tokio::test]
    async fn test_metrics_recorded() {
        let engine = AclEngine::in_memory();
        let editor = engine.roles().create_role("editor", None).await.unwrap();
        engine.allow(&editor, "Article", ["read"]).await.unwrap();

        engine.is_roles_allowed(&editor, "Article", ["read"]).await.unwrap();
        engine.is_roles_allowed(&editor, "Article", ["delete"]).await.unwrap();

        let metrics = engine.get_metrics().await.unwrap();
        assert_eq!(metrics.total_checks, 2);
        assert_eq!(metrics.allowed_decisions, 1);
        assert_eq!(metrics.denied_decisions, 1);
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let config = AclConfig {
            enable_metrics: false,
            ..Default::default()
        };
        let engine = AclEngine::new(config, Repositories::in_memory()).unwrap();

        assert!(engine.get_metrics().await.is_none());
        assert!(engine.export_metrics().await.is_none());
    }
}
