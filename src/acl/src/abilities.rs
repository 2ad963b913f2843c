//! Ability registry: the known action vocabulary per resource
//!
//! Type-level (`Article`) and instance-level (`Article:123`) vocabularies are
//! independent rows. Growth is additive and guarded by an optimistic version:
//! two writers starting from the same version cannot both commit, the loser
//! gets [`AclError::Conflict`] and must re-read.

use crate::engine::MetricsCollector;
use crate::error::{AclError, Result};
use crate::identity::{Identity, Reference};
use crate::repository::{Entity, Filter, Repository};
use crate::types::{resolve_typed, Ability, AbilityPatch, ActionSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Catalog of registered actions per resource type or instance
#[derive(Clone)]
pub struct AbilityRegistry {
    repo: Arc<dyn Repository<Ability>>,
    conflict_retries: usize,
    metrics: Option<Arc<MetricsCollector>>,
}

impl AbilityRegistry {
    /// Create a registry over an ability repository
    pub fn new(repo: Arc<dyn Repository<Ability>>) -> Self {
        Self {
            repo,
            conflict_retries: 3,
            metrics: None,
        }
    }

    /// Attempt budget for [`Self::add_actions_with_retry`]
    pub fn with_conflict_retries(mut self, attempts: usize) -> Self {
        self.conflict_retries = attempts.max(1);
        self
    }

    pub(crate) fn with_metrics(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Exact `(type, id)` lookup
    pub async fn find_by_resource(&self, resource: impl Into<Reference>) -> Result<Option<Ability>> {
        let key = resolve_typed(&resource.into(), "ability resource")?;
        self.repo.find_one(&Self::key_filter(&key)).await
    }

    /// Grow the vocabulary of a resource
    ///
    /// Creates the row with exactly these actions if absent; losing that
    /// creation to a concurrent writer is a conflict at version 0. If the
    /// union adds nothing the current row is returned unchanged. Otherwise
    /// the update is conditional on the version that was read; a concurrent
    /// writer that got there first turns this call into
    /// [`AclError::Conflict`]. No retry happens here.
    pub async fn add_actions(
        &self,
        resource: impl Into<Reference>,
        actions: impl Into<ActionSet>,
    ) -> Result<Ability> {
        let key = resolve_typed(&resource.into(), "ability resource")?;
        let actions: ActionSet = actions.into();
        let filter = Self::key_filter(&key);

        let current = match self.repo.find_one(&filter).await? {
            Some(current) => current,
            None => {
                let fresh = Ability::new(
                    key.type_name.clone().unwrap_or_default(),
                    key.id.as_deref(),
                    actions.clone(),
                );
                let (row, created) = self.repo.find_or_create(&filter, fresh).await?;
                if !created {
                    return Err(self.conflict(&key, 0).await);
                }
                debug!("Registered ability {} with {}", key, row.actions);
                return Ok(row);
            }
        };

        self.extend(current, &actions, &key, &filter).await
    }

    /// [`Self::add_actions`] with a bounded re-read loop on conflict
    ///
    /// This is the caller-side retry; errors other than conflicts are
    /// returned immediately.
    pub async fn add_actions_with_retry(
        &self,
        resource: impl Into<Reference>,
        actions: impl Into<ActionSet>,
    ) -> Result<Ability> {
        let resource: Reference = resource.into();
        let actions: ActionSet = actions.into();
        let mut attempt = 1;

        loop {
            match self.add_actions(resource.clone(), actions.clone()).await {
                Err(err) if err.is_conflict() && attempt < self.conflict_retries => {
                    debug!("Retrying ability update for {} (attempt {})", resource, attempt);
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    async fn extend(
        &self,
        current: Ability,
        actions: &ActionSet,
        key: &Identity,
        filter: &Filter,
    ) -> Result<Ability> {
        let union = current.actions.union(actions);
        if union == current.actions {
            return Ok(current);
        }

        let patch = AbilityPatch { actions: union };
        let updated = self
            .repo
            .update_where(filter, &patch, Some(current.version))
            .await?;

        if updated == 0 {
            return Err(self.conflict(key, current.version).await);
        }

        let mut next = current;
        next.apply(&patch);
        debug!("Ability {} now at version {} with {}", key, next.version, next.actions);
        Ok(next)
    }

    /// A stale write; version 0 means the row did not exist when read
    async fn conflict(&self, key: &Identity, expected_version: u64) -> AclError {
        warn!(
            "Ability {} moved past version {}, rejecting stale update",
            key, expected_version
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_conflict().await;
        }
        AclError::Conflict {
            resource: key.to_string(),
            expected_version,
        }
    }

    fn key_filter(key: &Identity) -> Filter {
        Ability::RESOURCE.filter_for(key)
    }
}
