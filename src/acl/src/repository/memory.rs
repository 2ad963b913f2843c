//! In-memory repository implementation

use super::{Entity, Filter, Repository};
use crate::error::{AclError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory repository keyed by row id
///
/// Every call takes the lock once, so `find_or_create` and versioned
/// `update_where` are atomic with respect to other callers.
pub struct InMemoryRepository<E: Entity> {
    rows: Arc<RwLock<HashMap<String, E>>>,
}

impl<E: Entity> InMemoryRepository<E> {
    /// Create an empty repository
    pub fn new() -> Self {
        Self {
            rows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the repository holds no rows
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Drop every row
    pub async fn clear(&self) {
        self.rows.write().await.clear();
    }
}

impl<E: Entity> Default for InMemoryRepository<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Clone for InMemoryRepository<E> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
        }
    }
}

#[async_trait]
impl<E: Entity> Repository<E> for InMemoryRepository<E> {
    async fn find(&self, filter: &Filter) -> Result<Vec<E>> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|e| filter.matches(*e)).cloned().collect())
    }

    async fn count(&self, filter: &Filter) -> Result<usize> {
        let rows = self.rows.read().await;
        Ok(rows.values().filter(|e| filter.matches(*e)).count())
    }

    async fn create(&self, entity: E) -> Result<E> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(entity.id()) {
            return Err(AclError::StoreFailure(format!(
                "{} '{}' already exists",
                E::KIND,
                entity.id()
            )));
        }
        rows.insert(entity.id().to_string(), entity.clone());
        Ok(entity)
    }

    async fn find_or_create(&self, filter: &Filter, entity: E) -> Result<(E, bool)> {
        let mut rows = self.rows.write().await;
        if let Some(existing) = rows.values().find(|e| filter.matches(*e)) {
            return Ok((existing.clone(), false));
        }
        rows.insert(entity.id().to_string(), entity.clone());
        Ok((entity, true))
    }

    async fn update_where(
        &self,
        filter: &Filter,
        patch: &E::Patch,
        expected_version: Option<u64>,
    ) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let mut updated = 0;

        for entity in rows.values_mut() {
            if !filter.matches(&*entity) {
                continue;
            }
            if expected_version.map_or(false, |v| entity.version() != v) {
                continue;
            }
            entity.apply(patch);
            updated += 1;
        }

        Ok(updated)
    }

    async fn remove(&self, filter: &Filter, expected_version: Option<u64>) -> Result<usize> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, e| {
            !filter.matches(&*e) || expected_version.map_or(false, |v| e.version() != v)
        });
        Ok(before - rows.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Ability, AbilityPatch, ActionSet, Mapping};

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let repo = InMemoryRepository::<Mapping>::new();
        let filter = Filter::new()
            .eq(Mapping::USER_ID, "alice".to_string())
            .eq(Mapping::ROLE_ID, "admin".to_string());

        let (first, created) = repo
            .find_or_create(&filter, Mapping::new("alice", "admin"))
            .await
            .unwrap();
        assert!(created);

        let (second, created) = repo
            .find_or_create(&filter, Mapping::new("alice", "admin"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate_id() {
        let repo = InMemoryRepository::<Mapping>::new();
        let mapping = Mapping::new("alice", "admin");

        repo.create(mapping.clone()).await.unwrap();
        let err = repo.create(mapping).await.unwrap_err();
        assert!(matches!(err, AclError::StoreFailure(_)));
    }

    #[tokio::test]
    async fn test_versioned_update() {
        let repo = InMemoryRepository::<Ability>::new();
        let ability = Ability::new("Article", None, ActionSet::from(["READ"]));
        let filter = Filter::new().eq(Ability::RESOURCE_TYPE, "Article".to_string());
        repo.create(ability.clone()).await.unwrap();

        let patch = AbilityPatch {
            actions: ActionSet::from(["READ", "UPDATE"]),
        };

        // Stale version is rejected
        let updated = repo
            .update_where(&filter, &patch, Some(ability.version + 1))
            .await
            .unwrap();
        assert_eq!(updated, 0);

        let updated = repo
            .update_where(&filter, &patch, Some(ability.version))
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let stored = repo.find_one(&filter).await.unwrap().unwrap();
        assert_eq!(stored.version, ability.version + 1);
        assert!(stored.actions.contains("UPDATE"));
    }

    #[tokio::test]
    async fn test_remove_counts_rows() {
        let repo = InMemoryRepository::<Mapping>::new();
        repo.create(Mapping::new("alice", "admin")).await.unwrap();
        repo.create(Mapping::new("alice", "editor")).await.unwrap();
        repo.create(Mapping::new("bob", "admin")).await.unwrap();

        let removed = repo
            .remove(&Filter::new().eq(Mapping::USER_ID, "alice".to_string()), None)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(repo.len().await, 1);

        repo.clear().await;
        assert!(repo.is_empty().await);
    }

    #[tokio::test]
    async fn test_versioned_remove_skips_moved_rows() {
        let repo = InMemoryRepository::<Ability>::new();
        let ability = repo
            .create(Ability::new("Article", None, ActionSet::from(["READ"])))
            .await
            .unwrap();
        let filter = Filter::new().eq(Ability::RESOURCE_TYPE, "Article".to_string());

        let patch = AbilityPatch {
            actions: ActionSet::from(["READ", "UPDATE"]),
        };
        repo.update_where(&filter, &patch, None).await.unwrap();

        assert_eq!(repo.remove(&filter, Some(ability.version)).await.unwrap(), 0);
        assert_eq!(repo.len().await, 1);
        assert_eq!(repo.remove(&filter, Some(ability.version + 1)).await.unwrap(), 1);
        assert!(repo.is_empty().await);
    }
}
