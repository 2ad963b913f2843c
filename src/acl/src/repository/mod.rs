//! Repository collaborators
//!
//! The engine never talks to a storage engine directly. Each entity is read and
//! written through a [`Repository`], and the four collaborators are injected
//! together as [`Repositories`].

mod memory;

pub use memory::InMemoryRepository;

use crate::error::Result;
use crate::types::{Ability, Mapping, Permission, Role};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// A single filter condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Field equals value (`None` matches null)
    Eq(&'static str, Option<String>),

    /// Field is one of the values (never matches null)
    In(&'static str, Vec<String>),
}

impl Condition {
    fn matches<E: Entity>(&self, entity: &E) -> bool {
        match self {
            Self::Eq(field, value) => entity.field(field) == value.as_deref(),
            Self::In(field, values) => entity
                .field(field)
                .map_or(false, |actual| values.iter().any(|v| v == actual)),
        }
    }
}

/// Conjunction of conditions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    /// Empty filter, matches everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality condition
    pub fn eq(mut self, field: &'static str, value: impl Into<Option<String>>) -> Self {
        self.conditions.push(Condition::Eq(field, value.into()));
        self
    }

    /// Add an in-set condition
    pub fn is_in<I, S>(mut self, field: &'static str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.conditions
            .push(Condition::In(field, values.into_iter().map(Into::into).collect()));
        self
    }

    /// Merge another filter into this one
    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    /// Conditions in insertion order
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Whether the filter has no conditions
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate the filter against an entity
    pub fn matches<E: Entity>(&self, entity: &E) -> bool {
        self.conditions.iter().all(|c| c.matches(entity))
    }
}

/// A stored record the engine can filter and patch
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    /// Entity kind, used in logs and errors
    const KIND: &'static str;

    /// Partial update applied by `update_where`
    type Patch: fmt::Debug + Send + Sync;

    /// Stable row id
    fn id(&self) -> &str;

    /// Value of a filterable field; unknown fields read as null
    fn field(&self, name: &str) -> Option<&str>;

    /// Optimistic concurrency token, 0 for unversioned entities
    fn version(&self) -> u64 {
        0
    }

    /// Apply a patch in place
    fn apply(&mut self, patch: &Self::Patch);
}

/// Storage interface for one entity type
#[async_trait]
pub trait Repository<E: Entity>: Send + Sync {
    /// All rows matching the filter
    async fn find(&self, filter: &Filter) -> Result<Vec<E>>;

    /// First row matching the filter
    async fn find_one(&self, filter: &Filter) -> Result<Option<E>> {
        Ok(self.find(filter).await?.into_iter().next())
    }

    /// Number of rows matching the filter
    async fn count(&self, filter: &Filter) -> Result<usize>;

    /// Insert a new row
    async fn create(&self, entity: E) -> Result<E>;

    /// Atomically return the first match or insert `entity`
    ///
    /// The flag is `true` when the row was created by this call.
    async fn find_or_create(&self, filter: &Filter, entity: E) -> Result<(E, bool)>;

    /// Patch every matching row, returning the number of rows updated
    ///
    /// With `expected_version`, only rows still at that version are touched.
    async fn update_where(
        &self,
        filter: &Filter,
        patch: &E::Patch,
        expected_version: Option<u64>,
    ) -> Result<usize>;

    /// Delete every matching row, returning the number of rows removed
    ///
    /// With `expected_version`, only rows still at that version are removed.
    async fn remove(&self, filter: &Filter, expected_version: Option<u64>) -> Result<usize>;
}

/// The four collaborators the engine depends on
#[derive(Clone)]
pub struct Repositories {
    /// Role rows
    pub roles: Arc<dyn Repository<Role>>,

    /// User to role assignment edges
    pub mappings: Arc<dyn Repository<Mapping>>,

    /// Action vocabularies
    pub abilities: Arc<dyn Repository<Ability>>,

    /// Subject grants
    pub permissions: Arc<dyn Repository<Permission>>,
}

impl Repositories {
    /// Fresh in-memory collaborators
    pub fn in_memory() -> Self {
        Self {
            roles: Arc::new(InMemoryRepository::new()),
            mappings: Arc::new(InMemoryRepository::new()),
            abilities: Arc::new(InMemoryRepository::new()),
            permissions: Arc::new(InMemoryRepository::new()),
        }
    }
}

impl fmt::Debug for Repositories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
