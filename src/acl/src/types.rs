//! Core access control types

use crate::error::{AclError, Result};
use crate::identity::{Identifiable, Identity, Polymorphic, Reference, WILDCARD};
use crate::repository::{Entity, Filter};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

/// Unique role identifier
pub type RoleId = String;

/// User identifier, assigned by the host application
pub type UserId = String;

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Upper-cased set of action names
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionSet(BTreeSet<String>);

impl ActionSet {
    /// Empty action set
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize a single action name
    pub fn normalize(action: &str) -> String {
        action.to_uppercase()
    }

    /// Insert an action, returns false if already present
    pub fn insert(&mut self, action: impl AsRef<str>) -> bool {
        self.0.insert(Self::normalize(action.as_ref()))
    }

    /// Membership test (case-insensitive)
    pub fn contains(&self, action: &str) -> bool {
        self.0.contains(&Self::normalize(action))
    }

    /// Set union
    pub fn union(&self, other: &ActionSet) -> ActionSet {
        Self(self.0.union(&other.0).cloned().collect())
    }

    /// Set difference
    pub fn difference(&self, other: &ActionSet) -> ActionSet {
        Self(self.0.difference(&other.0).cloned().collect())
    }

    /// Every action of `self` is in `other`
    pub fn is_subset(&self, other: &ActionSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Union in place
    pub fn extend(&mut self, other: &ActionSet) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over actions in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Sorted action names
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for ActionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|a| Self::normalize(a.as_ref())).collect())
    }
}

impl From<&str> for ActionSet {
    fn from(action: &str) -> Self {
        std::iter::once(action).collect()
    }
}

impl From<String> for ActionSet {
    fn from(action: String) -> Self {
        std::iter::once(action).collect()
    }
}

impl<S: AsRef<str>> From<Vec<S>> for ActionSet {
    fn from(actions: Vec<S>) -> Self {
        actions.into_iter().collect()
    }
}

impl<S: AsRef<str>> From<&[S]> for ActionSet {
    fn from(actions: &[S]) -> Self {
        actions.iter().collect()
    }
}

impl<S: AsRef<str>, const N: usize> From<[S; N]> for ActionSet {
    fn from(actions: [S; N]) -> Self {
        actions.into_iter().collect()
    }
}

impl fmt::Display for ActionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_vec().join(", "))
    }
}

/// One id or a list of ids, deduplicated in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdList(Vec<String>);

impl IdList {
    fn from_iter<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for id in ids {
            let id = id.into();
            if !out.contains(&id) {
                out.push(id);
            }
        }
        Self(out)
    }

    /// Ids as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Consume into the inner vector
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Number of ids
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over ids
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl From<&str> for IdList {
    fn from(id: &str) -> Self {
        Self(vec![id.to_string()])
    }
}

impl From<String> for IdList {
    fn from(id: String) -> Self {
        Self(vec![id])
    }
}

impl From<&String> for IdList {
    fn from(id: &String) -> Self {
        Self(vec![id.clone()])
    }
}

impl From<&Role> for IdList {
    fn from(role: &Role) -> Self {
        Self(vec![role.id.clone()])
    }
}

impl From<Vec<String>> for IdList {
    fn from(ids: Vec<String>) -> Self {
        Self::from_iter(ids)
    }
}

impl From<Vec<&str>> for IdList {
    fn from(ids: Vec<&str>) -> Self {
        Self::from_iter(ids)
    }
}

impl From<&[&str]> for IdList {
    fn from(ids: &[&str]) -> Self {
        Self::from_iter(ids.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for IdList {
    fn from(ids: [&str; N]) -> Self {
        Self::from_iter(ids)
    }
}

impl From<&[Role]> for IdList {
    fn from(roles: &[Role]) -> Self {
        Self::from_iter(roles.iter().map(|r| r.id.clone()))
    }
}

impl From<&Vec<Role>> for IdList {
    fn from(roles: &Vec<Role>) -> Self {
        Self::from(roles.as_slice())
    }
}

impl From<Vec<Role>> for IdList {
    fn from(roles: Vec<Role>) -> Self {
        Self::from_iter(roles.into_iter().map(|r| r.id))
    }
}

/// Per-item outcome of a fan-out operation
///
/// Items succeed or fail independently; one failure never rolls back the
/// others.
#[derive(Debug)]
pub struct Batch<T> {
    results: Vec<Result<T>>,
}

impl<T> Batch<T> {
    /// Wrap per-item results
    pub fn new(results: Vec<Result<T>>) -> Self {
        Self { results }
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether the batch had no items
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Iterate over per-item results
    pub fn iter(&self) -> std::slice::Iter<'_, Result<T>> {
        self.results.iter()
    }

    /// Number of successful items
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Errors of the failed items
    pub fn failures(&self) -> impl Iterator<Item = &AclError> {
        self.results.iter().filter_map(|r| r.as_ref().err())
    }

    /// Whether every item succeeded
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.is_ok())
    }

    /// Consume into raw per-item results
    pub fn into_results(self) -> Vec<Result<T>> {
        self.results
    }

    /// All values, or the first error
    pub fn into_result(self) -> Result<Vec<T>> {
        self.results.into_iter().collect()
    }
}

impl<T> IntoIterator for Batch<T> {
    type Item = Result<T>;
    type IntoIter = std::vec::IntoIter<Result<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

/// Role partition selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum RoleScope {
    /// Every partition
    #[default]
    Any,

    /// The unscoped partition (`scope == null`)
    Global,

    /// A named partition (tenant, namespace)
    Named(String),
}

impl RoleScope {
    /// Repository filter selecting roles in this partition exactly
    pub fn filter(&self) -> Filter {
        match self {
            Self::Any => Filter::new(),
            Self::Global => Filter::new().eq(Role::SCOPE, None::<String>),
            Self::Named(scope) => Filter::new().eq(Role::SCOPE, scope.clone()),
        }
    }

    /// Whether a role lives in this partition exactly
    pub fn contains(&self, role: &Role) -> bool {
        match self {
            Self::Any => true,
            Self::Global => role.scope.is_none(),
            Self::Named(scope) => role.scope.as_deref() == Some(scope.as_str()),
        }
    }

    /// Whether an inherited parent role may join the effective set
    ///
    /// Named partitions also admit global roles, which are shared.
    pub fn admits_parent(&self, role: &Role) -> bool {
        match self {
            Self::Named(_) => role.scope.is_none() || self.contains(role),
            _ => self.contains(role),
        }
    }
}

impl From<&str> for RoleScope {
    fn from(scope: &str) -> Self {
        if scope == WILDCARD {
            Self::Any
        } else {
            Self::Named(scope.to_string())
        }
    }
}

impl From<String> for RoleScope {
    fn from(scope: String) -> Self {
        Self::from(scope.as_str())
    }
}

impl From<Option<&str>> for RoleScope {
    fn from(scope: Option<&str>) -> Self {
        match scope {
            Some(scope) => Self::from(scope),
            None => Self::Global,
        }
    }
}

impl fmt::Display for RoleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Global => f.write_str("global"),
            Self::Named(scope) => f.write_str(scope),
        }
    }
}

/// Named role within a scope partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role identifier
    pub id: RoleId,

    /// Role name, unique within `scope`
    pub name: String,

    /// Partition key, `None` for the global partition
    #[serde(default)]
    pub scope: Option<String>,

    /// Parent roles whose permissions this role inherits
    #[serde(default)]
    pub inherits: Vec<RoleId>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Role {
    /// Subject type written for role grants
    pub const TYPE_NAME: &'static str = "Role";

    /// Filterable fields
    pub const ID: &'static str = "id";
    pub const NAME: &'static str = "name";
    pub const SCOPE: &'static str = "scope";

    /// Create a role with a fresh id
    pub fn new(name: impl Into<String>, scope: Option<&str>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            scope: scope.map(str::to_string),
            inherits: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Replace the generated id
    pub fn with_id(mut self, id: impl Into<RoleId>) -> Self {
        self.id = id.into();
        self
    }

    /// Declare parent roles
    pub fn inherits_from(mut self, parents: impl Into<IdList>) -> Self {
        for parent in parents.into().into_vec() {
            if !self.inherits.contains(&parent) {
                self.inherits.push(parent);
            }
        }
        self
    }
}

/// Replace a role's parent list
#[derive(Debug, Clone)]
pub struct RolePatch {
    /// New parent role ids
    pub inherits: Vec<RoleId>,
}

impl Entity for Role {
    const KIND: &'static str = "role";
    type Patch = RolePatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            Self::ID => Some(&self.id),
            Self::NAME => Some(&self.name),
            Self::SCOPE => self.scope.as_deref(),
            _ => None,
        }
    }

    fn apply(&mut self, patch: &RolePatch) {
        self.inherits = patch.inherits.clone();
    }
}

impl Identifiable for Role {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn instance_id(&self) -> Option<&str> {
        Some(&self.id)
    }
}

impl From<&Role> for Reference {
    fn from(role: &Role) -> Self {
        Reference::of(role)
    }
}

/// Assignment edge between a user and a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// Row identifier
    pub id: String,

    /// Assigned user
    pub user_id: UserId,

    /// Assigned role
    pub role_id: RoleId,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Mapping {
    /// Filterable fields
    pub const USER_ID: &'static str = "user_id";
    pub const ROLE_ID: &'static str = "role_id";

    /// Create an assignment edge
    pub fn new(user_id: impl Into<UserId>, role_id: impl Into<RoleId>) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.into(),
            role_id: role_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Filter matching exactly this `(user, role)` pair
    pub fn edge(user_id: &str, role_id: &str) -> Filter {
        Filter::new()
            .eq(Self::USER_ID, user_id.to_string())
            .eq(Self::ROLE_ID, role_id.to_string())
    }
}

impl Entity for Mapping {
    const KIND: &'static str = "mapping";
    type Patch = ();

    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            Self::USER_ID => Some(&self.user_id),
            Self::ROLE_ID => Some(&self.role_id),
            _ => None,
        }
    }

    fn apply(&mut self, _patch: &()) {}
}

/// Known action vocabulary of a resource type or instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ability {
    /// Row identifier
    pub id: String,

    /// Resource type
    pub resource_type: String,

    /// Resource instance, `None` for the type-level vocabulary
    pub resource_id: Option<String>,

    /// Registered actions
    pub actions: ActionSet,

    /// Optimistic concurrency token
    pub version: u64,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Ability {
    /// Filterable fields
    pub const RESOURCE_TYPE: &'static str = "resource_type";
    pub const RESOURCE_ID: &'static str = "resource_id";

    /// Polymorphic resource relation
    pub const RESOURCE: Polymorphic = Polymorphic::new(Self::RESOURCE_TYPE, Self::RESOURCE_ID);

    /// Create a vocabulary row at version 1
    pub fn new(resource_type: impl Into<String>, resource_id: Option<&str>, actions: ActionSet) -> Self {
        Self {
            id: new_id(),
            resource_type: resource_type.into(),
            resource_id: resource_id.map(str::to_string),
            actions,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Canonical resource identity
    pub fn resource(&self) -> Identity {
        Identity {
            type_name: Some(self.resource_type.clone()),
            id: self.resource_id.clone(),
        }
    }
}

/// Replace an ability's action vocabulary
#[derive(Debug, Clone)]
pub struct AbilityPatch {
    /// New vocabulary
    pub actions: ActionSet,
}

impl Entity for Ability {
    const KIND: &'static str = "ability";
    type Patch = AbilityPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            Self::RESOURCE_TYPE => Some(&self.resource_type),
            Self::RESOURCE_ID => self.resource_id.as_deref(),
            _ => None,
        }
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(&mut self, patch: &AbilityPatch) {
        self.actions = patch.actions.clone();
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Actions granted to a subject on a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Row identifier
    pub id: String,

    /// Subject type (usually "Role")
    pub subject_type: Option<String>,

    /// Subject instance
    pub subject_id: Option<String>,

    /// Resource type
    pub resource_type: Option<String>,

    /// Resource instance, `None` for a type-level grant
    pub resource_id: Option<String>,

    /// Granted actions
    pub actions: ActionSet,

    /// Bumped on every change to `actions`
    pub version: u64,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Permission {
    /// Filterable fields
    pub const SUBJECT_TYPE: &'static str = "subject_type";
    pub const SUBJECT_ID: &'static str = "subject_id";
    pub const RESOURCE_TYPE: &'static str = "resource_type";
    pub const RESOURCE_ID: &'static str = "resource_id";

    /// Polymorphic subject relation
    pub const SUBJECT: Polymorphic = Polymorphic::new(Self::SUBJECT_TYPE, Self::SUBJECT_ID);

    /// Polymorphic resource relation
    pub const RESOURCE: Polymorphic = Polymorphic::new(Self::RESOURCE_TYPE, Self::RESOURCE_ID);

    /// Create a grant row
    pub fn new(subject: &Identity, resource: &Identity, actions: ActionSet) -> Self {
        Self {
            id: new_id(),
            subject_type: subject.type_name.clone(),
            subject_id: subject.id.clone(),
            resource_type: resource.type_name.clone(),
            resource_id: resource.id.clone(),
            actions,
            version: 1,
            updated_at: Utc::now(),
        }
    }

    /// Canonical subject identity
    pub fn subject(&self) -> Identity {
        Identity {
            type_name: self.subject_type.clone(),
            id: self.subject_id.clone(),
        }
    }

    /// Canonical resource identity
    pub fn resource(&self) -> Identity {
        Identity {
            type_name: self.resource_type.clone(),
            id: self.resource_id.clone(),
        }
    }
}

/// Replace a permission's action set
#[derive(Debug, Clone)]
pub struct PermissionPatch {
    /// New granted actions
    pub actions: ActionSet,
}

impl Entity for Permission {
    const KIND: &'static str = "permission";
    type Patch = PermissionPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name {
            Self::SUBJECT_TYPE => self.subject_type.as_deref(),
            Self::SUBJECT_ID => self.subject_id.as_deref(),
            Self::RESOURCE_TYPE => self.resource_type.as_deref(),
            Self::RESOURCE_ID => self.resource_id.as_deref(),
            _ => None,
        }
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn apply(&mut self, patch: &PermissionPatch) {
        self.actions = patch.actions.clone();
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

/// Resolve a reference that must name a concrete type (writes, exact lookups)
pub(crate) fn resolve_typed(reference: &Reference, what: &str) -> Result<Identity> {
    match reference.resolve(false)? {
        Some(identity) if identity.is_typed() => Ok(identity),
        Some(identity) => Err(AclError::invalid(format!(
            "{} '{}' has no type",
            what, identity
        ))),
        None => Err(AclError::invalid(format!(
            "{} cannot be the wildcard",
            what
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_set_normalization() {
        let actions = ActionSet::from(vec!["read", "CREATE", "Update", "read"]);

        assert_eq!(actions.len(), 3);
        assert_eq!(actions.to_vec(), vec!["CREATE", "READ", "UPDATE"]);
        assert!(actions.contains("update"));
        assert_eq!(actions.to_string(), "[CREATE, READ, UPDATE]");
    }

    #[test]
    fn test_action_set_algebra() {
        let base = ActionSet::from(["READ", "CREATE"]);
        let more = ActionSet::from(["read", "approval"]);

        assert_eq!(base.union(&more), ActionSet::from(["READ", "CREATE", "APPROVAL"]));
        assert_eq!(base.difference(&more), ActionSet::from(["CREATE"]));
        assert!(ActionSet::from("read").is_subset(&base));
        assert!(!more.is_subset(&base));
    }

    #[test]
    fn test_id_list_dedup() {
        let ids = IdList::from(vec!["a", "b", "a"]);
        assert_eq!(ids.as_slice(), &["a".to_string(), "b".to_string()]);

        let role = Role::new("admin", None);
        assert_eq!(IdList::from(&role).into_vec(), vec![role.id.clone()]);
        assert_eq!(IdList::from(vec![role.clone()]).len(), 1);
    }

    #[test]
    fn test_role_scope_admission() {
        let global = Role::new("base", None);
        let tenant = Role::new("editor", Some("tenant-a"));
        let other = Role::new("editor", Some("tenant-b"));

        let scope = RoleScope::from("tenant-a");
        assert!(scope.contains(&tenant));
        assert!(!scope.contains(&global));
        assert!(scope.admits_parent(&global));
        assert!(!scope.admits_parent(&other));

        assert!(RoleScope::Global.admits_parent(&global));
        assert!(!RoleScope::Global.admits_parent(&tenant));
        assert!(RoleScope::Any.admits_parent(&other));
        assert_eq!(RoleScope::from(None::<&str>), RoleScope::Global);
        assert_eq!(RoleScope::from("*"), RoleScope::Any);
    }

    #[test]
    fn test_role_reference() {
        let role = Role::new("admin", None).with_id("r1");
        let identity = Reference::from(&role).resolve(false).unwrap().unwrap();

        assert_eq!(identity, Identity::new("Role", "r1"));
    }

    #[test]
    fn test_ability_patch_bumps_version() {
        let mut ability = Ability::new("Article", None, ActionSet::from(["READ"]));
        assert_eq!(ability.version, 1);

        ability.apply(&AbilityPatch {
            actions: ActionSet::from(["READ", "UPDATE"]),
        });
        assert_eq!(ability.version, 2);
        assert_eq!(ability.resource(), Identity::of_type("Article"));
    }

    #[test]
    fn test_batch_outcomes() {
        let batch: Batch<u32> = Batch::new(vec![
            Ok(1),
            Err(AclError::invalid("bad")),
            Ok(3),
        ]);

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.succeeded(), 2);
        assert_eq!(batch.failures().count(), 1);
        assert!(!batch.is_success());
        assert!(batch.into_result().is_err());
    }

    #[test]
    fn test_resolve_typed() {
        assert!(resolve_typed(&Reference::from("Article"), "resource").is_ok());
        assert!(resolve_typed(&Reference::Wildcard, "resource").is_err());
        assert!(resolve_typed(&Reference::Null, "resource").is_err());
    }
}
