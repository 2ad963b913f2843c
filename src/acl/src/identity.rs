//! Identity resolution for polymorphic subjects and resources
//!
//! Subjects and resources are addressed by a [`Reference`], which is normalized
//! into a canonical [`Identity`] (`type` plus optional instance `id`). The
//! wildcard `*` resolves to `None`, meaning "do not filter on this dimension".
//!
//! # Example
//!
//! ```rust
//! use cretoai_acl::identity::{Identity, Reference};
//!
//! let article = Reference::from("Article:123").resolve(false).unwrap();
//! assert_eq!(article, Some(Identity::new("Article", "123")));
//!
//! let nested = Reference::from("Blog:Post:7").resolve(false).unwrap();
//! assert_eq!(nested, Some(Identity::new("Blog:Post", "7")));
//!
//! assert_eq!(Reference::from("*").resolve(false).unwrap(), None);
//! ```

use crate::error::{AclError, Result};
use crate::repository::Filter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wildcard token that removes a filter dimension
pub const WILDCARD: &str = "*";

/// Separator between type segments and the instance id
pub const SEPARATOR: char = ':';

/// An object that knows its own declared type and instance id
pub trait Identifiable {
    /// Declared type name (e.g. "Role", "Article")
    fn type_name(&self) -> &str;

    /// Instance id, `None` for type-level objects
    fn instance_id(&self) -> Option<&str>;
}

/// Reference to a subject or resource, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// Ignore this dimension entirely
    Wildcard,

    /// Explicit global match (null type, null id)
    Null,

    /// A declared type name without an instance
    Type(String),

    /// An object exposing a declared type and an id
    Typed {
        /// Declared type
        type_name: String,
        /// Instance id
        id: Option<String>,
    },

    /// Delimited string (`Type:id`, `Type:Sub:id`) or a bare identifier
    Raw(String),

    /// Ordered parts `[type.., id]`; the last element is the id
    Parts(Vec<String>),
}

impl Reference {
    /// Reference to a whole resource type
    pub fn type_only(name: impl Into<String>) -> Self {
        Self::Type(name.into())
    }

    /// Reference to a typed object
    pub fn of<T: Identifiable + ?Sized>(object: &T) -> Self {
        Self::Typed {
            type_name: object.type_name().to_string(),
            id: object.instance_id().map(str::to_string),
        }
    }

    /// Whether this reference is the wildcard
    pub fn is_wildcard(&self) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Raw(raw) => raw == WILDCARD,
            _ => false,
        }
    }

    /// Normalize into a canonical identity
    ///
    /// Returns `Ok(None)` for the wildcard. A bare identifier becomes
    /// `{type: value}` unless `default_as_id` is set, in which case it becomes
    /// `{id: value}` (the caller already knows the type).
    ///
    /// # Errors
    ///
    /// Empty strings and empty part lists are the "undefined" reference and
    /// fail with [`AclError::InvalidArgument`]; use [`Reference::Null`] for a
    /// global match or [`Reference::Wildcard`] to drop the filter.
    pub fn resolve(&self, default_as_id: bool) -> Result<Option<Identity>> {
        match self {
            Self::Wildcard => Ok(None),
            Self::Null => Ok(Some(Identity::global())),
            Self::Type(name) => {
                if name.is_empty() {
                    return Err(AclError::invalid("type reference cannot be empty"));
                }
                Ok(Some(Identity::of_type(name.clone())))
            }
            Self::Typed { type_name, id } => {
                if type_name.is_empty() {
                    return Err(AclError::invalid("typed reference has an empty type"));
                }
                Ok(Some(Identity {
                    type_name: Some(type_name.clone()),
                    id: id.clone(),
                }))
            }
            Self::Raw(raw) => {
                if raw == WILDCARD {
                    return Ok(None);
                }
                if raw.is_empty() {
                    return Err(AclError::invalid(
                        "reference cannot be empty, use Null for a global match",
                    ));
                }
                let parts: Vec<&str> = raw.split(SEPARATOR).collect();
                split_parts(&parts, default_as_id).map(Some)
            }
            Self::Parts(parts) => split_parts(parts, default_as_id).map(Some),
        }
    }
}

fn split_parts<S: AsRef<str>>(parts: &[S], default_as_id: bool) -> Result<Identity> {
    match parts.split_last() {
        None => Err(AclError::invalid(
            "reference parts cannot be empty, use Null for a global match",
        )),
        Some((last, [])) => {
            let value = last.as_ref().to_string();
            Ok(if default_as_id {
                Identity {
                    type_name: None,
                    id: Some(value),
                }
            } else {
                Identity::of_type(value)
            })
        }
        Some((last, rest)) => {
            let type_name = rest
                .iter()
                .map(AsRef::as_ref)
                .collect::<Vec<&str>>()
                .join(":");
            Ok(Identity::new(type_name, last.as_ref()))
        }
    }
}

impl From<&str> for Reference {
    fn from(value: &str) -> Self {
        if value == WILDCARD {
            Self::Wildcard
        } else {
            Self::Raw(value.to_string())
        }
    }
}

impl From<String> for Reference {
    fn from(value: String) -> Self {
        if value == WILDCARD {
            Self::Wildcard
        } else {
            Self::Raw(value)
        }
    }
}

impl From<&String> for Reference {
    fn from(value: &String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<Option<&str>> for Reference {
    fn from(value: Option<&str>) -> Self {
        match value {
            Some(value) => Self::from(value),
            None => Self::Null,
        }
    }
}

impl From<(&str, &str)> for Reference {
    fn from((type_name, id): (&str, &str)) -> Self {
        Self::Typed {
            type_name: type_name.to_string(),
            id: Some(id.to_string()),
        }
    }
}

impl From<Vec<String>> for Reference {
    fn from(parts: Vec<String>) -> Self {
        Self::Parts(parts)
    }
}

impl From<&[&str]> for Reference {
    fn from(parts: &[&str]) -> Self {
        Self::Parts(parts.iter().map(|p| p.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Reference {
    fn from(parts: [&str; N]) -> Self {
        Self::Parts(parts.iter().map(|p| p.to_string()).collect())
    }
}

impl From<&Identity> for Reference {
    fn from(identity: &Identity) -> Self {
        match &identity.type_name {
            Some(type_name) => Self::Typed {
                type_name: type_name.clone(),
                id: identity.id.clone(),
            },
            None => Self::Null,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str(WILDCARD),
            Self::Null => f.write_str("null"),
            Self::Type(name) => f.write_str(name),
            Self::Typed { type_name, id: Some(id) } => write!(f, "{}:{}", type_name, id),
            Self::Typed { type_name, id: None } => f.write_str(type_name),
            Self::Raw(raw) => f.write_str(raw),
            Self::Parts(parts) => f.write_str(&parts.join(":")),
        }
    }
}

/// One reference or a list of references
///
/// Bulk grant and lookup operations take resources through this type, so a
/// single `"Article"` and a `vec!["Article", "Comment"]` are both accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References(Vec<Reference>);

impl References {
    /// References as a slice
    pub fn as_slice(&self) -> &[Reference] {
        &self.0
    }

    /// Number of references
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over references
    pub fn iter(&self) -> std::slice::Iter<'_, Reference> {
        self.0.iter()
    }
}

impl IntoIterator for References {
    type Item = Reference;
    type IntoIter = std::vec::IntoIter<Reference>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Reference> for References {
    fn from(reference: Reference) -> Self {
        Self(vec![reference])
    }
}

impl From<&str> for References {
    fn from(value: &str) -> Self {
        Self(vec![Reference::from(value)])
    }
}

impl From<String> for References {
    fn from(value: String) -> Self {
        Self(vec![Reference::from(value)])
    }
}

impl From<&Identity> for References {
    fn from(identity: &Identity) -> Self {
        Self(vec![Reference::from(identity)])
    }
}

impl From<Vec<Reference>> for References {
    fn from(references: Vec<Reference>) -> Self {
        Self(references)
    }
}

impl From<Vec<&str>> for References {
    fn from(values: Vec<&str>) -> Self {
        Self(values.into_iter().map(Reference::from).collect())
    }
}

impl From<Vec<String>> for References {
    fn from(values: Vec<String>) -> Self {
        Self(values.into_iter().map(Reference::from).collect())
    }
}

impl FromIterator<Reference> for References {
    fn from_iter<I: IntoIterator<Item = Reference>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Canonical `{type, id}` pair
///
/// `id == None` means "the whole type". `type_name == None` only appears for
/// the explicit global match or for a bare id resolved with `default_as_id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    /// Declared type
    #[serde(rename = "type")]
    pub type_name: Option<String>,

    /// Instance id
    pub id: Option<String>,
}

impl Identity {
    /// Identity of a specific instance
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            id: Some(id.into()),
        }
    }

    /// Identity of a whole type
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            id: None,
        }
    }

    /// Explicit global match
    pub fn global() -> Self {
        Self {
            type_name: None,
            id: None,
        }
    }

    /// Whether this identity names a concrete type
    pub fn is_typed(&self) -> bool {
        self.type_name.is_some()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.type_name, &self.id) {
            (Some(t), Some(id)) => write!(f, "{}:{}", t, id),
            (Some(t), None) => f.write_str(t),
            (None, Some(id)) => f.write_str(id),
            (None, None) => f.write_str("null"),
        }
    }
}

/// A polymorphic relation declared as a discriminator/foreign-key column pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polymorphic {
    /// Column holding the type name
    pub discriminator: &'static str,

    /// Column holding the instance id
    pub foreign_key: &'static str,
}

impl Polymorphic {
    /// Declare a polymorphic relation
    pub const fn new(discriminator: &'static str, foreign_key: &'static str) -> Self {
        Self {
            discriminator,
            foreign_key,
        }
    }

    /// Filter contribution for a reference
    ///
    /// The wildcard contributes nothing (`Ok(None)`).
    pub fn filter(&self, reference: &Reference, default_as_id: bool) -> Result<Option<Filter>> {
        Ok(reference
            .resolve(default_as_id)?
            .map(|identity| self.filter_for(&identity)))
    }

    /// Filter matching exactly the given identity
    pub fn filter_for(&self, identity: &Identity) -> Filter {
        Filter::new()
            .eq(self.discriminator, identity.type_name.clone())
            .eq(self.foreign_key, identity.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Article {
        id: String,
    }

    impl Identifiable for Article {
        fn type_name(&self) -> &str {
            "Article"
        }

        fn instance_id(&self) -> Option<&str> {
            Some(&self.id)
        }
    }

    #[test]
    fn test_resolve_delimited_strings() {
        assert_eq!(
            Reference::from("Article").resolve(false).unwrap(),
            Some(Identity::of_type("Article"))
        );
        assert_eq!(
            Reference::from("Article:123").resolve(false).unwrap(),
            Some(Identity::new("Article", "123"))
        );
        assert_eq!(
            Reference::from("Blog:Post:7").resolve(false).unwrap(),
            Some(Identity::new("Blog:Post", "7"))
        );
    }

    #[test]
    fn test_resolve_default_as_id() {
        let identity = Reference::from("123").resolve(true).unwrap().unwrap();
        assert_eq!(identity.type_name, None);
        assert_eq!(identity.id.as_deref(), Some("123"));

        // Delimited strings ignore the flag
        assert_eq!(
            Reference::from("Article:123").resolve(true).unwrap(),
            Some(Identity::new("Article", "123"))
        );
    }

    #[test]
    fn test_wildcard_and_null() {
        assert!(Reference::from("*").is_wildcard());
        assert!(Reference::Raw("*".to_string()).is_wildcard());
        assert_eq!(Reference::Wildcard.resolve(false).unwrap(), None);
        assert_eq!(Reference::Raw("*".to_string()).resolve(false).unwrap(), None);
        assert_eq!(
            Reference::Null.resolve(false).unwrap(),
            Some(Identity::global())
        );
        assert_eq!(Reference::from(None::<&str>), Reference::Null);
    }

    #[test]
    fn test_undefined_is_invalid() {
        assert!(matches!(
            Reference::Raw(String::new()).resolve(false),
            Err(AclError::InvalidArgument(_))
        ));
        assert!(matches!(
            Reference::Parts(vec![]).resolve(false),
            Err(AclError::InvalidArgument(_))
        ));
        assert!(Reference::type_only("").resolve(false).is_err());
    }

    #[test]
    fn test_parts_and_objects() {
        assert_eq!(
            Reference::from(["Article", "9"]).resolve(false).unwrap(),
            Some(Identity::new("Article", "9"))
        );
        assert_eq!(
            Reference::from(("Article", "9")).resolve(false).unwrap(),
            Some(Identity::new("Article", "9"))
        );

        let article = Article { id: "42".to_string() };
        assert_eq!(
            Reference::of(&article).resolve(false).unwrap(),
            Some(Identity::new("Article", "42"))
        );
        assert_eq!(
            Reference::type_only("Article").resolve(true).unwrap(),
            Some(Identity::of_type("Article"))
        );
    }

    #[test]
    fn test_polymorphic_filter() {
        let rel = Polymorphic::new("resource_type", "resource_id");

        assert!(rel.filter(&Reference::Wildcard, false).unwrap().is_none());

        let filter = rel.filter(&Reference::from("Article:1"), false).unwrap().unwrap();
        assert_eq!(
            filter,
            Filter::new()
                .eq("resource_type", Some("Article".to_string()))
                .eq("resource_id", Some("1".to_string()))
        );
    }

    #[test]
    fn test_reference_lists() {
        let single = References::from("Article");
        assert_eq!(single.len(), 1);

        let many = References::from(vec!["Article", "*", "Comment:3"]);
        assert_eq!(many.len(), 3);
        assert!(many.as_slice()[1].is_wildcard());
        assert_eq!(many.iter().last(), Some(&Reference::Raw("Comment:3".to_string())));
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::new("Article", "1").to_string(), "Article:1");
        assert_eq!(Identity::of_type("Article").to_string(), "Article");
        assert_eq!(Identity::global().to_string(), "null");
    }

    proptest! {
        #[test]
        fn prop_last_segment_is_id(
            segments in prop::collection::vec("[A-Za-z0-9_]{1,8}", 2..5)
        ) {
            let raw = segments.join(":");
            let identity = Reference::from(raw.as_str()).resolve(false).unwrap().unwrap();

            let (last, rest) = segments.split_last().unwrap();
            prop_assert_eq!(identity.id.as_deref(), Some(last.as_str()));
            prop_assert_eq!(identity.type_name, Some(rest.join(":")));
        }
    }
}
