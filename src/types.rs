//! Core type definitions shared across the crate.

use std::any::Any;
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PackageError;

/// A validated, dot-segmented package name such as `ui.widgets.tabs`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageName(String);

impl PackageName {
    pub fn parse(name: &str) -> Result<Self, PackageError> {
        if name.is_empty() || name.split('.').any(str::is_empty) {
            return Err(PackageError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Body of a package. Receives a fresh export object to populate.
pub type PackageBody = Box<dyn FnOnce(&mut Exports) -> anyhow::Result<()> + Send>;

/// Declaration record for a package: its name, prerequisites and body.
pub struct PackageDefinition {
    pub name: String,
    pub prerequisites: Vec<String>,
    pub body: PackageBody,
}

impl PackageDefinition {
    pub fn new<B>(name: impl Into<String>, body: B) -> Self
    where
        B: FnOnce(&mut Exports) -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            name: name.into(),
            prerequisites: Vec::new(),
            body: Box::new(body),
        }
    }

    /// Add prerequisites that must be loaded before the body runs.
    pub fn require<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites
            .extend(prerequisites.into_iter().map(Into::into));
        self
    }
}

impl std::fmt::Debug for PackageDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageDefinition")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .finish_non_exhaustive()
    }
}

/// The export object a package body populates.
///
/// Members are stored by name and retrieved by type. Once a package has
/// loaded its exports are shared behind an `Arc` and never rebound;
/// members that need to change afterwards must carry their own interior
/// mutability.
#[derive(Default, Clone)]
pub struct Exports {
    members: BTreeMap<String, Arc<dyn Any + Send + Sync>>,
}

impl Exports {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a member, replacing any previous member of the same name.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.members.insert(name.into(), Arc::new(value));
    }

    /// Get a reference to a member if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.members
            .get(name)
            .and_then(|member| (**member).downcast_ref::<T>())
    }

    /// Get a shared handle to a member if it exists and has type `T`.
    pub fn get_shared<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.members
            .get(name)
            .cloned()
            .and_then(|member| member.downcast::<T>().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.members.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// JSON object of the members that hold `serde_json::Value` data.
    pub fn to_json(&self) -> serde_json::Value {
        let object: serde_json::Map<String, serde_json::Value> = self
            .members
            .iter()
            .filter_map(|(name, member)| {
                (**member)
                    .downcast_ref::<serde_json::Value>()
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();
        serde_json::Value::Object(object)
    }
}

impl std::fmt::Debug for Exports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Exports")
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}
