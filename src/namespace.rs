//! The dotted namespace tree that loaded packages are published into.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PackageError;
use crate::types::{Exports, PackageName};

/// A node in the namespace tree.
///
/// A node may hold a package's exports, child nodes, or both: `css` and
/// `css.color` can be published in either order.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    exports: Option<Arc<Exports>>,
    children: BTreeMap<String, Namespace>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `exports` at the path named by `name`, creating
    /// intermediate namespaces as needed.
    ///
    /// Fails without modifying the tree if a package is already published
    /// at that path. Children already under the slot are kept.
    pub fn publish(&mut self, name: &PackageName, exports: Arc<Exports>) -> Result<(), PackageError> {
        if self.exports(name.as_str()).is_some() {
            return Err(PackageError::NamingCollision {
                package: name.to_string(),
                path: name.to_string(),
            });
        }
        let mut current = self;
        for segment in name.segments() {
            current = current.children.entry(segment.to_string()).or_default();
        }
        current.exports = Some(exports);
        Ok(())
    }

    /// Look up the node at a dotted path.
    pub fn get(&self, path: &str) -> Option<&Namespace> {
        path.split('.')
            .try_fold(self, |node, segment| node.children.get(segment))
    }

    /// Exports published at exactly `path`.
    pub fn exports(&self, path: &str) -> Option<&Arc<Exports>> {
        self.get(path)?.package()
    }

    /// Exports published at this node, if a package landed here.
    pub fn package(&self) -> Option<&Arc<Exports>> {
        self.exports.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, &Namespace)> {
        self.children
            .iter()
            .map(|(segment, node)| (segment.as_str(), node))
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_none() && self.children.is_empty()
    }

    /// Render the tree as nested JSON objects. A package renders through
    /// [`Exports::to_json`]; child namespaces are merged in and shadow
    /// members of the same name.
    pub fn to_json(&self) -> serde_json::Value {
        let mut object = match self.exports.as_deref().map(Exports::to_json) {
            Some(serde_json::Value::Object(members)) => members,
            _ => serde_json::Map::new(),
        };
        for (segment, node) in &self.children {
            object.insert(segment.clone(), node.to_json());
        }
        serde_json::Value::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    fn exports_with(key: &str, value: serde_json::Value) -> Arc<Exports> {
        let mut exports = Exports::new();
        exports.insert(key, value);
        Arc::new(exports)
    }

    #[test]
    fn test_publish_creates_intermediate_namespaces() {
        let mut namespace = Namespace::new();
        namespace
            .publish(&name("ui.widgets.tabs"), exports_with("count", 3.into()))
            .unwrap();
        namespace
            .publish(&name("ui.widgets.menu"), exports_with("open", false.into()))
            .unwrap();

        let widgets = namespace.get("ui.widgets").unwrap();
        assert!(widgets.package().is_none());
        assert_eq!(widgets.children().count(), 2);
        let tabs = namespace.exports("ui.widgets.tabs").unwrap();
        assert_eq!(
            tabs.get::<serde_json::Value>("count"),
            Some(&serde_json::json!(3))
        );
        assert_eq!(
            namespace.to_json(),
            serde_json::json!({
                "ui": { "widgets": { "menu": { "open": false }, "tabs": { "count": 3 } } }
            })
        );
    }

    #[test]
    fn test_child_package_nests_under_parent_package() {
        let mut namespace = Namespace::new();
        namespace
            .publish(&name("css"), exports_with("units", "px".into()))
            .unwrap();
        namespace
            .publish(&name("css.color"), exports_with("white", "#fff".into()))
            .unwrap();

        assert!(namespace.exports("css").is_some());
        assert!(namespace.exports("css.color").is_some());
        assert_eq!(
            namespace.to_json(),
            serde_json::json!({ "css": { "units": "px", "color": { "white": "#fff" } } })
        );
    }

    #[test]
    fn test_parent_package_keeps_existing_children() {
        let mut namespace = Namespace::new();
        namespace
            .publish(&name("css.color"), exports_with("white", "#fff".into()))
            .unwrap();
        namespace
            .publish(&name("css"), exports_with("units", "px".into()))
            .unwrap();

        let css = namespace.get("css").unwrap();
        assert!(css.package().is_some());
        assert!(namespace.exports("css.color").is_some());
    }

    #[test]
    fn test_occupied_package_slot_is_collision_and_leaves_tree_untouched() {
        let mut namespace = Namespace::new();
        let first = exports_with("version", 1.into());
        namespace.publish(&name("a.b"), Arc::clone(&first)).unwrap();
        namespace.publish(&name("a.b.c"), Arc::default()).unwrap();

        let err = namespace.publish(&name("a.b"), Arc::default()).unwrap_err();
        match err {
            PackageError::NamingCollision { package, path } => {
                assert_eq!(package, "a.b");
                assert_eq!(path, "a.b");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(Arc::ptr_eq(namespace.exports("a.b").unwrap(), &first));
        assert!(namespace.exports("a.b.c").is_some());
    }

    #[test]
    fn test_lookup_of_missing_path() {
        let mut namespace = Namespace::new();
        assert!(namespace.is_empty());
        namespace.publish(&name("x.y"), Arc::default()).unwrap();
        assert!(namespace.get("x.y.z").is_none());
        assert!(namespace.exports("x").is_none());
        assert!(!namespace.is_empty());
    }
}
