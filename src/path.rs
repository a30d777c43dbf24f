use crate::types::PackageName;

/// Maps package names to the locations their sources are fetched from.
///
/// `resolve("a.b")` with base `foo/` and extension `js` gives `foo/a/b.js`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePath {
    base: String,
    extension: String,
}

impl PackagePath {
    pub fn new(base: &str, extension: &str) -> Self {
        let mut path = Self {
            base: String::new(),
            extension: extension.trim_start_matches('.').to_string(),
        };
        path.set_base(base);
        path
    }

    /// Set the base path. A trailing separator is added when missing;
    /// an empty base resolves names relative to the current location.
    pub fn set_base(&mut self, base: &str) {
        self.base = base.to_string();
        if !self.base.is_empty() && !self.base.ends_with('/') {
            self.base.push('/');
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn resolve(&self, name: &PackageName) -> String {
        let relative = name.segments().collect::<Vec<_>>().join("/");
        if self.extension.is_empty() {
            format!("{}{relative}", self.base)
        } else {
            format!("{}{relative}.{}", self.base, self.extension)
        }
    }
}

impl Default for PackagePath {
    fn default() -> Self {
        Self::new("/", "js")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    #[test]
    fn test_default_base_is_root() {
        let path = PackagePath::default();
        assert_eq!(path.base(), "/");
        assert_eq!(path.resolve(&name("fx")), "/fx.js");
        assert_eq!(path.resolve(&name("ui.widgets.tabs")), "/ui/widgets/tabs.js");
    }

    #[test]
    fn test_trailing_separator_is_idempotent() {
        let mut path = PackagePath::default();
        path.set_base("foo");
        assert_eq!(path.resolve(&name("a.b")), "foo/a/b.js");
        path.set_base("foo/");
        assert_eq!(path.resolve(&name("a.b")), "foo/a/b.js");
    }

    #[test]
    fn test_empty_base_and_custom_extension() {
        let path = PackagePath::new("", ".toml");
        assert_eq!(path.extension(), "toml");
        assert_eq!(path.resolve(&name("a.b")), "a/b.toml");

        let bare = PackagePath::new("../packages", "");
        assert_eq!(bare.resolve(&name("cssColor")), "../packages/cssColor");
    }
}
