use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::path::PackagePath;

/// Loader settings, usually read from a TOML file:
///
/// ```toml
/// base_path = "packages/"
/// extension = "toml"
/// fetch_timeout_ms = 5000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    pub base_path: String,
    pub extension: String,
    /// Omitting the key uses the default; `0` waits on fetches indefinitely.
    pub fetch_timeout_ms: Option<u64>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_path: "/".to_string(),
            extension: "js".to_string(),
            fetch_timeout_ms: Some(30_000),
        }
    }
}

impl LoaderConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read loader config '{}': {e}", path.display()))?;
        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse loader config '{}': {e}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn fetch_timeout(&self) -> Option<Duration> {
        self.fetch_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn package_path(&self) -> PackagePath {
        PackagePath::new(&self.base_path, &self.extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = LoaderConfig::parse("base_path = \"../packages\"").unwrap();
        assert_eq!(config.extension, "js");
        assert_eq!(config.fetch_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.package_path().base(), "../packages/");
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(LoaderConfig::parse("useMinified = true").is_err());
        let config = LoaderConfig::parse("fetch_timeout_ms = 0").unwrap();
        assert_eq!(config.fetch_timeout(), None);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            "base_path = \"pkgs\"\nextension = \"toml\"\nfetch_timeout_ms = 250\n"
        )
        .unwrap();

        let config = LoaderConfig::from_file(file.path()).unwrap();
        assert_eq!(config.fetch_timeout(), Some(Duration::from_millis(250)));
        let name = crate::types::PackageName::parse("a.b").unwrap();
        assert_eq!(config.package_path().resolve(&name), "pkgs/a/b.toml");

        let err = LoaderConfig::from_file(Path::new("/nonexistent/loader.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read loader config"));
    }
}
