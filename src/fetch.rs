use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::types::{PackageDefinition, PackageName};

/// A request to retrieve the source of a package that is not yet known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub name: PackageName,
    pub location: String,
}

/// Retrieves declaration records for packages the registry is missing.
///
/// The loader checks that the returned definition is named after the
/// requested package before declaring it.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, request: &FetchRequest)
    -> impl Future<Output = Result<PackageDefinition>> + Send;
}

/// Fetches packages from TOML manifests on the local filesystem.
///
/// ```toml
/// name = "fx"
/// require = ["dom", "css"]
///
/// [exports]
/// duration = 400
/// ```
#[derive(Debug, Clone, Default)]
pub struct ManifestFetcher;

impl Fetcher for ManifestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<PackageDefinition> {
        let path = request
            .location
            .strip_prefix("file://")
            .unwrap_or(&request.location);
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read manifest '{path}': {e}"))?;
        parse_manifest(&content)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageManifest {
    name: String,
    #[serde(default)]
    require: Vec<String>,
    #[serde(default)]
    exports: toml::Table,
}

/// Parse a TOML manifest into a definition whose body publishes the
/// manifest's `[exports]` table as JSON members.
pub fn parse_manifest(content: &str) -> Result<PackageDefinition> {
    let manifest: PackageManifest =
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Invalid package manifest: {e}"))?;
    let members = convert_toml_table_to_json_map(&manifest.exports);
    let definition = PackageDefinition::new(manifest.name, move |exports| {
        for (key, value) in members {
            exports.insert(key, value);
        }
        Ok(())
    });
    Ok(definition.require(manifest.require))
}

fn convert_toml_table_to_json_map(
    table: &toml::map::Map<String, toml::Value>,
) -> HashMap<String, serde_json::Value> {
    table
        .iter()
        .map(|(key, value)| (key.clone(), convert_toml_value_to_json(value)))
        .collect()
}

fn convert_toml_value_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s.clone()),
        toml::Value::Integer(i) => serde_json::Value::Number((*i).into()),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        toml::Value::Boolean(b) => serde_json::Value::Bool(*b),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(convert_toml_value_to_json).collect())
        }
        toml::Value::Table(table) => {
            serde_json::Value::Object(convert_toml_table_to_json_map(table).into_iter().collect())
        }
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
    }
}

type DefinitionFactory = Arc<dyn Fn() -> PackageDefinition + Send + Sync>;

/// Serves package definitions compiled into the host, keyed by the
/// location they resolve to.
#[derive(Clone, Default)]
pub struct BundleFetcher {
    bundles: HashMap<String, DefinitionFactory>,
}

impl BundleFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory producing the definition served at `location`.
    pub fn with_package<F>(mut self, location: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> PackageDefinition + Send + Sync + 'static,
    {
        self.insert(location, factory);
        self
    }

    pub fn insert<F>(&mut self, location: impl Into<String>, factory: F)
    where
        F: Fn() -> PackageDefinition + Send + Sync + 'static,
    {
        self.bundles.insert(location.into(), Arc::new(factory));
    }

    pub fn contains(&self, location: &str) -> bool {
        self.bundles.contains_key(location)
    }
}

impl Fetcher for BundleFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<PackageDefinition> {
        let factory = self
            .bundles
            .get(&request.location)
            .ok_or_else(|| anyhow::anyhow!("No bundled package at '{}'", request.location))?;
        Ok(factory())
    }
}

impl std::fmt::Debug for BundleFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut locations: Vec<_> = self.bundles.keys().collect();
        locations.sort();
        f.debug_struct("BundleFetcher")
            .field("locations", &locations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Exports;

    #[test]
    fn test_parse_manifest() {
        let definition = parse_manifest(
            r#"
            name = "fx"
            require = ["dom", "css"]

            [exports]
            duration = 400
            easing = "swing"
            ratio = 0.5
            steps = [1, 2]

            [exports.colors]
            from = "white"
            "#,
        )
        .unwrap();
        assert_eq!(definition.name, "fx");
        assert_eq!(definition.prerequisites, vec!["dom", "css"]);

        let mut exports = Exports::new();
        (definition.body)(&mut exports).unwrap();
        assert_eq!(
            exports.to_json(),
            serde_json::json!({
                "duration": 400,
                "easing": "swing",
                "ratio": 0.5,
                "steps": [1, 2],
                "colors": { "from": "white" },
            })
        );
    }

    #[test]
    fn test_manifest_requires_name() {
        let err = parse_manifest("require = []").unwrap_err();
        assert!(err.to_string().contains("Invalid package manifest"));
        assert!(parse_manifest("name = \"a\"\nunknown = 1").is_err());
    }

    #[tokio::test]
    async fn test_bundle_fetcher_serves_by_location() {
        let fetcher = BundleFetcher::new().with_package("/utils.js", || {
            PackageDefinition::new("utils", |exports| {
                exports.insert("version", 1u8);
                Ok(())
            })
        });
        let request = FetchRequest {
            name: PackageName::parse("utils").unwrap(),
            location: "/utils.js".to_string(),
        };
        let definition = fetcher.fetch(&request).await.unwrap();
        assert_eq!(definition.name, "utils");

        let missing = FetchRequest {
            name: PackageName::parse("json").unwrap(),
            location: "/json.js".to_string(),
        };
        assert!(fetcher.fetch(&missing).await.is_err());
    }
}
