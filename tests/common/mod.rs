#![allow(dead_code)]

use package_loader::{BundleFetcher, FetchRequest, Fetcher, PackageDefinition};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub type Log = Arc<Mutex<Vec<String>>>;

/// Definition whose body appends its name to `log` and exports it as `label`.
pub fn recording(name: &str, log: &Log) -> PackageDefinition {
    let log = Arc::clone(log);
    let label = name.to_string();
    PackageDefinition::new(name, move |exports| {
        log.lock().unwrap().push(label.clone());
        exports.insert("label", serde_json::Value::String(label));
        Ok(())
    })
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// Wraps a `BundleFetcher`, counting fetches per location and
/// optionally delaying or hanging individual locations.
#[derive(Clone, Default)]
pub struct TestFetcher {
    bundle: BundleFetcher,
    delays: HashMap<String, Duration>,
    hanging: Vec<String>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl TestFetcher {
    pub fn new(bundle: BundleFetcher) -> Self {
        Self {
            bundle,
            ..Self::default()
        }
    }

    pub fn delay(mut self, location: &str, delay: Duration) -> Self {
        self.delays.insert(location.to_string(), delay);
        self
    }

    pub fn hang(mut self, location: &str) -> Self {
        self.hanging.push(location.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Fetcher for TestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> anyhow::Result<PackageDefinition> {
        self.fetched.lock().unwrap().push(request.location.clone());
        if self.hanging.contains(&request.location) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delays.get(&request.location) {
            tokio::time::sleep(*delay).await;
        }
        self.bundle.fetch(request).await
    }
}

/// Bundle serving `recording` definitions for `(name, prerequisites)`
/// pairs at their default locations (`/a/b.js`).
pub fn recording_bundle(packages: &[(&str, &[&str])], log: &Log) -> BundleFetcher {
    let mut bundle = BundleFetcher::new();
    for (name, prerequisites) in packages {
        let name = name.to_string();
        let prerequisites: Vec<String> = prerequisites.iter().map(|p| p.to_string()).collect();
        let location = format!("/{}.js", name.replace('.', "/"));
        let log = Arc::clone(log);
        bundle.insert(location, move || {
            recording(&name, &log).require(prerequisites.clone())
        });
    }
    bundle
}

/// Write manifest files into a fresh temporary directory.
pub fn create_manifest_dir(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (relative, content) in files {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
    }
    dir
}

pub fn base_path(dir: &Path) -> String {
    dir.to_string_lossy().to_string()
}
