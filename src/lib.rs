//! Lazy Package Loader
//!
//! Declares named packages with prerequisites, runs each package body
//! once its prerequisites have loaded, fetches missing prerequisites on
//! demand, and publishes exports into a dotted namespace.

pub use config::LoaderConfig;
pub use error::PackageError;
pub use fetch::{BundleFetcher, FetchRequest, Fetcher, ManifestFetcher};
pub use graph::PackageGraph;
pub use loader::{Loader, LoaderBuilder, PackageHandle};
pub use namespace::Namespace;
pub use path::PackagePath;
pub use registry::{PackageState, Registry, StalledPackage};
pub use types::{Exports, PackageDefinition, PackageName};

pub mod config;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod loader;
pub mod namespace;
pub mod path;
pub mod registry;
pub mod types;
