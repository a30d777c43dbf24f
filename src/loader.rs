use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;

use crate::config::LoaderConfig;
use crate::error::PackageError;
use crate::fetch::{FetchRequest, Fetcher};
use crate::graph::PackageGraph;
use crate::registry::{PackageState, Registry, StalledPackage, Waiter};
use crate::types::{Exports, PackageDefinition, PackageName};

/// Asynchronous package loader.
///
/// Wraps a [`Registry`] and turns its fetch requests into tokio tasks
/// that call the [`Fetcher`], declare what it returns, and fail the
/// package (and everything waiting on it) on error or timeout.
///
/// Package bodies and `require_with` callbacks run while the registry is
/// locked. They must not call back into the `Loader`; callbacks get the
/// `&mut Registry` to use instead.
pub struct Loader<F: Fetcher> {
    inner: Arc<Shared<F>>,
}

struct Shared<F> {
    registry: Mutex<Registry>,
    fetcher: F,
    fetch_timeout: Option<Duration>,
}

impl<F: Fetcher> Clone for Loader<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: Fetcher> Loader<F> {
    /// Create a LoaderBuilder around a fetcher
    pub fn builder(fetcher: F) -> LoaderBuilder<F> {
        LoaderBuilder::new(fetcher)
    }

    /// Declare a package. The first error raised by its body, or by the
    /// bodies of dependents it unblocks, is returned here.
    ///
    /// A package whose body fails, or whose exports cannot be published,
    /// is marked failed so that handles waiting on it reject. The error
    /// returned for it is `Unavailable`, with the body error as its cause.
    pub fn declare(&self, definition: PackageDefinition) -> Result<(), PackageError> {
        self.with_registry(|registry| {
            let errors = registry.declare_reporting(definition);
            settle(registry, errors, None)
        })
    }

    /// Handle that resolves once `name` has loaded.
    ///
    /// Invalid names and packages that fail to load are reported through
    /// the handle, never here.
    pub fn require(&self, name: &str) -> PackageHandle {
        let (sender, receiver) = oneshot::channel();
        match PackageName::parse(name) {
            Ok(package) => {
                let result = self.with_registry(|registry| {
                    let errors = registry.enqueue(&package, Waiter::Notify(sender));
                    settle(registry, errors, None)
                });
                if let Err(error) = result {
                    tracing::debug!(package = %package, %error, "require rejected");
                }
            }
            Err(error) => {
                let _ = sender.send(Err(error));
            }
        }
        PackageHandle {
            package: name.to_string(),
            receiver,
        }
    }

    /// Load a package and return its exports.
    pub async fn load(&self, name: &str) -> Result<Arc<Exports>, PackageError> {
        self.require(name).await
    }

    /// Run `callback` with the registry once `name` has loaded.
    pub fn require_with<C>(&self, name: &str, callback: C) -> Result<(), PackageError>
    where
        C: FnOnce(&mut Registry) -> anyhow::Result<()> + Send + 'static,
    {
        self.with_registry(|registry| {
            let errors = registry.require_reporting(name, callback);
            settle(registry, errors, None)
        })
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.registry().is_loaded(name)
    }

    pub fn state(&self, name: &str) -> Option<PackageState> {
        self.registry().state(name)
    }

    pub fn exports(&self, name: &str) -> Option<Arc<Exports>> {
        self.registry().exports(name)
    }

    pub fn set_base_path(&self, base: &str) {
        self.registry().set_base_path(base);
    }

    pub fn resolve(&self, name: &str) -> Result<String, PackageError> {
        self.registry().resolve(name)
    }

    pub fn pending(&self) -> Vec<StalledPackage> {
        self.registry().pending()
    }

    pub fn graph(&self) -> PackageGraph {
        PackageGraph::from_registry(&self.registry())
    }

    pub fn namespace_json(&self) -> serde_json::Value {
        self.registry().namespace().to_json()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one registry operation, then dispatch whatever fetches it
    /// requested.
    fn with_registry<T>(&self, op: impl FnOnce(&mut Registry) -> T) -> T {
        let (result, requests) = {
            let mut registry = self.registry();
            let result = op(&mut registry);
            (result, registry.take_fetch_requests())
        };
        self.dispatch(requests);
        result
    }

    fn dispatch(&self, requests: Vec<FetchRequest>) {
        if requests.is_empty() {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.with_registry(|registry| {
                    for request in &requests {
                        registry.fail(
                            &request.name,
                            PackageError::Fetch {
                                package: request.name.to_string(),
                                location: request.location.clone(),
                                source: anyhow::anyhow!("No tokio runtime to fetch on: {e}"),
                            },
                        );
                    }
                });
                return;
            }
        };
        for request in requests {
            let loader = self.clone();
            handle.spawn(async move { loader.fetch(request).await });
        }
    }

    async fn fetch(&self, request: FetchRequest) {
        tracing::debug!(package = %request.name, location = %request.location, "fetching package");
        let fetch = self.inner.fetcher.fetch(&request);
        let fetched = match self.inner.fetch_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fetch).await {
                Ok(result) => result.map_err(|source| fetch_error(&request, source)),
                Err(_) => Err(PackageError::FetchTimeout {
                    package: request.name.to_string(),
                    location: request.location.clone(),
                    timeout,
                }),
            },
            None => fetch.await.map_err(|source| fetch_error(&request, source)),
        };
        self.with_registry(|registry| complete_fetch(registry, &request, fetched));
    }
}

fn fetch_error(request: &FetchRequest, source: anyhow::Error) -> PackageError {
    PackageError::Fetch {
        package: request.name.to_string(),
        location: request.location.clone(),
        source,
    }
}

/// Declare a fetched definition, or fail the requested package.
fn complete_fetch(
    registry: &mut Registry,
    request: &FetchRequest,
    fetched: Result<PackageDefinition, PackageError>,
) {
    if registry.is_declared(request.name.as_str()) {
        tracing::debug!(package = %request.name, "package was declared before its fetch completed");
        return;
    }
    let definition = match fetched {
        Ok(definition) => definition,
        Err(error) => {
            registry.fail(&request.name, error);
            return;
        }
    };
    if definition.name != request.name.as_str() {
        registry.fail(
            &request.name,
            PackageError::NameMismatch {
                requested: request.name.to_string(),
                declared: definition.name,
            },
        );
        return;
    }

    let errors = registry.declare_reporting(definition);
    if let Err(error) = settle(registry, errors, Some(&request.name)) {
        tracing::warn!(package = %request.name, %error, "error while declaring fetched package");
    }
}

/// Fail every package left stuck by `errors` and return the first error.
///
/// Errors that do not name a stuck package are attributed to `requested`
/// when given. Failed packages are reported as `Unavailable`.
fn settle(
    registry: &mut Registry,
    errors: Vec<PackageError>,
    requested: Option<&PackageName>,
) -> Result<(), PackageError> {
    let mut first = None;
    for error in errors {
        let error = match culprit(&error, requested) {
            Some(package) => {
                let cause = registry.fail(&package, error);
                PackageError::Unavailable {
                    package: package.to_string(),
                    cause,
                }
            }
            None => error,
        };
        if first.is_none() {
            first = Some(error);
        } else {
            tracing::warn!(%error, "additional error while loading packages");
        }
    }
    first.map_or(Ok(()), Err)
}

/// The package an error leaves pending with no way to finish loading.
fn culprit(error: &PackageError, requested: Option<&PackageName>) -> Option<PackageName> {
    match error {
        PackageError::Body { package, .. } | PackageError::NamingCollision { package, .. } => {
            PackageName::parse(package).ok()
        }
        // A callback that declared a package may have left it stuck.
        PackageError::Callback { source, .. } => source
            .downcast_ref::<PackageError>()
            .and_then(|inner| culprit(inner, None)),
        PackageError::Unavailable { .. } | PackageError::Redefinition { .. } => None,
        _ => requested.cloned(),
    }
}

/// Builder for configuring and creating a Loader
pub struct LoaderBuilder<F: Fetcher> {
    fetcher: F,
    config: LoaderConfig,
}

impl<F: Fetcher> LoaderBuilder<F> {
    fn new(fetcher: F) -> Self {
        Self {
            fetcher,
            config: LoaderConfig::default(),
        }
    }

    pub fn config(mut self, config: LoaderConfig) -> Self {
        self.config = config;
        self
    }

    pub fn base_path(mut self, base: impl Into<String>) -> Self {
        self.config.base_path = base.into();
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.config.extension = extension.into();
        self
    }

    /// Fail fetches that take longer than `timeout`.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout_ms = Some(
            u64::try_from(timeout.as_millis())
                .unwrap_or(u64::MAX)
                .max(1),
        );
        self
    }

    pub fn without_fetch_timeout(mut self) -> Self {
        self.config.fetch_timeout_ms = Some(0);
        self
    }

    pub fn build(self) -> Loader<F> {
        Loader {
            inner: Arc::new(Shared {
                registry: Mutex::new(Registry::with_path(self.config.package_path())),
                fetcher: self.fetcher,
                fetch_timeout: self.config.fetch_timeout(),
            }),
        }
    }
}

/// Resolves to a package's exports once it has loaded.
#[derive(Debug)]
pub struct PackageHandle {
    package: String,
    receiver: oneshot::Receiver<Result<Arc<Exports>, PackageError>>,
}

impl PackageHandle {
    pub fn package(&self) -> &str {
        &self.package
    }
}

impl Future for PackageHandle {
    type Output = Result<Arc<Exports>, PackageError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.receiver).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(PackageError::Abandoned {
                    package: this.package.clone(),
                })
            })
        })
    }
}
