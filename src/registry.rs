use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::PackageError;
use crate::fetch::FetchRequest;
use crate::graph;
use crate::namespace::Namespace;
use crate::path::PackagePath;
use crate::types::{Exports, PackageBody, PackageDefinition, PackageName};

/// Callback registered with [`Registry::require`]. It receives the
/// registry so it can declare or require further packages.
pub type Callback = Box<dyn FnOnce(&mut Registry) -> anyhow::Result<()> + Send>;

pub(crate) type Notifier = oneshot::Sender<Result<Arc<Exports>, PackageError>>;

#[derive(Debug, Clone)]
pub enum PackageState {
    Pending,
    Loaded,
    Failed(Arc<PackageError>),
}

impl PackageState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded)
    }
}

pub(crate) enum Waiter {
    /// Re-check whether a dependent package can run.
    Recheck(PackageName),
    Callback(Callback),
    Notify(Notifier),
}

struct PackageEntry {
    state: PackageState,
    declared: bool,
    prerequisites: Vec<PackageName>,
    body: Option<PackageBody>,
    waiters: Vec<Waiter>,
    exports: Option<Arc<Exports>>,
}

impl PackageEntry {
    fn pending(waiters: Vec<Waiter>) -> Self {
        Self {
            state: PackageState::Pending,
            declared: false,
            prerequisites: Vec::new(),
            body: None,
            waiters,
            exports: None,
        }
    }
}

/// A package that is still waiting, and the prerequisites holding it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledPackage {
    pub name: PackageName,
    pub declared: bool,
    pub waiting_on: Vec<PackageName>,
}

/// Registry of every package referenced so far.
///
/// Declaring a package runs its body once all of its prerequisites have
/// loaded. Prerequisites the registry has never seen become fetch
/// requests, collected with [`Registry::take_fetch_requests`]; the
/// fetched source is expected to be declared back into the registry.
pub struct Registry {
    entries: HashMap<PackageName, PackageEntry>,
    namespace: Namespace,
    path: PackagePath,
    fetch_requests: Vec<FetchRequest>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_path(PackagePath::default())
    }

    pub fn with_path(path: PackagePath) -> Self {
        Self {
            entries: HashMap::new(),
            namespace: Namespace::new(),
            path,
            fetch_requests: Vec::new(),
        }
    }

    /// Declare a package. Its body runs now if every prerequisite is
    /// already loaded, otherwise as soon as the last one loads.
    pub fn declare(&mut self, definition: PackageDefinition) -> Result<(), PackageError> {
        first_error(self.declare_reporting(definition))
    }

    /// Like [`Registry::declare`], but returns every error raised while
    /// the declaration and the loads it unblocked ran, in order.
    pub fn declare_reporting(&mut self, definition: PackageDefinition) -> Vec<PackageError> {
        let mut errors = Vec::new();
        if let Err(error) = self.try_declare(definition, &mut errors) {
            errors.push(error);
        }
        errors
    }

    fn try_declare(
        &mut self,
        definition: PackageDefinition,
        errors: &mut Vec<PackageError>,
    ) -> Result<(), PackageError> {
        let name = PackageName::parse(&definition.name)?;
        let prerequisites = definition
            .prerequisites
            .iter()
            .map(|prerequisite| PackageName::parse(prerequisite))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(entry) = self.entries.get(&name) {
            match &entry.state {
                PackageState::Loaded => return Err(redefinition(&name)),
                PackageState::Pending if entry.declared => return Err(redefinition(&name)),
                PackageState::Pending => {}
                PackageState::Failed(cause) => return Err(unavailable(&name, cause)),
            }
        }
        if let Some(involving) = graph::find_cycle(self, &name, &prerequisites) {
            return Err(PackageError::Cycle {
                package: name.to_string(),
                involving: involving.to_string(),
            });
        }
        let failed = prerequisites
            .iter()
            .find_map(|prerequisite| match self.entries.get(prerequisite).map(|e| &e.state) {
                Some(PackageState::Failed(cause)) => Some(Arc::clone(cause)),
                _ => None,
            });

        tracing::debug!(package = %name, ?prerequisites, "declaring package");
        let entry = self
            .entries
            .entry(name.clone())
            .or_insert_with(|| PackageEntry::pending(Vec::new()));
        entry.declared = true;
        entry.prerequisites = prerequisites.clone();

        if let Some(cause) = failed {
            // Fails anything already waiting on this package.
            self.fail(&name, unavailable(&name, &cause));
            return Err(unavailable(&name, &cause));
        }
        entry.body = Some(definition.body);

        for prerequisite in &prerequisites {
            match self.entries.get_mut(prerequisite) {
                None => {
                    self.entries.insert(
                        prerequisite.clone(),
                        PackageEntry::pending(vec![Waiter::Recheck(name.clone())]),
                    );
                    self.request_fetch(prerequisite);
                }
                Some(entry) => {
                    if matches!(entry.state, PackageState::Pending) {
                        entry.waiters.push(Waiter::Recheck(name.clone()));
                    }
                }
            }
        }

        self.recheck(&name, errors);
        Ok(())
    }

    /// Run `callback` once `name` has loaded: immediately if it already
    /// has, otherwise after every callback queued before it. Unknown
    /// packages are fetched.
    pub fn require<F>(&mut self, name: &str, callback: F) -> Result<(), PackageError>
    where
        F: FnOnce(&mut Registry) -> anyhow::Result<()> + Send + 'static,
    {
        first_error(self.require_reporting(name, callback))
    }

    /// Like [`Registry::require`], but returns every error raised.
    pub fn require_reporting<F>(&mut self, name: &str, callback: F) -> Vec<PackageError>
    where
        F: FnOnce(&mut Registry) -> anyhow::Result<()> + Send + 'static,
    {
        match PackageName::parse(name) {
            Ok(name) => self.enqueue(&name, Waiter::Callback(Box::new(callback))),
            Err(error) => vec![error],
        }
    }

    pub(crate) fn enqueue(&mut self, name: &PackageName, waiter: Waiter) -> Vec<PackageError> {
        let mut errors = Vec::new();
        let state = self.entries.get(name).map(|entry| entry.state.clone());
        match state {
            None => {
                self.entries
                    .insert(name.clone(), PackageEntry::pending(vec![waiter]));
                self.request_fetch(name);
            }
            Some(PackageState::Pending) => {
                if let Some(entry) = self.entries.get_mut(name) {
                    entry.waiters.push(waiter);
                }
            }
            Some(PackageState::Loaded) => {
                let exports = self.exports(name.as_str()).unwrap_or_default();
                self.run_waiters(name, vec![waiter], &exports, &mut errors);
            }
            Some(PackageState::Failed(cause)) => {
                self.reject(name, waiter, &cause);
                errors.push(unavailable(name, &cause));
            }
        }
        errors
    }

    /// Mark a pending package as failed. Every waiter is rejected and
    /// every dependent still waiting on it fails as well.
    pub fn fail(&mut self, name: &PackageName, error: PackageError) -> Arc<PackageError> {
        let cause = Arc::new(error);
        let Some(entry) = self.entries.get_mut(name) else {
            return cause;
        };
        if !matches!(entry.state, PackageState::Pending) {
            return cause;
        }
        tracing::warn!(package = %name, error = %cause, "package failed to load");
        entry.state = PackageState::Failed(Arc::clone(&cause));
        entry.body = None;
        let waiters = std::mem::take(&mut entry.waiters);
        for waiter in waiters {
            self.reject(name, waiter, &cause);
        }
        cause
    }

    fn reject(&mut self, name: &PackageName, waiter: Waiter, cause: &Arc<PackageError>) {
        match waiter {
            Waiter::Recheck(dependent) => {
                let error = unavailable(&dependent, cause);
                self.fail(&dependent, error);
            }
            Waiter::Callback(_) => {
                tracing::warn!(package = %name, "dropping require callback for failed package");
            }
            Waiter::Notify(sender) => {
                let _ = sender.send(Err(unavailable(name, cause)));
            }
        }
    }

    /// Run the package body if it is declared, still pending, and every
    /// prerequisite has loaded. Safe to call any number of times.
    fn recheck(&mut self, name: &PackageName, errors: &mut Vec<PackageError>) {
        let Some(entry) = self.entries.get(name) else {
            return;
        };
        if !matches!(entry.state, PackageState::Pending) || entry.body.is_none() {
            return;
        }
        if !entry
            .prerequisites
            .iter()
            .all(|prerequisite| self.is_loaded(prerequisite.as_str()))
        {
            return;
        }
        if let Some(body) = self.entries.get_mut(name).and_then(|entry| entry.body.take()) {
            self.execute(name, body, errors);
        }
    }

    fn execute(&mut self, name: &PackageName, body: PackageBody, errors: &mut Vec<PackageError>) {
        let mut exports = Exports::new();
        if let Err(source) = body(&mut exports) {
            errors.push(PackageError::Body {
                package: name.to_string(),
                source,
            });
            return;
        }
        let exports = Arc::new(exports);
        if let Err(error) = self.namespace.publish(name, Arc::clone(&exports)) {
            errors.push(error);
            return;
        }

        let Some(entry) = self.entries.get_mut(name) else {
            return;
        };
        entry.state = PackageState::Loaded;
        entry.exports = Some(Arc::clone(&exports));
        let waiters = std::mem::take(&mut entry.waiters);
        tracing::info!(package = %name, waiters = waiters.len(), "package loaded");

        self.run_waiters(name, waiters, &exports, errors);
    }

    /// Invoke waiters in order. A failing waiter does not stop the ones
    /// after it.
    fn run_waiters(
        &mut self,
        name: &PackageName,
        waiters: Vec<Waiter>,
        exports: &Arc<Exports>,
        errors: &mut Vec<PackageError>,
    ) {
        for waiter in waiters {
            match waiter {
                Waiter::Recheck(dependent) => self.recheck(&dependent, errors),
                Waiter::Callback(callback) => {
                    if let Err(source) = callback(self) {
                        errors.push(PackageError::Callback {
                            package: name.to_string(),
                            source,
                        });
                    }
                }
                Waiter::Notify(sender) => {
                    let _ = sender.send(Ok(Arc::clone(exports)));
                }
            }
        }
    }

    fn request_fetch(&mut self, name: &PackageName) {
        let location = self.path.resolve(name);
        tracing::debug!(package = %name, %location, "requesting fetch");
        self.fetch_requests.push(FetchRequest {
            name: name.clone(),
            location,
        });
    }

    /// Drain the fetch requests emitted since the last call. Each name is
    /// requested at most once over the registry's lifetime.
    pub fn take_fetch_requests(&mut self) -> Vec<FetchRequest> {
        std::mem::take(&mut self.fetch_requests)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.entries
            .get(name)
            .is_some_and(|entry| entry.state.is_loaded())
    }

    /// Whether the package's own declaration has been received.
    pub fn is_declared(&self, name: &str) -> bool {
        self.entries.get(name).is_some_and(|entry| entry.declared)
    }

    pub fn state(&self, name: &str) -> Option<PackageState> {
        self.entries.get(name).map(|entry| entry.state.clone())
    }

    pub fn exports(&self, name: &str) -> Option<Arc<Exports>> {
        self.entries.get(name).and_then(|entry| entry.exports.clone())
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Affects fetch requests emitted from now on.
    pub fn set_base_path(&mut self, base: &str) {
        self.path.set_base(base);
    }

    pub fn path(&self) -> &PackagePath {
        &self.path
    }

    pub fn resolve(&self, name: &str) -> Result<String, PackageError> {
        Ok(self.path.resolve(&PackageName::parse(name)?))
    }

    /// Packages still pending, with the prerequisites they wait on.
    pub fn pending(&self) -> Vec<StalledPackage> {
        let mut stalled: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| matches!(entry.state, PackageState::Pending))
            .map(|(name, entry)| StalledPackage {
                name: name.clone(),
                declared: entry.declared,
                waiting_on: entry
                    .prerequisites
                    .iter()
                    .filter(|prerequisite| !self.is_loaded(prerequisite.as_str()))
                    .cloned()
                    .collect(),
            })
            .collect();
        stalled.sort_by(|a, b| a.name.cmp(&b.name));
        stalled
    }

    /// Every known package with its state and declared prerequisites.
    pub fn packages(&self) -> impl Iterator<Item = (&PackageName, &PackageState, &[PackageName])> {
        self.entries
            .iter()
            .map(|(name, entry)| (name, &entry.state, entry.prerequisites.as_slice()))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut states: Vec<_> = self
            .entries
            .iter()
            .map(|(name, entry)| (name.as_str(), &entry.state))
            .collect();
        states.sort_by_key(|(name, _)| *name);
        f.debug_struct("Registry")
            .field("packages", &states)
            .field("path", &self.path)
            .field("fetch_requests", &self.fetch_requests)
            .finish()
    }
}

/// The first error is returned to the caller; later ones are logged.
fn first_error(errors: Vec<PackageError>) -> Result<(), PackageError> {
    let mut errors = errors.into_iter();
    let first = errors.next();
    for error in errors {
        tracing::warn!(%error, "additional error while loading packages");
    }
    first.map_or(Ok(()), Err)
}

fn redefinition(name: &PackageName) -> PackageError {
    PackageError::Redefinition {
        package: name.to_string(),
    }
}

fn unavailable(name: &PackageName, cause: &Arc<PackageError>) -> PackageError {
    PackageError::Unavailable {
        package: name.to_string(),
        cause: Arc::clone(cause),
    }
}
