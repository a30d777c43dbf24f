//! Error types for the package registry and loader.

use std::sync::Arc;
use std::time::Duration;

/// Package loading errors.
#[derive(Debug, thiserror::Error)]
pub enum PackageError {
    /// Package names are dot-segmented and every segment must be non-empty.
    #[error("invalid package name '{name}'")]
    InvalidName { name: String },

    /// The package was already declared (or already loaded).
    #[error("cannot redefine package '{package}'; package already exists")]
    Redefinition { package: String },

    /// A namespace slot along the package path is already taken.
    #[error("cannot publish package '{package}'; namespace '{path}' is already occupied")]
    NamingCollision { package: String, path: String },

    /// The package body returned an error.
    #[error("package '{package}' failed while running its body")]
    Body {
        package: String,
        #[source]
        source: anyhow::Error,
    },

    /// A callback registered with `require` returned an error.
    #[error("require callback for package '{package}' failed")]
    Callback {
        package: String,
        #[source]
        source: anyhow::Error,
    },

    /// The fetcher could not retrieve the package.
    #[error("failed to fetch package '{package}' from '{location}'")]
    Fetch {
        package: String,
        location: String,
        #[source]
        source: anyhow::Error,
    },

    /// The fetcher did not answer in time.
    #[error("timed out after {timeout:?} fetching package '{package}' from '{location}'")]
    FetchTimeout {
        package: String,
        location: String,
        timeout: Duration,
    },

    /// The fetched declaration announced a different package.
    #[error("requested package '{requested}' but the fetched source declares '{declared}'")]
    NameMismatch { requested: String, declared: String },

    /// The package, or one of its prerequisites, failed to load.
    #[error("package '{package}' is unavailable")]
    Unavailable {
        package: String,
        #[source]
        cause: Arc<PackageError>,
    },

    /// Declaring the package would close a prerequisite cycle.
    #[error("circular dependency detected declaring '{package}', involving '{involving}'")]
    Cycle { package: String, involving: String },

    /// The registry went away before the package was loaded.
    #[error("package '{package}' was abandoned before it loaded")]
    Abandoned { package: String },
}

impl PackageError {
    /// The package this error is attributed to, where there is one.
    pub fn package(&self) -> Option<&str> {
        match self {
            Self::InvalidName { .. } => None,
            Self::Redefinition { package }
            | Self::NamingCollision { package, .. }
            | Self::Body { package, .. }
            | Self::Callback { package, .. }
            | Self::Fetch { package, .. }
            | Self::FetchTimeout { package, .. }
            | Self::Unavailable { package, .. }
            | Self::Cycle { package, .. }
            | Self::Abandoned { package } => Some(package),
            Self::NameMismatch { requested, .. } => Some(requested),
        }
    }

    /// Follows `Unavailable` wrappers down to the failure that started it.
    pub fn root_cause(&self) -> &PackageError {
        match self {
            Self::Unavailable { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
