//! The acquisition protocol shared by every package source.
//!
//! A [`Source`] claims dependencies and registrations of its kind, refreshes
//! its view of available packages, lists candidate registrations, and
//! materializes a chosen registration on disk. [`Sources`] routes work to
//! whichever backend claims it.

mod git;
mod path;
mod registry;

pub use self::git::GitSource;
pub use self::path::PathSource;
pub use self::registry::{index_path, parse_index, RegistrySource, REGISTRY_ORIGIN};

use crate::config::Config;
use crate::dependency::{Dependency, DependencyKind};
use crate::manifest::{Manifest, ManifestError, MANIFEST_FILE};
use crate::registration::{InvalidLocator, Registration};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during source operations.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Package, version, or index entry absent from a source.
    #[error("'{name}' was not found in {location}")]
    NotFound { name: String, location: String },

    /// Downloaded content does not match the recorded checksum.
    #[error("checksum verification failed for '{package}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Network error during download.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed registry index record.
    #[error("invalid index record for '{package}': {reason}")]
    Json { package: String, reason: String },

    /// A git subprocess failed.
    #[error("{command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// Malformed source locator.
    #[error(transparent)]
    InvalidSource(#[from] InvalidLocator),

    /// No source handles this dependency or registration kind.
    #[error("no source handles '{0}'")]
    Unsupported(String),

    /// A package's manifest could not be loaded.
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

/// What a source is asked to claim: a raw kind name or a dependency.
#[derive(Debug, Clone, Copy)]
pub enum Indicator<'a> {
    /// Kind name as used in source locators (`registry`, `path`, `git`).
    Kind(&'a str),
    /// A parsed dependency.
    Dependency(&'a Dependency),
}

impl Indicator<'_> {
    /// Whether this indicator denotes `kind`.
    #[must_use]
    pub fn is(&self, kind: DependencyKind) -> bool {
        match self {
            Self::Kind(name) => *name == kind.as_str(),
            Self::Dependency(dependency) => dependency.kind() == kind,
        }
    }
}

impl<'a> From<&'a str> for Indicator<'a> {
    fn from(kind: &'a str) -> Self {
        Self::Kind(kind)
    }
}

impl<'a> From<&'a Dependency> for Indicator<'a> {
    fn from(dependency: &'a Dependency) -> Self {
        Self::Dependency(dependency)
    }
}

/// A package acquisition backend.
///
/// `update` against one local path must not run concurrently with itself;
/// `resolve` and `fetch` share no in-memory state and may run concurrently.
#[async_trait]
pub trait Source: Send + Sync {
    /// The dependency kind this source handles.
    fn kind(&self) -> DependencyKind;

    /// Whether this source owns the given kind name or dependency.
    fn matches(&self, indicator: Indicator<'_>) -> bool {
        indicator.is(self.kind())
    }

    /// Refresh this source's view of available packages.
    ///
    /// Idempotent; creates missing local structure on first use.
    async fn update(&self, config: &Config) -> Result<(), SourceError>;

    /// List every currently visible registration for `dependency`.
    async fn resolve(
        &self,
        config: &Config,
        dependency: &Dependency,
    ) -> Result<Vec<Registration>, SourceError>;

    /// Ensure the registration's files are on disk and return their
    /// directory. Repeated calls only check for existing content.
    async fn fetch(&self, config: &Config, registration: &Registration)
        -> Result<PathBuf, SourceError>;
}

/// The set of available sources, consulted in order.
pub struct Sources {
    sources: Vec<Box<dyn Source>>,
}

impl Sources {
    /// The registry, path, and git sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry's HTTP client cannot be created.
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        Ok(Self::with_sources(vec![
            Box::new(RegistrySource::new(config)?),
            Box::new(PathSource),
            Box::new(GitSource),
        ]))
    }

    /// A custom set of sources.
    #[must_use]
    pub fn with_sources(sources: Vec<Box<dyn Source>>) -> Self {
        Self { sources }
    }

    /// The first source claiming `indicator`.
    pub fn find<'a>(&self, indicator: impl Into<Indicator<'a>>) -> Option<&dyn Source> {
        let indicator = indicator.into();
        self.sources
            .iter()
            .find(|source| source.matches(indicator))
            .map(|source| source.as_ref())
    }

    /// Update every source, one at a time.
    ///
    /// # Errors
    ///
    /// Stops at the first source that fails.
    pub async fn update(&self, config: &Config) -> Result<(), SourceError> {
        for source in &self.sources {
            source.update(config).await?;
        }
        Ok(())
    }

    /// Resolve a dependency through the source that claims it.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unsupported`] if no source claims it, otherwise
    /// whatever the source reports.
    pub async fn resolve(
        &self,
        config: &Config,
        dependency: &Dependency,
    ) -> Result<Vec<Registration>, SourceError> {
        let source = self
            .find(dependency)
            .ok_or_else(|| SourceError::Unsupported(dependency.kind().to_string()))?;
        source.resolve(config, dependency).await
    }

    /// Fetch a registration through the source named in its locator.
    ///
    /// # Errors
    ///
    /// Returns an error if the locator is malformed, no source claims its
    /// kind, or the fetch fails.
    pub async fn fetch(
        &self,
        config: &Config,
        registration: &Registration,
    ) -> Result<PathBuf, SourceError> {
        let locator = registration.locator()?;
        let source = self
            .find(locator.kind.as_str())
            .ok_or_else(|| SourceError::Unsupported(locator.kind.clone()))?;
        source.fetch(config, registration).await
    }
}

/// Error for a dependency handed to a source of another kind.
fn unsupported(dependency: &Dependency) -> SourceError {
    SourceError::Unsupported(format!("{} ({})", dependency.name, dependency.kind()))
}

/// Load the manifest of a package checked out at `dir`.
async fn load_manifest(name: &str, dir: &Path) -> Result<Manifest, SourceError> {
    match Manifest::load(dir).await {
        Ok(manifest) => Ok(manifest),
        Err(ManifestError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
            Err(SourceError::NotFound {
                name: name.to_string(),
                location: dir.join(MANIFEST_FILE).display().to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}
