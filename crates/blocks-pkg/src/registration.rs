//! Concrete, fetchable package versions as seen through a source.

use crate::dependency::{DependencyKind, DependencySource};
use crate::manifest::Manifest;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// A source locator string that does not have the `<kind>+<origin>` shape.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid source locator '{0}', expected <kind>+<origin>[#<details>]")]
pub struct InvalidLocator(pub String);

/// One concrete version of a package, resolvable through a specific source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Unique `<name>@<version>` identifier.
    pub id: String,
    /// Source locator, see [`SourceLocator`].
    pub source: String,
    /// Package name.
    pub name: String,
    /// Exact package version.
    pub version: Version,
    /// Published dependency constraints.
    pub dependencies: Vec<RegistryDependency>,
    /// Published features.
    pub features: Vec<Feature>,
}

impl Registration {
    /// Parse this registration's source locator.
    ///
    /// # Errors
    ///
    /// Returns an error if the locator is malformed.
    pub fn locator(&self) -> Result<SourceLocator, InvalidLocator> {
        self.source.parse()
    }

    /// Build the single registration a path or git checkout offers, from the
    /// manifest found in it.
    ///
    /// Only registry dependencies can be published as constraints; nested
    /// path and git dependencies are skipped.
    #[must_use]
    pub fn from_manifest(manifest: &Manifest, locator: &SourceLocator) -> Self {
        let dependencies = manifest
            .dependencies
            .iter()
            .filter_map(|dependency| match &dependency.source {
                DependencySource::Registry { version, .. } => Some(RegistryDependency {
                    name: dependency.name.clone(),
                    version_req: version.clone(),
                    features: dependency.features.clone(),
                    optional: dependency.optional,
                    default_features: dependency.default_features,
                }),
                other => {
                    warn!(
                        package = %manifest.name,
                        dependency = %dependency.name,
                        "skipping nested {other} dependency"
                    );
                    None
                }
            })
            .collect();

        Self {
            id: registration_id(&manifest.name, &manifest.version),
            source: locator.to_string(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            dependencies,
            features: Vec::new(),
        }
    }
}

/// The `<name>@<version>` identifier of a registration.
#[must_use]
pub fn registration_id(name: &str, version: &Version) -> String {
    format!("{name}@{version}")
}

/// A published dependency constraint.
///
/// `version_req` is an unresolved range (`req` in the registry index),
/// never a concrete version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryDependency {
    /// Dependency name.
    pub name: String,
    /// Version range.
    #[serde(rename = "req")]
    pub version_req: String,
    /// Features to enable.
    #[serde(default)]
    pub features: Vec<String>,
    /// Whether the dependency is optional.
    #[serde(default)]
    pub optional: bool,
    /// Whether default features are enabled.
    #[serde(default = "default_true", rename = "defaultFeatures")]
    pub default_features: bool,
}

fn default_true() -> bool {
    true
}

/// A published feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    /// Feature name.
    pub name: String,
    /// Names of the dependencies the feature enables.
    pub dependencies: Vec<String>,
    /// Source files, filled in by build tooling.
    #[serde(default)]
    pub src: Vec<String>,
    /// References, filled in by build tooling.
    #[serde(default)]
    pub references: Vec<String>,
}

impl Feature {
    /// A feature enabling the given dependencies, with no sources yet.
    #[must_use]
    pub fn new(name: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            dependencies,
            src: Vec::new(),
            references: Vec::new(),
        }
    }
}

/// Parsed form of a registration's `<kind>+<origin>[#<details>]` source.
///
/// `details` holds the tarball checksum for registry registrations and the
/// commit for git registrations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    /// Backend kind (`registry`, `path`, `git`).
    pub kind: String,
    /// Origin URL or directory.
    pub origin: String,
    /// Integrity or revision details.
    pub details: Option<String>,
}

impl SourceLocator {
    /// Create a locator.
    #[must_use]
    pub fn new(kind: DependencyKind, origin: impl Into<String>, details: Option<String>) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            origin: origin.into(),
            details,
        }
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}+{}", self.kind, self.origin)?;
        if let Some(ref details) = self.details {
            write!(f, "#{details}")?;
        }
        Ok(())
    }
}

impl FromStr for SourceLocator {
    type Err = InvalidLocator;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, rest) = s.split_once('+').ok_or_else(|| InvalidLocator(s.to_string()))?;
        let (origin, details) = match rest.split_once('#') {
            Some((origin, details)) => (origin, Some(details.to_string())),
            None => (rest, None),
        };

        if kind.is_empty() || origin.is_empty() {
            return Err(InvalidLocator(s.to_string()));
        }

        Ok(Self {
            kind: kind.to_string(),
            origin: origin.to_string(),
            details,
        })
    }
}
