//! vba-blocks package manifest (`vba-block.toml`) parsing and validation.

use crate::dependency::{parse_dependencies, Dependency};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The manifest filename.
pub const MANIFEST_FILE: &str = "vba-block.toml";

/// Worked example of valid dependency syntax, embedded in dependency errors.
pub const DEPENDENCY_EXAMPLE: &str = r#"Example vba-block.toml:

  [dependencies]
  a = "^1.0.0"
  b = { version = "^0.1.0", optional = true }
  c = { path = "packages/c" }
  d = { git = "https://github.com/author/d" }
  e = { git = "https://github.com/author/e", branch = "next" }
  f = { git = "https://github.com/author/f", tag = "v1.0.0" }
  g = { git = "https://github.com/author/g", rev = "a1b2c3d4" }

  [dependencies.h]
  version = "^2.0.0"
  default-features = false
  features = ["a", "b"]"#;

/// Errors that can occur when working with manifests.
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid package name '{0}': {1}")]
    InvalidName(String, &'static str),

    #[error("invalid version '{0}': {1}")]
    InvalidVersion(String, String),

    /// A dependency entry that names no source, or one that cannot be read.
    #[error("invalid dependency \"{name}\", {reason}.\n\n{}", DEPENDENCY_EXAMPLE)]
    InvalidDependency { name: String, reason: String },

    #[error("invalid version requirement '{requirement}' for dependency '{name}': {reason}")]
    InvalidVersionReq {
        name: String,
        requirement: String,
        reason: String,
    },
}

/// On-disk shape of the manifest, before dependencies are typed.
#[derive(Debug, Deserialize)]
struct RawManifest {
    package: Option<Package>,

    #[serde(default)]
    dependencies: toml::Table,
}

/// Package metadata section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    /// Package name (required).
    pub name: String,

    /// Package version (required, semver).
    pub version: String,

    /// Package authors.
    #[serde(default)]
    pub authors: Vec<String>,

    /// Short description.
    #[serde(default)]
    pub description: Option<String>,

    /// SPDX license identifier.
    #[serde(default)]
    pub license: Option<String>,
}

/// A parsed and validated `vba-block.toml`.
#[derive(Debug, Clone)]
pub struct Manifest {
    /// Package name.
    pub name: String,

    /// Declared package version.
    pub version: Version,

    /// Package metadata as written.
    pub package: Package,

    /// Dependencies in declaration order.
    pub dependencies: Vec<Dependency>,

    /// Directory containing the manifest; relative paths resolve against it.
    pub dir: PathBuf,
}

impl Manifest {
    /// Load the manifest found in a package directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let dir = dir.as_ref();
        let content = tokio::fs::read_to_string(dir.join(MANIFEST_FILE)).await?;
        Self::parse(&content, dir)
    }

    /// Load a manifest from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&content, dir)
    }

    /// Parse a manifest from a TOML string.
    ///
    /// `dir` is the directory the manifest lives in.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, required fields are missing,
    /// or any dependency entry is invalid.
    pub fn parse(content: &str, dir: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(content)?;
        let package = raw.package.ok_or(ManifestError::MissingField("package"))?;

        validate_name(&package.name)?;
        let version = Version::parse(&package.version)
            .map_err(|e| ManifestError::InvalidVersion(package.version.clone(), e.to_string()))?;

        let dir = dir.as_ref().to_path_buf();
        let dependencies = parse_dependencies(&raw.dependencies, &dir)?;

        Ok(Self {
            name: package.name.clone(),
            version,
            package,
            dependencies,
            dir,
        })
    }
}

/// Validate a package name. Names become index and cache path segments,
/// so only letters, digits, `-` and `_` are allowed.
pub(crate) fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.is_empty() {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot be empty",
        ));
    }

    if name.len() > 64 {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name cannot exceed 64 characters",
        ));
    }

    if !name.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name must start with a letter",
        ));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ManifestError::InvalidName(
            name.to_string(),
            "name can only contain letters, numbers, hyphens, and underscores",
        ));
    }

    Ok(())
}
