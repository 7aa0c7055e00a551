//! Dependency resolution and package acquisition for vba-blocks.
//!
//! This crate provides:
//! - Parsing and validation of `vba-block.toml` manifests and their
//!   dependency tables
//! - A typed dependency model with lock-entry satisfaction checks
//! - A common [`Source`] protocol implemented by the registry, local path,
//!   and git backends
//! - Registry index mirroring, checksum-verified package downloads, and
//!   atomic extraction into the shared cache

mod archive;
mod config;
mod dependency;
mod download;
mod git;
mod manifest;
mod registration;
mod source;

#[cfg(test)]
mod testing;

pub use archive::extract;
pub use config::{Config, RegistryConfig, CACHE_ENV, DEFAULT_PACKAGES_URL, DEFAULT_REGISTRY_REMOTE};
pub use dependency::{
    matches_version, normalize_path, parse_dependencies, parse_dependency, satisfies, Dependency,
    DependencyDetail, DependencyKind, DependencySource, DependencySpec, GitReference,
    VersionRange, DEFAULT_BRANCH, DEFAULT_REGISTRY,
};
pub use download::{checksum, checksum_file};
pub use manifest::{Manifest, ManifestError, Package, DEPENDENCY_EXAMPLE, MANIFEST_FILE};
pub use registration::{
    registration_id, Feature, InvalidLocator, Registration, RegistryDependency, SourceLocator,
};
pub use source::{
    index_path, parse_index, GitSource, Indicator, PathSource, RegistrySource, Source,
    SourceError, Sources, REGISTRY_ORIGIN,
};
