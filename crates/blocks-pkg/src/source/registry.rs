//! The vba-blocks registry: a git-mirrored, sharded package index plus
//! checksum-verified tarball downloads.

use super::{unsupported, Source, SourceError};
use crate::config::Config;
use crate::dependency::{Dependency, DependencyKind, DependencySource};
use crate::manifest::validate_name;
use crate::registration::{
    registration_id, Feature, InvalidLocator, Registration, RegistryDependency, SourceLocator,
};
use crate::{archive, download, git};
use async_trait::async_trait;
use semver::Version;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Origin recorded in the locator of every registry registration.
pub const REGISTRY_ORIGIN: &str = "https://github.com/vba-blocks/registry";

/// One line of a package's index file.
#[derive(Debug, Deserialize)]
struct IndexRecord {
    name: String,
    vers: Version,
    cksum: String,
    #[serde(default)]
    yanked: bool,
    #[serde(default)]
    deps: Vec<RegistryDependency>,
    #[serde(default)]
    features: BTreeMap<String, Vec<String>>,
}

impl From<IndexRecord> for Registration {
    fn from(record: IndexRecord) -> Self {
        let locator = SourceLocator::new(
            DependencyKind::Registry,
            REGISTRY_ORIGIN,
            Some(record.cksum),
        );
        Self {
            id: registration_id(&record.name, &record.vers),
            source: locator.to_string(),
            name: record.name,
            version: record.vers,
            dependencies: record.deps,
            features: record
                .features
                .into_iter()
                .map(|(name, dependencies)| Feature::new(name, dependencies))
                .collect(),
        }
    }
}

/// Path of a package's index file under the index root.
///
/// Sharded on the name so no directory grows unbounded:
/// `1/<name>`, `2/<name>`, `3/<first char>/<name>`, and
/// `<chars 1-2>/<chars 3-4>/<name>` for longer names.
///
/// `name` must already be a valid package name; it is joined as is.
#[must_use]
pub fn index_path(root: &Path, name: &str) -> PathBuf {
    let chars: Vec<char> = name.chars().collect();
    let prefix = |range: std::ops::Range<usize>| chars[range].iter().collect::<String>();

    let shard = match chars.len() {
        0 | 1 => root.join("1"),
        2 => root.join("2"),
        3 => root.join("3").join(prefix(0..1)),
        _ => root.join(prefix(0..2)).join(prefix(2..4)),
    };
    shard.join(name)
}

/// Parse a package's newline-delimited index file.
///
/// Yanked versions are dropped and blank lines ignored; any malformed line,
/// or a record for a package other than `package`, fails the whole parse.
///
/// # Errors
///
/// Returns [`SourceError::Json`] for the first malformed or foreign line.
pub fn parse_index(package: &str, data: &str) -> Result<Vec<Registration>, SourceError> {
    let mut registrations = Vec::new();
    for (number, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let record: IndexRecord =
            serde_json::from_str(line).map_err(|e| SourceError::Json {
                package: package.to_string(),
                reason: format!("line {}: {e}", number + 1),
            })?;

        if record.name != package {
            return Err(SourceError::Json {
                package: package.to_string(),
                reason: format!("line {}: record is for '{}'", number + 1, record.name),
            });
        }

        if record.yanked {
            debug!(package, version = %record.vers, "skipping yanked version");
            continue;
        }
        registrations.push(Registration::from(record));
    }
    Ok(registrations)
}

/// Registry-backed source.
pub struct RegistrySource {
    client: reqwest::Client,
}

impl RegistrySource {
    /// Create a registry source whose HTTP client uses the configured user
    /// agent and connect/read timeouts.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: &Config) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        Ok(Self { client })
    }

    /// Download a registration's tarball and move it to `file` only if its
    /// checksum matches `expected`.
    async fn download_verified(
        &self,
        url: &str,
        file: &Path,
        registration: &Registration,
        expected: &str,
    ) -> Result<(), SourceError> {
        let dir = parent_dir(file)?;
        tokio::fs::create_dir_all(dir).await?;

        let unverified = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(dir)?;
        let mut out = tokio::fs::File::from_std(unverified.reopen()?);

        info!(package = %registration.id, url, "downloading package");
        download::download_to(&self.client, url, &mut out).await?;
        drop(out);

        let actual = download::checksum_file(unverified.path()).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            warn!(package = %registration.id, expected, %actual, "checksum mismatch");
            return Err(SourceError::ChecksumMismatch {
                package: registration.id.clone(),
                expected: expected.to_string(),
                actual,
            });
        }

        unverified.persist(file).map_err(|e| e.error)?;
        Ok(())
    }
}

fn parent_dir(path: &Path) -> io::Result<&Path> {
    path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} has no parent directory", path.display()),
        )
    })
}

#[async_trait]
impl Source for RegistrySource {
    fn kind(&self) -> DependencyKind {
        DependencyKind::Registry
    }

    async fn update(&self, config: &Config) -> Result<(), SourceError> {
        let local = &config.registry.local;

        if tokio::fs::try_exists(local).await? {
            info!(index = %local.display(), "updating registry index");
            return git::pull(local).await;
        }

        let dir = parent_dir(local)?;
        let name = local.file_name().and_then(|n| n.to_str()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid registry index location {}", local.display()),
            )
        })?;

        tokio::fs::create_dir_all(dir).await?;
        info!(remote = %config.registry.remote, "cloning registry index");
        git::clone(&config.registry.remote, name, dir).await
    }

    async fn resolve(
        &self,
        config: &Config,
        dependency: &Dependency,
    ) -> Result<Vec<Registration>, SourceError> {
        let DependencySource::Registry { .. } = dependency.source else {
            return Err(unsupported(dependency));
        };
        let name = &dependency.name;
        let path = index_path(&config.registry.local, name);

        if validate_name(name).is_err() || !tokio::fs::try_exists(&path).await? {
            return Err(SourceError::NotFound {
                name: name.clone(),
                location: "the registry".to_string(),
            });
        }

        let data = tokio::fs::read_to_string(&path).await?;
        let registrations = parse_index(name, &data)?;
        debug!(package = %name, count = registrations.len(), "resolved registry package");

        Ok(registrations)
    }

    async fn fetch(
        &self,
        config: &Config,
        registration: &Registration,
    ) -> Result<PathBuf, SourceError> {
        validate_name(&registration.name)?;
        let url = config.resolve_remote_package(registration);
        let file = config.resolve_local_package(registration);

        let locator = registration.locator()?;
        let checksum = locator
            .details
            .as_deref()
            .ok_or_else(|| InvalidLocator(registration.source.clone()))?;

        if tokio::fs::try_exists(&file).await? {
            debug!(package = %registration.id, "using cached package");
        } else {
            self.download_verified(&url, &file, registration, checksum)
                .await?;
        }

        let src = config.resolve_source(registration);
        if !tokio::fs::try_exists(&src).await? {
            archive::extract(&file, &src).await?;
        }

        Ok(src)
    }
}
