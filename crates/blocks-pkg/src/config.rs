//! Locations and transport settings consumed by every source operation.

use crate::registration::Registration;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the cache directory.
pub const CACHE_ENV: &str = "VBA_BLOCKS_CACHE";

/// Default registry index repository.
pub const DEFAULT_REGISTRY_REMOTE: &str = "https://github.com/vba-blocks/registry";

/// Default base URL for published package tarballs.
pub const DEFAULT_PACKAGES_URL: &str = "https://packages.vba-blocks.com";

/// Registry locations.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Local mirror of the registry index.
    pub local: PathBuf,
    /// Remote index repository URL.
    pub remote: String,
    /// Base URL packages are downloaded from.
    pub packages: String,
}

/// Configuration passed explicitly into every source operation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the package cache.
    pub cache_dir: PathBuf,
    /// Registry locations.
    pub registry: RegistryConfig,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Limit on establishing an HTTP connection.
    pub connect_timeout: Duration,
    /// Limit on a stalled HTTP read. Bounds idle time, not the whole
    /// transfer, so large tarballs on a healthy link are never cut off.
    pub read_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_cache_dir(default_cache_dir())
    }
}

impl Config {
    /// Configuration with every local location under `cache_dir`.
    #[must_use]
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            registry: RegistryConfig {
                local: cache_dir.join("registry").join("vba-blocks"),
                remote: DEFAULT_REGISTRY_REMOTE.to_string(),
                packages: DEFAULT_PACKAGES_URL.to_string(),
            },
            cache_dir,
            user_agent: format!("vba-blocks/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
        }
    }

    /// URL of a registration's published tarball.
    #[must_use]
    pub fn resolve_remote_package(&self, registration: &Registration) -> String {
        format!(
            "{}/{}/v{}.block",
            self.registry.packages.trim_end_matches('/'),
            registration.name,
            registration.version
        )
    }

    /// Cache path of a registration's verified tarball.
    #[must_use]
    pub fn resolve_local_package(&self, registration: &Registration) -> PathBuf {
        self.cache_dir
            .join("packages")
            .join(&registration.name)
            .join(format!("v{}.block", registration.version))
    }

    /// Directory a registration's files are materialized in.
    #[must_use]
    pub fn resolve_source(&self, registration: &Registration) -> PathBuf {
        self.cache_dir
            .join("sources")
            .join(&registration.name)
            .join(format!("v{}", registration.version))
    }

    /// Working checkout for a git dependency. Distinct URLs for the same
    /// name get distinct checkouts.
    #[must_use]
    pub fn resolve_git_checkout(&self, name: &str, url: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(url.as_bytes()));
        self.cache_dir
            .join("git")
            .join(format!("{name}-{}", &digest[..16]))
    }

    /// The cache root.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

/// Pick the cache directory: `VBA_BLOCKS_CACHE`, then the platform cache
/// location.
fn default_cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CACHE_ENV) {
        return PathBuf::from(dir);
    }
    platform_cache_dir().join("vba-blocks")
}

fn platform_cache_dir() -> PathBuf {
    if let Some(cache) = std::env::var_os("XDG_CACHE_HOME") {
        return PathBuf::from(cache);
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app_data) = std::env::var_os("LOCALAPPDATA") {
            return PathBuf::from(local_app_data);
        }
    }

    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        let home = PathBuf::from(home);
        if cfg!(target_os = "macos") {
            return home.join("Library").join("Caches");
        }
        return home.join(".cache");
    }

    PathBuf::from(".cache")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registration::registration_id;
    use semver::Version;

    fn registration(name: &str, version: &str) -> Registration {
        let version = Version::parse(version).unwrap();
        Registration {
            id: registration_id(name, &version),
            source: "registry+https://github.com/vba-blocks/registry#abc".to_string(),
            name: name.to_string(),
            version,
            dependencies: Vec::new(),
            features: Vec::new(),
        }
    }

    #[test]
    fn derived_locations() {
        let config = Config::with_cache_dir("/cache");
        let reg = registration("dictionary", "1.4.1");

        assert_eq!(config.registry.local, Path::new("/cache/registry/vba-blocks"));
        assert_eq!(
            config.resolve_remote_package(&reg),
            "https://packages.vba-blocks.com/dictionary/v1.4.1.block"
        );
        assert_eq!(
            config.resolve_local_package(&reg),
            Path::new("/cache/packages/dictionary/v1.4.1.block")
        );
        assert_eq!(
            config.resolve_source(&reg),
            Path::new("/cache/sources/dictionary/v1.4.1")
        );
    }

    #[test]
    fn packages_url_trailing_slash() {
        let mut config = Config::with_cache_dir("/cache");
        config.registry.packages = "file:///mirror/".to_string();
        assert_eq!(
            config.resolve_remote_package(&registration("a", "1.0.0")),
            "file:///mirror/a/v1.0.0.block"
        );
    }

    #[test]
    fn transport_timeouts_default() {
        let config = Config::with_cache_dir("/cache");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert!(config.user_agent.starts_with("vba-blocks/"));
    }

    #[test]
    fn git_checkouts_are_keyed_by_url() {
        let config = Config::with_cache_dir("/cache");
        let a = config.resolve_git_checkout("lib", "https://github.com/a/lib");
        let b = config.resolve_git_checkout("lib", "https://github.com/b/lib");
        assert_ne!(a, b);
        assert_eq!(a, config.resolve_git_checkout("lib", "https://github.com/a/lib"));
        assert!(a.starts_with("/cache/git"));
    }
}
