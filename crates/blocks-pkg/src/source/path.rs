//! Packages living in a local directory.

use super::{load_manifest, unsupported, Source, SourceError};
use crate::config::Config;
use crate::dependency::{Dependency, DependencyKind, DependencySource};
use crate::registration::{Registration, SourceLocator};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Local directory source. The directory is used in place; nothing is
/// copied into the cache.
pub struct PathSource;

#[async_trait]
impl Source for PathSource {
    fn kind(&self) -> DependencyKind {
        DependencyKind::Path
    }

    async fn update(&self, _config: &Config) -> Result<(), SourceError> {
        Ok(())
    }

    async fn resolve(
        &self,
        _config: &Config,
        dependency: &Dependency,
    ) -> Result<Vec<Registration>, SourceError> {
        let DependencySource::Path { path, .. } = &dependency.source else {
            return Err(unsupported(dependency));
        };

        let manifest = load_manifest(&dependency.name, path).await?;
        let locator = SourceLocator::new(DependencyKind::Path, path.to_string_lossy(), None);
        debug!(package = %manifest.name, dir = %path.display(), "resolved path package");

        Ok(vec![Registration::from_manifest(&manifest, &locator)])
    }

    async fn fetch(
        &self,
        _config: &Config,
        registration: &Registration,
    ) -> Result<PathBuf, SourceError> {
        let dir = PathBuf::from(registration.locator()?.origin);

        if !tokio::fs::try_exists(&dir).await? {
            return Err(SourceError::NotFound {
                name: registration.name.clone(),
                location: dir.display().to_string(),
            });
        }
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_FILE;
    use crate::testing::write_manifest;
    use semver::Version;
    use tempfile::TempDir;

    #[tokio::test]
    async fn resolve_reads_manifest() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("utils");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MANIFEST_FILE),
            r#"
[package]
name = "utils"
version = "1.4.0"

[dependencies]
json = "^2.0.0"
sibling = { path = "../sibling" }
"#,
        )
        .unwrap();

        let config = Config::with_cache_dir(tmp.path().join("cache"));
        let registrations = PathSource
            .resolve(&config, &Dependency::path("utils", &dir))
            .await
            .unwrap();

        assert_eq!(registrations.len(), 1);
        let registration = &registrations[0];
        assert_eq!(registration.id, "utils@1.4.0");
        assert_eq!(registration.version, Version::new(1, 4, 0));
        assert_eq!(registration.source, format!("path+{}", dir.display()));
        assert_eq!(registration.dependencies.len(), 1);
        assert_eq!(registration.dependencies[0].name, "json");
    }

    #[tokio::test]
    async fn resolve_without_manifest_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_cache_dir(tmp.path().join("cache"));
        let err = PathSource
            .resolve(&config, &Dependency::path("ghost", tmp.path().join("ghost")))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound { ref name, .. } if name == "ghost"));
    }

    #[tokio::test]
    async fn fetch_returns_directory_in_place() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("utils");
        write_manifest(&dir, "utils", "1.0.0");
        let config = Config::with_cache_dir(tmp.path().join("cache"));

        let registration = PathSource
            .resolve(&config, &Dependency::path("utils", &dir))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(PathSource.fetch(&config, &registration).await.unwrap(), dir);
        assert!(!config.cache_dir().exists());

        std::fs::remove_dir_all(&dir).unwrap();
        let err = PathSource.fetch(&config, &registration).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn resolve_rejects_registry_dependency() {
        let config = Config::with_cache_dir("/cache");
        let err = PathSource
            .resolve(&config, &Dependency::registry("json", "^1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Unsupported(..)));
    }
}
