//! Packages hosted in git repositories.
//!
//! Resolving keeps a working clone per repository under the cache and
//! checks out the requested reference; the commit it lands on is pinned in
//! the registration's locator. Fetching materializes exactly that commit.

use super::{load_manifest, unsupported, Source, SourceError};
use crate::archive::staging_dir;
use crate::config::Config;
use crate::dependency::{Dependency, DependencyKind, DependencySource};
use crate::git;
use crate::manifest::validate_name;
use crate::registration::{InvalidLocator, Registration, SourceLocator};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Git repository source.
///
/// Resolves against the same repository must not run concurrently, since
/// they share one working clone.
pub struct GitSource;

/// Clone `remote` into `dir`, or fetch into it if already cloned.
async fn sync_checkout(remote: &str, dir: &Path) -> Result<(), SourceError> {
    if tokio::fs::try_exists(dir).await? {
        debug!(remote, dir = %dir.display(), "fetching git dependency");
        return git::fetch(dir).await;
    }

    let (parent, name) = match (dir.parent(), dir.file_name().and_then(|n| n.to_str())) {
        (Some(parent), Some(name)) => (parent, name),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid checkout location {}", dir.display()),
            )
            .into())
        }
    };

    tokio::fs::create_dir_all(parent).await?;
    info!(remote, "cloning git dependency");
    git::clone(remote, name, parent).await
}

#[async_trait]
impl Source for GitSource {
    fn kind(&self) -> DependencyKind {
        DependencyKind::Git
    }

    async fn update(&self, _config: &Config) -> Result<(), SourceError> {
        Ok(())
    }

    async fn resolve(
        &self,
        config: &Config,
        dependency: &Dependency,
    ) -> Result<Vec<Registration>, SourceError> {
        let DependencySource::Git { url, reference, .. } = &dependency.source else {
            return Err(unsupported(dependency));
        };
        validate_name(&dependency.name)?;

        let checkout = config.resolve_git_checkout(&dependency.name, url);
        sync_checkout(url, &checkout).await?;
        git::checkout(&checkout, &reference.checkout_target()).await?;

        let rev = git::head_revision(&checkout).await?;
        let manifest = load_manifest(&dependency.name, &checkout).await?;
        debug!(package = %manifest.name, %reference, %rev, "resolved git package");

        let locator = SourceLocator::new(DependencyKind::Git, url.as_str(), Some(rev));
        Ok(vec![Registration::from_manifest(&manifest, &locator)])
    }

    async fn fetch(
        &self,
        config: &Config,
        registration: &Registration,
    ) -> Result<PathBuf, SourceError> {
        validate_name(&registration.name)?;
        let dest = config.resolve_source(registration);
        if tokio::fs::try_exists(&dest).await? {
            debug!(package = %registration.id, "using cached checkout");
            return Ok(dest);
        }

        let locator = registration.locator()?;
        let rev = locator
            .details
            .as_deref()
            .ok_or_else(|| InvalidLocator(registration.source.clone()))?;

        let (_staging, staging_path) = staging_dir(&dest, ".git-")?;
        info!(package = %registration.id, rev, "checking out git package");
        git::clone(&locator.origin, ".", &staging_path).await?;
        git::checkout(&staging_path, rev).await?;
        tokio::fs::remove_dir_all(staging_path.join(".git")).await?;

        match tokio::fs::rename(&staging_path, &dest).await {
            Ok(()) => Ok(dest),
            Err(_) if dest.is_dir() => Ok(dest),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::GitReference;
    use crate::manifest::{ManifestError, MANIFEST_FILE};
    use crate::testing::{commit, git_available, init_repo, tag};
    use semver::Version;
    use tempfile::TempDir;

    fn manifest(version: &str) -> String {
        format!("[package]\nname = \"lib\"\nversion = \"{version}\"\n")
    }

    fn rev_of(dir: &Path) -> String {
        let out = std::process::Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(dir)
            .output()
            .unwrap();
        String::from_utf8(out.stdout).unwrap().trim().to_string()
    }

    struct Fixture {
        tmp: TempDir,
        repo: PathBuf,
        url: String,
        config: Config,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let manifest = manifest("1.0.0");
        let repo = init_repo(
            &tmp.path().join("lib"),
            &[(MANIFEST_FILE, manifest.as_str()), ("src/Lib.bas", "one")],
        );
        let url = repo.to_string_lossy().into_owned();
        let config = Config::with_cache_dir(tmp.path().join("cache"));
        Fixture {
            tmp,
            repo,
            url,
            config,
        }
    }

    async fn resolve_one(fixture: &Fixture, reference: GitReference) -> Registration {
        let dependency = Dependency::git("lib", fixture.url.as_str(), reference);
        GitSource
            .resolve(&fixture.config, &dependency)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn resolve_default_branch_pins_head() {
        if !git_available() {
            return;
        }
        let fixture = fixture();
        let registration = resolve_one(&fixture, GitReference::default()).await;

        assert_eq!(registration.id, "lib@1.0.0");
        assert_eq!(
            registration.source,
            format!("git+{}#{}", fixture.url, rev_of(&fixture.repo))
        );
    }

    #[tokio::test]
    async fn resolve_follows_new_commits_and_tags() {
        if !git_available() {
            return;
        }
        let fixture = fixture();
        tag(&fixture.repo, "v1.0.0");
        resolve_one(&fixture, GitReference::default()).await;

        let manifest = manifest("2.0.0");
        commit(&fixture.repo, &[(MANIFEST_FILE, manifest.as_str())]);

        let latest = resolve_one(&fixture, GitReference::default()).await;
        assert_eq!(latest.version, Version::new(2, 0, 0));

        let tagged = resolve_one(&fixture, GitReference::Tag("v1.0.0".to_string())).await;
        assert_eq!(tagged.version, Version::new(1, 0, 0));
    }

    #[tokio::test]
    async fn resolve_missing_manifest_is_not_found() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let repo = init_repo(&tmp.path().join("bare"), &[("README.md", "no manifest")]);
        let config = Config::with_cache_dir(tmp.path().join("cache"));
        let dependency = Dependency::git("bare", repo.to_string_lossy(), GitReference::default());

        let err = GitSource.resolve(&config, &dependency).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn fetch_materializes_pinned_commit() {
        if !git_available() {
            return;
        }
        let fixture = fixture();
        let registration = resolve_one(&fixture, GitReference::default()).await;
        commit(&fixture.repo, &[("src/Lib.bas", "two")]);

        let dir = GitSource
            .fetch(&fixture.config, &registration)
            .await
            .unwrap();
        assert_eq!(dir, fixture.config.resolve_source(&registration));
        assert_eq!(std::fs::read_to_string(dir.join("src/Lib.bas")).unwrap(), "one");
        assert!(!dir.join(".git").exists());

        let again = GitSource
            .fetch(&fixture.config, &registration)
            .await
            .unwrap();
        assert_eq!(again, dir);
        assert!(fixture.tmp.path().join("cache").is_dir());
    }

    #[tokio::test]
    async fn fetch_rejects_unsafe_names() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_cache_dir(tmp.path().join("cache"));
        let registration = Registration {
            id: "../../escape@1.0.0".to_string(),
            source: "git+https://example.com/lib#abc".to_string(),
            name: "../../escape".to_string(),
            version: Version::new(1, 0, 0),
            dependencies: Vec::new(),
            features: Vec::new(),
        };

        let err = GitSource.fetch(&config, &registration).await.unwrap_err();
        assert!(matches!(err, SourceError::Manifest(ManifestError::InvalidName(..))));
        assert!(!tmp.path().join("escape").exists());
    }

    #[tokio::test]
    async fn fetch_requires_pinned_revision() {
        let tmp = TempDir::new().unwrap();
        let config = Config::with_cache_dir(tmp.path());
        let registration = Registration {
            id: "lib@1.0.0".to_string(),
            source: "git+https://example.com/lib".to_string(),
            name: "lib".to_string(),
            version: Version::new(1, 0, 0),
            dependencies: Vec::new(),
            features: Vec::new(),
        };

        let err = GitSource.fetch(&config, &registration).await.unwrap_err();
        assert!(matches!(err, SourceError::InvalidSource(..)));
    }
}
