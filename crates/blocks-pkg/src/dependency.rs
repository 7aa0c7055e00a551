//! Typed dependency declarations and the manifest/lock satisfaction check.
//!
//! Raw `[dependencies]` entries are validated once, here, into the closed
//! [`DependencySource`] union. Nothing downstream inspects raw TOML again.

use crate::manifest::{validate_name, Manifest, ManifestError};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Registry used when a registry dependency does not name one.
pub const DEFAULT_REGISTRY: &str = "vba-blocks";

/// Branch used when a git dependency pins no rev, tag, or branch.
pub const DEFAULT_BRANCH: &str = "master";

/// Raw dependency entry as written in a manifest.
///
/// Can be either a simple version string or a detailed specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    /// Simple version string: `"^1.0.0"`.
    Simple(String),

    /// Detailed dependency specification.
    Detailed(DependencyDetail),
}

/// Detailed dependency entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyDetail {
    /// Registry name.
    #[serde(default)]
    pub registry: Option<String>,

    /// Version requirement.
    #[serde(default)]
    pub version: Option<String>,

    /// Path to local dependency.
    #[serde(default)]
    pub path: Option<String>,

    /// Git repository URL.
    #[serde(default)]
    pub git: Option<String>,

    /// Git branch name.
    #[serde(default)]
    pub branch: Option<String>,

    /// Git tag name.
    #[serde(default)]
    pub tag: Option<String>,

    /// Git commit revision.
    #[serde(default)]
    pub rev: Option<String>,

    /// Features to enable.
    #[serde(default)]
    pub features: Vec<String>,

    /// Whether default features are enabled.
    #[serde(default = "default_true", rename = "default-features")]
    pub default_features: bool,

    /// Whether this dependency is optional.
    #[serde(default)]
    pub optional: bool,
}

fn default_true() -> bool {
    true
}

impl From<DependencySpec> for DependencyDetail {
    fn from(spec: DependencySpec) -> Self {
        match spec {
            DependencySpec::Simple(version) => Self {
                registry: None,
                version: Some(version),
                path: None,
                git: None,
                branch: None,
                tag: None,
                rev: None,
                features: Vec::new(),
                default_features: true,
                optional: false,
            },
            DependencySpec::Detailed(detail) => detail,
        }
    }
}

/// The kind of location a dependency is acquired from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Registry,
    Path,
    Git,
}

impl DependencyKind {
    /// Returns the kind as it appears in source locators.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Path => "path",
            Self::Git => "git",
        }
    }

    /// Look up a kind by its locator name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "registry" => Some(Self::Registry),
            "path" => Some(Self::Path),
            "git" => Some(Self::Git),
            _ => None,
        }
    }
}

impl std::fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A git reference (revision, tag, or branch).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GitReference {
    /// A specific commit revision.
    Rev(String),
    /// A tag name.
    Tag(String),
    /// A branch name.
    Branch(String),
}

impl GitReference {
    /// The argument `git checkout` needs to land on this reference in a
    /// clone of the remote.
    #[must_use]
    pub fn checkout_target(&self) -> String {
        match self {
            Self::Rev(rev) => rev.clone(),
            Self::Tag(tag) => format!("tags/{tag}"),
            Self::Branch(branch) => format!("origin/{branch}"),
        }
    }
}

impl Default for GitReference {
    fn default() -> Self {
        Self::Branch(DEFAULT_BRANCH.to_string())
    }
}

impl std::fmt::Display for GitReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rev(r) => write!(f, "rev:{r}"),
            Self::Tag(t) => write!(f, "tag:{t}"),
            Self::Branch(b) => write!(f, "branch:{b}"),
        }
    }
}

/// Where a dependency comes from.
///
/// Exactly one location is carried. `version` on the path and git variants
/// is only set for locked dependencies, where it records the version that
/// was resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencySource {
    /// Package from a registry. `version` is a range for manifest entries
    /// and an exact version for locked entries.
    Registry { registry: String, version: String },
    /// Local path dependency, absolute and normalized.
    Path {
        path: PathBuf,
        version: Option<String>,
    },
    /// Git repository dependency.
    Git {
        url: String,
        reference: GitReference,
        version: Option<String>,
    },
}

impl std::fmt::Display for DependencySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry { registry, version } => write!(f, "{registry} ({version})"),
            Self::Path { path, .. } => write!(f, "path:{}", path.display()),
            Self::Git { url, reference, .. } => write!(f, "git:{url}#{reference}"),
        }
    }
}

/// A typed dependency declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// The package name.
    pub name: String,
    /// The location of the dependency.
    pub source: DependencySource,
    /// Features to enable.
    pub features: Vec<String>,
    /// Whether default features are enabled.
    pub default_features: bool,
    /// Whether this is an optional dependency.
    pub optional: bool,
}

impl Dependency {
    fn with_source(name: impl Into<String>, source: DependencySource) -> Self {
        Self {
            name: name.into(),
            source,
            features: Vec::new(),
            default_features: true,
            optional: false,
        }
    }

    /// A dependency on the default registry.
    #[must_use]
    pub fn registry(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::with_source(
            name,
            DependencySource::Registry {
                registry: DEFAULT_REGISTRY.to_string(),
                version: version.into(),
            },
        )
    }

    /// A dependency on a local directory. The path is normalized but not
    /// made absolute.
    #[must_use]
    pub fn path(name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::with_source(
            name,
            DependencySource::Path {
                path: normalize_path(path.as_ref()),
                version: None,
            },
        )
    }

    /// A dependency on a git repository.
    #[must_use]
    pub fn git(name: impl Into<String>, url: impl Into<String>, reference: GitReference) -> Self {
        Self::with_source(
            name,
            DependencySource::Git {
                url: url.into(),
                reference,
                version: None,
            },
        )
    }

    /// The lock-entry form of this dependency, recording the exact version
    /// that was resolved for it.
    #[must_use]
    pub fn locked(mut self, resolved: &Version) -> Self {
        let resolved = resolved.to_string();
        match &mut self.source {
            DependencySource::Registry { version, .. } => *version = resolved,
            DependencySource::Path { version, .. } | DependencySource::Git { version, .. } => {
                *version = Some(resolved);
            }
        }
        self
    }

    /// Returns the kind of this dependency.
    #[must_use]
    pub fn kind(&self) -> DependencyKind {
        match self.source {
            DependencySource::Registry { .. } => DependencyKind::Registry,
            DependencySource::Path { .. } => DependencyKind::Path,
            DependencySource::Git { .. } => DependencyKind::Git,
        }
    }

    /// Returns the version (range or exact) if one is recorded.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match &self.source {
            DependencySource::Registry { version, .. } => Some(version),
            DependencySource::Path { version, .. } | DependencySource::Git { version, .. } => {
                version.as_deref()
            }
        }
    }
}

/// Parse a `[dependencies]` table, preserving declaration order.
///
/// # Errors
///
/// Returns the first invalid entry's error.
pub fn parse_dependencies(table: &toml::Table, dir: &Path) -> Result<Vec<Dependency>, ManifestError> {
    table
        .iter()
        .map(|(name, value)| parse_dependency(name, value, dir))
        .collect()
}

/// Parse a single dependency entry declared in the manifest found in `dir`.
///
/// Precedence when several locations are given: `version` over `path` over
/// `git`; within git, `rev` over `tag` over `branch`.
///
/// # Errors
///
/// Returns [`ManifestError::InvalidName`] for a name that is not a valid
/// package name, [`ManifestError::InvalidDependency`] when the entry names none of
/// `version`, `path`, or `git`, or cannot be read at all, and
/// [`ManifestError::InvalidVersionReq`] for an unparseable version range.
pub fn parse_dependency(
    name: &str,
    value: &toml::Value,
    dir: &Path,
) -> Result<Dependency, ManifestError> {
    validate_name(name)?;

    let spec: DependencySpec =
        value
            .clone()
            .try_into::<DependencySpec>()
            .map_err(|e| ManifestError::InvalidDependency {
                name: name.to_string(),
                reason: e.message().trim().to_string(),
            })?;
    let detail = DependencyDetail::from(spec);

    let version = non_empty(detail.version);
    let path = non_empty(detail.path);
    let git = non_empty(detail.git);

    let source = if let Some(version) = version {
        VersionRange::parse(&version).map_err(|e| ManifestError::InvalidVersionReq {
            name: name.to_string(),
            requirement: version.clone(),
            reason: e.to_string(),
        })?;
        DependencySource::Registry {
            registry: non_empty(detail.registry).unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
            version,
        }
    } else if let Some(path) = path {
        DependencySource::Path {
            path: normalize_path(&absolute_path(dir)?.join(path)),
            version: None,
        }
    } else if let Some(url) = git {
        let reference = if let Some(rev) = non_empty(detail.rev) {
            GitReference::Rev(rev)
        } else if let Some(tag) = non_empty(detail.tag) {
            GitReference::Tag(tag)
        } else {
            non_empty(detail.branch).map_or_else(GitReference::default, GitReference::Branch)
        };
        DependencySource::Git {
            url,
            reference,
            version: None,
        }
    } else {
        return Err(ManifestError::InvalidDependency {
            name: name.to_string(),
            reason: "no version, path, or git specified".to_string(),
        });
    };

    Ok(Dependency {
        name: name.to_string(),
        source,
        features: detail.features,
        default_features: detail.default_features,
        optional: detail.optional,
    })
}

/// Empty strings count as absent, like a missing key.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn absolute_path(dir: &Path) -> Result<PathBuf, ManifestError> {
    if dir.is_absolute() {
        Ok(dir.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(dir))
    }
}

/// Lexically normalize a path: drop `.` components, fold `..` into their
/// parent, and drop any trailing separator.
///
/// Comparison of the result is component-wise, so `/a/b` never matches
/// `/a/bc`.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// A version range as written in manifests and registry indexes.
///
/// Ranges use the npm dialect: `||` separates alternatives, whitespace
/// separates comparators that must all hold, `a - b` is an inclusive span,
/// and a bare version is an exact pin (`1.0.0` matches only `1.0.0`, `1.2`
/// matches any `1.2.x`). `^`, `~` and wildcards read as usual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    /// Parse a range.
    ///
    /// # Errors
    ///
    /// Returns the first alternative that is not a valid range.
    pub fn parse(range: &str) -> Result<Self, semver::Error> {
        let alternatives = range
            .split("||")
            .map(|alternative| VersionReq::parse(&join_comparators(alternative)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { alternatives })
    }

    /// Whether `version` falls in any alternative.
    #[must_use]
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Rewrite one whitespace-separated alternative as comma-separated
/// comparators.
fn join_comparators(alternative: &str) -> String {
    let tokens: Vec<&str> = alternative.split_whitespace().collect();

    if let [low, "-", high] = tokens.as_slice() {
        return format!(">={}, <={}", strip_v(low), strip_v(high));
    }

    let mut comparators = Vec::new();
    let mut operator: Option<&str> = None;
    for token in tokens {
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            operator = Some(token);
            continue;
        }
        comparators.push(match operator.take() {
            Some(op) => format!("{op}{}", strip_v(token)),
            None => pin(token),
        });
    }
    // A dangling operator is left in so parsing reports it.
    comparators.extend(operator.map(str::to_string));

    if comparators.is_empty() {
        "*".to_string()
    } else {
        comparators.join(", ")
    }
}

/// A bare version pins exactly; anything with an operator or wildcard is
/// kept as written.
fn pin(comparator: &str) -> String {
    let comparator = strip_v(comparator);
    let bare = comparator.starts_with(|c: char| c.is_ascii_digit());
    let wildcard = comparator
        .split(['.', '-', '+'])
        .any(|part| matches!(part, "x" | "X" | "*"));

    if bare && !wildcard {
        format!("={comparator}")
    } else {
        comparator.to_string()
    }
}

fn strip_v(version: &str) -> &str {
    match version.strip_prefix('v') {
        Some(rest) if rest.starts_with(|c: char| c.is_ascii_digit()) => rest,
        _ => version,
    }
}

/// Check an exact version against a range.
///
/// Unparseable inputs never match.
#[must_use]
pub fn matches_version(version: &str, requirement: &str) -> bool {
    match (Version::parse(version), VersionRange::parse(requirement)) {
        (Ok(version), Ok(requirement)) => requirement.matches(&version),
        _ => {
            debug!(version, requirement, "unparseable version or requirement");
            false
        }
    }
}

/// Decide whether a locked dependency still honours the manifest.
///
/// Order matters: `value` is the dependency declared in the manifest and
/// `comparison` is the more specific, previously locked dependency.
///
/// # Errors
///
/// Returns an error when a path dependency's manifest cannot be read.
pub async fn satisfies(value: &Dependency, comparison: &Dependency) -> Result<bool, ManifestError> {
    match (&value.source, &comparison.source) {
        (
            DependencySource::Registry { version: range, .. },
            DependencySource::Registry { version, .. },
        ) => Ok(matches_version(version, range)),
        (
            DependencySource::Path { path: declared, .. },
            DependencySource::Path {
                path: locked,
                version,
            },
        ) => {
            if declared != locked {
                return Ok(false);
            }
            let Some(version) = version else {
                return Ok(false);
            };

            let manifest = Manifest::load(declared).await?;
            Ok(Version::parse(version).is_ok_and(|v| v == manifest.version))
        }
        (
            DependencySource::Git {
                reference: declared,
                ..
            },
            DependencySource::Git {
                reference: locked, ..
            },
        ) => Ok(match (declared, locked) {
            (GitReference::Rev(a), GitReference::Rev(b))
            | (GitReference::Tag(a), GitReference::Tag(b))
            | (GitReference::Branch(a), GitReference::Branch(b)) => a == b,
            _ => false,
        }),
        _ => Ok(false),
    }
}
