//! Environment configuration documents.
//!
//! [`RawConfig`] is one source's `devbox.yaml` as written; [`MergedConfig`] is
//! the runtime shape left after the fold (no `registry`, no `extends`). The
//! [`SourceLoader`] locates and parses the document belonging to a resolved
//! reference, fetching remote trees through a [`SourceFetcher`].

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use nixbox_common::constants::CONFIG_FILE_NAMES;
use nixbox_common::error::{NixboxError, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::reference::{Reference, ReferenceKind};

/// `security` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityConfig {
    /// Mount the container root filesystem read-only.
    pub read_only: bool,
    /// Forbid privilege escalation inside the container.
    pub no_new_privileges: bool,
    /// Capabilities to drop.
    pub cap_drop: Vec<String>,
    /// Capabilities to add.
    pub cap_add: Vec<String>,
}

/// `resources` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceConfig {
    /// Memory limit (`512m`, `2g`).
    #[serde(deserialize_with = "string_or_number")]
    pub memory: Option<String>,
    /// CPU limit. Integers keep their digits; floats always carry a fractional
    /// part (`1.0` stays `1.0`).
    #[serde(deserialize_with = "string_or_number")]
    pub cpus: Option<String>,
    /// Maximum number of processes.
    pub pids_limit: Option<i64>,
}

/// `logging` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log driver name.
    pub driver: Option<String>,
    /// Driver options.
    pub options: BTreeMap<String, String>,
}

/// `init` block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InitConfig {
    /// Directories created in the image so bind mounts have a target.
    pub ensure_dirs: Vec<String>,
}

/// One source's configuration document, as loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    /// Security options.
    pub security: SecurityConfig,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Logging options.
    pub logging: LoggingConfig,
    /// `host:container` port mappings.
    pub ports: Vec<String>,
    /// `host:container[:opts]` bind mounts.
    pub volumes: Vec<String>,
    /// `path[:opts]` tmpfs mounts.
    pub tmpfs: Vec<String>,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Raw runtime flags, appended last.
    pub extra_args: Vec<String>,
    /// User to run as inside the container.
    pub user: Option<String>,
    /// Image initialization.
    pub init: InitConfig,
    /// Alias overlays for the registry table.
    pub registry: BTreeMap<String, String>,
    /// References this source inherits from.
    pub extends: Vec<String>,
}

/// The folded runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedConfig {
    /// Security options.
    pub security: SecurityConfig,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// Logging options.
    pub logging: LoggingConfig,
    /// `host:container` port mappings.
    pub ports: Vec<String>,
    /// `host:container[:opts]` bind mounts.
    pub volumes: Vec<String>,
    /// `path[:opts]` tmpfs mounts.
    pub tmpfs: Vec<String>,
    /// `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Raw runtime flags, appended last.
    pub extra_args: Vec<String>,
    /// User to run as inside the container.
    pub user: Option<String>,
    /// Image initialization.
    pub init: InitConfig,
}

impl From<MergedConfig> for RawConfig {
    fn from(merged: MergedConfig) -> Self {
        Self {
            security: merged.security,
            resources: merged.resources,
            logging: merged.logging,
            ports: merged.ports,
            volumes: merged.volumes,
            tmpfs: merged.tmpfs,
            env: merged.env,
            extra_args: merged.extra_args,
            user: merged.user,
            init: merged.init,
            registry: BTreeMap::new(),
            extends: Vec::new(),
        }
    }
}

impl RawConfig {
    /// Parses a YAML document. An empty or null document is an empty config.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::ConfigParse` with the parse location if the
    /// document is malformed or carries unknown keys.
    pub fn from_yaml(content: &str, source_ref: &str, path: &Path) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed: Option<Self> = serde_yaml::from_str(content).map_err(|e| {
            let location = e.location();
            NixboxError::ConfigParse {
                source_ref: source_ref.to_string(),
                path: path.to_path_buf(),
                line: location.as_ref().map(serde_yaml::Location::line),
                column: location.as_ref().map(serde_yaml::Location::column),
                message: e.to_string(),
            }
        })?;
        Ok(parsed.unwrap_or_default())
    }
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|value| match value {
        Scalar::Text(s) => s,
        Scalar::Int(i) => i.to_string(),
        Scalar::Float(f) => format!("{f:?}"),
    }))
}

/// Retrieves the source tree of a remote reference.
///
/// Implementations must be safe to call from several threads at once; the
/// resolver fetches independent sources concurrently.
pub trait SourceFetcher: Send + Sync {
    /// Fetches the tree and returns the local directory it was unpacked to
    /// (before applying the reference's subdirectory).
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::FetchFailure` if the source cannot be retrieved.
    fn fetch(&self, reference: &Reference) -> Result<PathBuf>;
}

/// Fetcher for invocations that must not touch the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFetcher;

impl SourceFetcher for OfflineFetcher {
    fn fetch(&self, reference: &Reference) -> Result<PathBuf> {
        Err(NixboxError::FetchFailure {
            reference: reference.raw().to_string(),
            message: "remote sources are unavailable offline".into(),
        })
    }
}

/// A reference paired with the document loaded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    /// The resolved reference.
    pub reference: Reference,
    /// Directory the document was looked up in; base for relative references
    /// inside the document.
    pub root: PathBuf,
    /// Document path, if one was found.
    pub document: Option<PathBuf>,
    /// Parsed document (empty when absent).
    pub config: RawConfig,
}

/// Loads configuration documents for resolved references.
pub struct SourceLoader<'a> {
    fetcher: &'a dyn SourceFetcher,
}

impl fmt::Debug for SourceLoader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceLoader").finish_non_exhaustive()
    }
}

impl<'a> SourceLoader<'a> {
    /// Creates a loader that fetches remote trees through `fetcher`.
    #[must_use]
    pub const fn new(fetcher: &'a dyn SourceFetcher) -> Self {
        Self { fetcher }
    }

    /// Loads the document belonging to `reference`.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::InvalidReference` for unresolved aliases,
    /// `NixboxError::FetchFailure` if a remote tree cannot be fetched, and
    /// `NixboxError::ConfigParse` if a present document is malformed.
    pub fn load(&self, reference: &Reference) -> Result<LoadedSource> {
        let root = match reference.kind() {
            ReferenceKind::Local => {
                let path = PathBuf::from(reference.location());
                if path.is_file() {
                    path.parent().map_or(path.clone(), Path::to_path_buf)
                } else {
                    path
                }
            }
            ReferenceKind::Remote => {
                let fetched = self.fetcher.fetch(reference)?;
                tracing::debug!(reference = %reference, path = %fetched.display(), "fetched remote source");
                match reference.subdir() {
                    Some(sub) => fetched.join(sub),
                    None => fetched,
                }
            }
            ReferenceKind::Alias => {
                return Err(NixboxError::InvalidReference {
                    raw: reference.raw().to_string(),
                    reason: "alias must be resolved before loading".into(),
                });
            }
        };

        let Some(document) = find_document(&root) else {
            tracing::debug!(reference = %reference, root = %root.display(), "no configuration document");
            return Ok(LoadedSource {
                reference: reference.clone(),
                root,
                document: None,
                config: RawConfig::default(),
            });
        };

        let content = std::fs::read_to_string(&document).map_err(|e| NixboxError::io(&document, e))?;
        let config = RawConfig::from_yaml(&content, reference.raw(), &document)?;
        tracing::debug!(reference = %reference, document = %document.display(), "loaded configuration document");
        Ok(LoadedSource {
            reference: reference.clone(),
            root,
            document: Some(document),
            config,
        })
    }
}

/// First existing configuration document under `root`, by preference order.
#[must_use]
pub fn find_document(root: &Path) -> Option<PathBuf> {
    CONFIG_FILE_NAMES
        .iter()
        .map(|name| root.join(name))
        .find(|candidate| candidate.is_file())
}
