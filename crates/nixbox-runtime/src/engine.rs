//! Build and run orchestration.
//!
//! The engine owns the external collaborators and drives one invocation:
//! resolve the references, fingerprint the result, consult the artifact
//! catalog, build under the per-fingerprint lock when needed, and finally
//! synthesize (and optionally execute) the runtime command.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use nixbox_common::config::NixboxConfig;
use nixbox_common::constants::{self, DEFAULT_WORKDIR};
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::{Fingerprint, ImageRef};
use nixbox_compose::document::{MergedConfig, RawConfig, SourceFetcher};
use nixbox_compose::expand::{CommandExpander, ShellExpander, expand_config};
use nixbox_compose::fingerprint::{compute, should_build};
use nixbox_compose::merge::{merge_into, volume_key};
use nixbox_compose::reference::Reference;
use nixbox_compose::resolver::{Resolution, Resolver};

use crate::backend::{self, ContainerRuntime, EnvironmentBuilder, NixFetcher};
use crate::catalog::{ArtifactCatalog, CatalogEntry, ImageIndex};
use crate::command::{RunOptions, render, render_dry};
use crate::flake::{FlakeSpec, Owner, build_dir, mount_points, write_flake};
use crate::lock::BuildLock;

/// Inputs of a build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Root references in CLI order; empty means `.`.
    pub roots: Vec<String>,
    /// Directory relative references resolve against.
    pub base_dir: PathBuf,
    /// Target image.
    pub image: ImageRef,
    /// Build even if a matching artifact exists.
    pub force_rebuild: bool,
    /// Generate the flake but do not build.
    pub dry_run: bool,
}

/// What a build did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// A new image was built and loaded.
    Built,
    /// An image with the same fingerprint was already present.
    Reused,
    /// The flake was written to `flake_dir` and nothing was built.
    DryRun {
        /// Kept directory holding `flake.nix`.
        flake_dir: PathBuf,
    },
}

/// Result of [`Engine::build`].
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// Target image.
    pub image: ImageRef,
    /// Fingerprint of the resolved inputs.
    pub fingerprint: Fingerprint,
    /// Resolved references in fold order.
    pub references: Vec<Reference>,
    /// What happened.
    pub outcome: BuildOutcome,
}

/// Inputs of a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Build inputs; `dry_run` here also skips execution.
    pub build: BuildRequest,
    /// Extra `host:container` port mappings.
    pub ports: Vec<String>,
    /// Extra volume mounts.
    pub volumes: Vec<String>,
    /// Extra `KEY=VALUE` environment entries.
    pub env: Vec<String>,
    /// Invocation options outside the layered configuration.
    pub options: RunOptions,
}

/// Result of [`Engine::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The container ran and exited normally.
    Completed {
        /// The build step that preceded the run.
        build: BuildReport,
    },
    /// Nothing was built or executed.
    DryRun {
        /// The fully quoted command line.
        command: String,
    },
}

/// Orchestrates resolution, building, and running.
pub struct Engine {
    config: NixboxConfig,
    runtime: Box<dyn ContainerRuntime>,
    builder: Box<dyn EnvironmentBuilder>,
    fetcher: Box<dyn SourceFetcher>,
    expander: Box<dyn CommandExpander>,
    owner: Owner,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("runtime", &self.runtime.program())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine with the collaborators named by `config`.
    #[must_use]
    pub fn new(config: NixboxConfig, verbose: bool) -> Self {
        Self {
            runtime: backend::runtime_from_config(&config),
            builder: backend::builder_from_config(&config, verbose),
            fetcher: Box::new(NixFetcher::new(&config.builder)),
            expander: Box::new(ShellExpander::new(&config.shell)),
            owner: Owner::current(),
            config,
        }
    }

    /// Replaces the container runtime.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Box<dyn ContainerRuntime>) -> Self {
        self.runtime = runtime;
        self
    }

    /// Replaces the environment builder.
    #[must_use]
    pub fn with_builder(mut self, builder: Box<dyn EnvironmentBuilder>) -> Self {
        self.builder = builder;
        self
    }

    /// Replaces the remote source fetcher.
    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Box<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Replaces the variable expander.
    #[must_use]
    pub fn with_expander(mut self, expander: Box<dyn CommandExpander>) -> Self {
        self.expander = expander;
        self
    }

    /// Sets the image user instead of the invoking one.
    #[must_use]
    pub const fn with_owner(mut self, owner: Owner) -> Self {
        self.owner = owner;
        self
    }

    /// Resolves `roots` into ordered sources and a frozen merged configuration.
    ///
    /// # Errors
    ///
    /// Returns reference, registry, fetch, or parse errors.
    pub fn resolve(&self, roots: &[String], base_dir: &Path) -> Result<Resolution> {
        let registry_dir = constants::default_config_file()
            .as_deref()
            .and_then(Path::parent)
            .map_or_else(|| base_dir.to_path_buf(), Path::to_path_buf);
        Resolver::new(self.fetcher.as_ref())
            .with_user_registry(self.config.registry.clone(), registry_dir)
            .resolve(roots, base_dir)
    }

    /// Resolves, fingerprints, and builds the image unless a matching one exists.
    ///
    /// # Errors
    ///
    /// Returns resolution errors before any side effect, then
    /// `BuildFailure`/`RuntimeFailure` from the collaborators.
    pub fn build(&self, request: &BuildRequest) -> Result<BuildReport> {
        let resolution = self.resolve(&request.roots, &request.base_dir)?;
        self.build_resolved(request, &resolution)
    }

    fn build_resolved(&self, request: &BuildRequest, resolution: &Resolution) -> Result<BuildReport> {
        let fingerprint = compute(&resolution.references, &resolution.merged)?;
        let flake = FlakeSpec {
            references: &resolution.references,
            image: &request.image,
            fingerprint: &fingerprint,
            mount_points: mount_points(&resolution.merged),
            owner: self.owner,
        }
        .render()?;

        let report = |outcome| BuildReport {
            image: request.image.clone(),
            fingerprint: fingerprint.clone(),
            references: resolution.references.clone(),
            outcome,
        };

        if request.dry_run {
            let dir = build_dir()?.keep();
            let _ = write_flake(&dir, &flake)?;
            tracing::info!(dir = %dir.display(), "dry run: flake written, build skipped");
            return Ok(report(BuildOutcome::DryRun { flake_dir: dir }));
        }

        let catalog = ArtifactCatalog::open(&self.config.data_dir)?;
        let index = ImageIndex::new(&catalog, self.runtime.as_ref(), &request.image);
        if !should_build(&index, &fingerprint, request.force_rebuild)? {
            return Ok(report(BuildOutcome::Reused));
        }

        let _lock = BuildLock::acquire(&self.config.data_dir, &fingerprint)?;
        if !request.force_rebuild && !should_build(&index, &fingerprint, false)? {
            tracing::info!(image = %request.image, "image built by a concurrent invocation");
            return Ok(report(BuildOutcome::Reused));
        }

        if !self.builder.is_available() {
            return Err(NixboxError::BuildFailure {
                exit_code: None,
                message: format!("environment builder `{}` is not installed", self.config.builder),
            });
        }

        let work = build_dir()?;
        let _ = write_flake(work.path(), &flake)?;
        tracing::info!(image = %request.image, fingerprint = fingerprint.short(), "building image");
        let archive = self.builder.build(work.path())?;
        self.runtime.load_image(&archive)?;
        catalog.record(CatalogEntry {
            fingerprint: fingerprint.clone(),
            image: request.image.clone(),
            sources: resolution.references.iter().map(Reference::canonical).collect(),
            built_at: Utc::now(),
        })?;
        tracing::info!(image = %request.image, "image ready");
        Ok(report(BuildOutcome::Built))
    }

    /// Ensures the image exists, then runs it.
    ///
    /// A dry run resolves and renders only: nothing is built or executed and
    /// the quoted command line is returned.
    ///
    /// # Errors
    ///
    /// Returns resolution, expansion, reserved-path, build, or runtime errors.
    pub fn run(&self, request: &RunRequest) -> Result<RunOutcome> {
        let resolution = self.resolve(&request.build.roots, &request.build.base_dir)?;

        // Every run-time validation happens before the build starts.
        let mut config = resolution.merged.clone();
        let layer = self.invocation_layer(&config, request);
        merge_into(&mut config, &layer);
        let expanded = expand_config(&config, self.expander.as_ref())?;
        let args = render(&request.build.image, &expanded, &request.options)?;

        if request.build.dry_run {
            let command = render_dry(self.runtime.program(), &args);
            tracing::info!("dry run: container not started");
            return Ok(RunOutcome::DryRun { command });
        }

        let build = self.build_resolved(&request.build, &resolution)?;
        self.runtime.run(&args, request.options.interactive())?;
        Ok(RunOutcome::Completed { build })
    }

    /// The per-invocation layer folded after every source. Never part of the
    /// fingerprint.
    fn invocation_layer(&self, merged: &MergedConfig, request: &RunRequest) -> RawConfig {
        let mut layer = RawConfig {
            ports: request.ports.clone(),
            volumes: request.volumes.clone(),
            env: request.env.clone(),
            ..RawConfig::default()
        };

        let targets_workspace = merged
            .volumes
            .iter()
            .chain(&layer.volumes)
            .any(|v| volume_key(v).trim_end_matches('/') == DEFAULT_WORKDIR);
        if !targets_workspace {
            let cwd = request.build.base_dir.to_string_lossy().replace('$', "\\$");
            layer.volumes.push(format!("{cwd}:{DEFAULT_WORKDIR}"));
        }

        let has_env = |key: &str| {
            merged
                .env
                .iter()
                .chain(&layer.env)
                .any(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k) == key)
        };
        let ids = [("USER_ID", self.owner.uid), ("GROUP_ID", self.owner.gid)];
        let missing: Vec<String> = ids
            .iter()
            .filter(|(key, _)| !has_env(key))
            .map(|(key, id)| format!("{key}={id}"))
            .collect();
        layer.env.extend(missing);
        layer
    }
}
