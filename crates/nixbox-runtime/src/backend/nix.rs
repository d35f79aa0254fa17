//! Nix as environment builder and remote source fetcher.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use nixbox_common::error::{NixboxError, Result};
use nixbox_compose::document::SourceFetcher;
use nixbox_compose::reference::Reference;
use serde::Deserialize;

use super::{EnvironmentBuilder, capture, stderr_message};

/// Builds the generated flake's `image` output with `nix build`.
#[derive(Debug, Clone)]
pub struct NixBuilder {
    program: String,
    verbose: bool,
}

impl NixBuilder {
    /// Creates a builder invoking `program`.
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            verbose: false,
        }
    }

    /// Streams build logs to the terminal instead of capturing them.
    #[must_use]
    pub const fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

impl EnvironmentBuilder for NixBuilder {
    fn build(&self, flake_dir: &Path) -> Result<PathBuf> {
        tracing::info!(dir = %flake_dir.display(), "building image with nix");
        let mut command = Command::new(&self.program);
        let _ = command
            .args(["build", "--impure", ".#image"])
            .current_dir(flake_dir);

        if self.verbose {
            let status = command
                .args(["-vv", "--print-build-logs"])
                .stdin(Stdio::null())
                .status()
                .map_err(|e| NixboxError::io(&self.program, e))?;
            if !status.success() {
                return Err(NixboxError::BuildFailure {
                    exit_code: status.code(),
                    message: "nix build failed (see log above)".into(),
                });
            }
        } else {
            let output = capture(&mut command, &self.program)?;
            if !output.status.success() {
                return Err(NixboxError::BuildFailure {
                    exit_code: output.status.code(),
                    message: stderr_message(&output),
                });
            }
        }

        let archive = flake_dir.join("result");
        if !archive.exists() {
            return Err(NixboxError::BuildFailure {
                exit_code: Some(0),
                message: format!("build produced no archive at {}", archive.display()),
            });
        }
        Ok(archive)
    }

    fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrefetchOutput {
    store_path: PathBuf,
}

/// Fetches remote sources into the Nix store with `nix flake prefetch`.
#[derive(Debug, Clone)]
pub struct NixFetcher {
    program: String,
}

impl NixFetcher {
    /// Creates a fetcher invoking `program`.
    #[must_use]
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl SourceFetcher for NixFetcher {
    fn fetch(&self, reference: &Reference) -> Result<PathBuf> {
        let failure = |message: String| NixboxError::FetchFailure {
            reference: reference.raw().to_string(),
            message,
        };

        tracing::info!(source = reference.location(), "fetching remote source");
        let output = Command::new(&self.program)
            .args(["flake", "prefetch", "--json", reference.location()])
            .output()
            .map_err(|e| failure(format!("cannot run {}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(failure(stderr_message(&output)));
        }

        let parsed: PrefetchOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| failure(format!("unexpected prefetch output: {e}")))?;
        Ok(parsed.store_path)
    }
}
