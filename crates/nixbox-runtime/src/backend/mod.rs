//! External collaborator abstraction.
//!
//! The engine never builds images or runs containers itself: it drives a
//! [`ContainerRuntime`] (Docker-compatible CLI) and an [`EnvironmentBuilder`]
//! (Nix). Both are traits so tests can substitute in-process fakes.

pub mod docker;
pub mod nix;

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use nixbox_common::config::NixboxConfig;
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::ImageRef;

pub use self::docker::DockerRuntime;
pub use self::nix::{NixBuilder, NixFetcher};

/// Container runtime operations the engine needs.
pub trait ContainerRuntime: Send + Sync {
    /// Program name used in rendered command lines.
    fn program(&self) -> &str;

    /// Whether the runtime has `image` locally.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be queried.
    fn image_exists(&self, image: &ImageRef) -> Result<bool>;

    /// Loads an image archive produced by the builder.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::RuntimeFailure` if the runtime rejects the archive.
    fn load_image(&self, archive: &Path) -> Result<()>;

    /// Runs `<program> <args...>`. With `interactive`, the exit codes of a
    /// normally ended shell session are not failures.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::RuntimeFailure` carrying the exit code.
    fn run(&self, args: &[String], interactive: bool) -> Result<()>;

    /// Whether the runtime binary is installed.
    fn is_available(&self) -> bool;
}

/// Builds an image archive from a generated flake directory.
pub trait EnvironmentBuilder: Send + Sync {
    /// Builds the `image` output of the flake in `flake_dir` and returns the
    /// path of the resulting archive.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::BuildFailure` carrying the builder's exit code.
    fn build(&self, flake_dir: &Path) -> Result<PathBuf>;

    /// Whether the builder binary is installed.
    fn is_available(&self) -> bool;
}

/// Creates the default runtime from configuration.
#[must_use]
pub fn runtime_from_config(config: &NixboxConfig) -> Box<dyn ContainerRuntime> {
    Box::new(DockerRuntime::new(&config.runtime, &config.shell))
}

/// Creates the default builder from configuration.
#[must_use]
pub fn builder_from_config(config: &NixboxConfig, verbose: bool) -> Box<dyn EnvironmentBuilder> {
    Box::new(NixBuilder::new(&config.builder).verbose(verbose))
}

/// Runs `command` to completion with captured output.
pub(crate) fn capture(command: &mut Command, program: &str) -> Result<Output> {
    tracing::debug!(command = ?command, "executing");
    command.output().map_err(|e| NixboxError::io(program, e))
}

/// Trimmed stderr of a finished process, or a placeholder when empty.
pub(crate) fn stderr_message(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if text.is_empty() {
        "no diagnostic output".to_string()
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collaborators_follow_configuration() {
        let config = NixboxConfig {
            runtime: "podman".into(),
            builder: "nix-portable".into(),
            ..NixboxConfig::default()
        };
        assert_eq!(runtime_from_config(&config).program(), "podman");
        assert_eq!(
            builder_from_config(&config, false).is_available(),
            which::which("nix-portable").is_ok()
        );
    }

    #[test]
    fn missing_program_is_io_error() {
        let err = capture(&mut Command::new("/nonexistent/nixbox-test-bin"), "nixbox-test-bin")
            .expect_err("missing");
        assert!(matches!(err, NixboxError::Io { .. }));
    }
}
