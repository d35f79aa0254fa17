//! Docker-compatible container runtime.
//!
//! Works with any CLI that speaks `image inspect`, `load -i`, and `run`
//! (docker, podman). The final `run` is executed through the configured
//! shell, exactly as `--dry-run` prints it.

use std::path::{Path, PathBuf};
use std::process::Command;

use nixbox_common::constants::NORMAL_EXIT_CODES;
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::ImageRef;

use super::{ContainerRuntime, capture, stderr_message};
use crate::command::render_dry;

/// Runtime backed by a Docker-compatible CLI.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    program: String,
    shell: PathBuf,
}

impl DockerRuntime {
    /// Creates a runtime invoking `program`, executing `run` via `shell -c`.
    #[must_use]
    pub fn new(program: &str, shell: &Path) -> Self {
        Self {
            program: program.to_string(),
            shell: shell.to_path_buf(),
        }
    }
}

impl ContainerRuntime for DockerRuntime {
    fn program(&self) -> &str {
        &self.program
    }

    fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        let result = Command::new(&self.program)
            .args(["image", "inspect", &image.to_string()])
            .output();
        match result {
            Ok(output) => Ok(output.status.success()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(runtime = %self.program, "container runtime not found; assuming image is absent");
                Ok(false)
            }
            Err(e) => Err(NixboxError::io(&self.program, e)),
        }
    }

    fn load_image(&self, archive: &Path) -> Result<()> {
        tracing::info!(archive = %archive.display(), "loading image into runtime");
        let output = capture(
            Command::new(&self.program).arg("load").arg("-i").arg(archive),
            &self.program,
        )?;
        if !output.status.success() {
            return Err(NixboxError::RuntimeFailure {
                exit_code: output.status.code(),
                message: format!("{} load failed: {}", self.program, stderr_message(&output)),
            });
        }
        Ok(())
    }

    fn run(&self, args: &[String], interactive: bool) -> Result<()> {
        let line = render_dry(&self.program, args);
        tracing::info!(command = %line, "starting container");
        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(&line)
            .status()
            .map_err(|e| NixboxError::io(&self.shell, e))?;

        match status.code() {
            Some(0) => Ok(()),
            Some(code) if interactive && NORMAL_EXIT_CODES.contains(&code) => {
                tracing::debug!(code, "interactive session ended");
                Ok(())
            }
            code => Err(NixboxError::RuntimeFailure {
                exit_code: code,
                message: format!("{} run exited unsuccessfully", self.program),
            }),
        }
    }

    fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}
