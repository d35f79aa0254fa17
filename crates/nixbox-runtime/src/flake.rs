//! Flake generation for the environment builder.
//!
//! Every resolved reference becomes one flake input; their selected shells
//! are merged with `mkShell { inputsFrom = [...]; }` and packed into an image
//! whose entrypoint drops to the invoking user's uid/gid. Mount points are
//! pre-created so bind mounts have an owned target.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use nixbox_common::constants::{DEFAULT_WORKDIR, FINGERPRINT_LABEL, RESERVED_PATH_PREFIX, TEMP_DIR_PREFIX};
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::{Fingerprint, ImageRef};
use nixbox_compose::document::MergedConfig;
use nixbox_compose::reference::Reference;

/// Numeric owner of the image's user and its mount points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// User id.
    pub uid: u32,
    /// Group id.
    pub gid: u32,
}

impl Owner {
    /// The invoking user.
    #[must_use]
    pub fn current() -> Self {
        Self {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }
}

/// Everything needed to render `flake.nix`.
#[derive(Debug, Clone)]
pub struct FlakeSpec<'a> {
    /// Sources in resolution order.
    pub references: &'a [Reference],
    /// Target image.
    pub image: &'a ImageRef,
    /// Build fingerprint, stored as an image label.
    pub fingerprint: &'a Fingerprint,
    /// Directories created in the image.
    pub mount_points: Vec<String>,
    /// Image user.
    pub owner: Owner,
}

/// Directories to pre-create: volume targets, `init.ensure_dirs`, and the
/// working directory, deduplicated in that order. Entries are made absolute.
#[must_use]
pub fn mount_points(config: &MergedConfig) -> Vec<String> {
    let volume_targets = config
        .volumes
        .iter()
        .filter_map(|v| v.split(':').nth(1));
    let mut points: Vec<String> = Vec::new();
    for raw in volume_targets
        .chain(config.init.ensure_dirs.iter().map(String::as_str))
        .chain(std::iter::once(DEFAULT_WORKDIR))
    {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        let absolute = if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        };
        if !points.contains(&absolute) {
            points.push(absolute);
        }
    }
    points
}

impl FlakeSpec<'_> {
    /// Renders the flake source.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::Config` if there are no references, or
    /// `NixboxError::InvalidReference` for an unresolved alias.
    pub fn render(&self) -> Result<String> {
        if self.references.is_empty() {
            return Err(NixboxError::Config {
                message: "at least one environment reference is required".into(),
            });
        }

        let mut out = String::new();
        let _ = writeln!(out, "{{");
        let _ = writeln!(out, "  inputs = {{");
        let _ = writeln!(out, "    nixpkgs.url = \"github:NixOS/nixpkgs/nixpkgs-unstable\";");
        for (i, reference) in self.references.iter().enumerate() {
            let _ = writeln!(out, "    src{i}.url = \"{}\";", nix_string(&reference.flake_url()?));
        }
        let _ = writeln!(out, "  }};");
        let _ = writeln!(out);

        let inputs: Vec<String> = (0..self.references.len()).map(|i| format!("src{i}")).collect();
        let _ = writeln!(out, "  outputs = {{ self, nixpkgs, {} }}:", inputs.join(", "));
        let _ = writeln!(out, "  let");
        let _ = writeln!(out, "    system = builtins.currentSystem;");
        let _ = writeln!(out, "    pkgs = import nixpkgs {{ inherit system; }};");
        for (i, reference) in self.references.iter().enumerate() {
            let _ = writeln!(out, "    shell{i} = src{i}.{};", reference.shell_attr());
        }
        let _ = writeln!(out);

        let shells: Vec<String> = (0..self.references.len()).map(|i| format!("shell{i}")).collect();
        let owner = format!("{}:{}", self.owner.uid, self.owner.gid);
        let name = nix_string(&self.image.name);
        let tag = nix_string(&self.image.tag);

        let _ = writeln!(out, "    mergedShell = pkgs.mkShell {{ inputsFrom = [ {} ]; }};", shells.join(" "));
        let _ = writeln!(out);
        let _ = writeln!(out, "    entrypoint = pkgs.writeShellScriptBin \"entrypoint\" ''");
        let _ = writeln!(out, "      set -e");
        let _ = writeln!(
            out,
            "      rcfile=$(${{pkgs.coreutils}}/bin/ls /nix/store/*-nix-shell-rc 2>/dev/null | ${{pkgs.coreutils}}/bin/head -1)"
        );
        let _ = writeln!(out, "      if [ -z \"$rcfile\" ]; then");
        let _ = writeln!(out, "        echo \"entrypoint: nix-shell-rc not found\" >&2");
        let _ = writeln!(out, "        exit 1");
        let _ = writeln!(out, "      fi");
        let _ = writeln!(out, "      if [ $# -eq 0 ]; then");
        let _ = writeln!(
            out,
            "        exec ${{pkgs.gosu}}/bin/gosu {owner} ${{pkgs.bashInteractive}}/bin/bash --rcfile \"$rcfile\""
        );
        let _ = writeln!(out, "      else");
        let _ = writeln!(out, "        exec ${{pkgs.gosu}}/bin/gosu {owner} \"$@\"");
        let _ = writeln!(out, "      fi");
        let _ = writeln!(out, "    '';");
        let _ = writeln!(out);
        let _ = writeln!(out, "    baseImage = pkgs.dockerTools.buildNixShellImage {{");
        let _ = writeln!(out, "      drv = mergedShell;");
        let _ = writeln!(out, "      name = \"{name}-base\";");
        let _ = writeln!(out, "      tag = \"{tag}\";");
        let _ = writeln!(out, "      uid = {};", self.owner.uid);
        let _ = writeln!(out, "      gid = {};", self.owner.gid);
        let _ = writeln!(out, "      homeDirectory = \"{RESERVED_PATH_PREFIX}\";");
        let _ = writeln!(out, "    }};");
        let _ = writeln!(out);
        // buildImage keeps a single layer on top of the shell image's many.
        let _ = writeln!(out, "    image = pkgs.dockerTools.buildImage {{");
        let _ = writeln!(out, "      name = \"{name}\";");
        let _ = writeln!(out, "      tag = \"{tag}\";");
        let _ = writeln!(out, "      fromImage = baseImage;");
        let _ = writeln!(out, "      copyToRoot = [ entrypoint pkgs.gosu ];");
        let _ = writeln!(out, "      extraCommands = ''");
        for point in &self.mount_points {
            let quoted = shell_single_quote(&format!(".{point}"));
            let _ = writeln!(out, "        mkdir -p {quoted}");
            let _ = writeln!(out, "        chown {owner} {quoted}");
        }
        let _ = writeln!(out, "      '';");
        let _ = writeln!(out, "      config = {{");
        let _ = writeln!(out, "        Entrypoint = [ \"/bin/entrypoint\" ];");
        let _ = writeln!(out, "        Cmd = [ ];");
        let _ = writeln!(out, "        WorkingDir = \"{DEFAULT_WORKDIR}\";");
        let _ = writeln!(
            out,
            "        Labels = {{ \"{FINGERPRINT_LABEL}\" = \"{}\"; }};",
            self.fingerprint.as_hex()
        );
        let _ = writeln!(out, "      }};");
        let _ = writeln!(out, "    }};");
        let _ = writeln!(out, "  in {{");
        let _ = writeln!(out, "    packages.${{system}}.image = image;");
        let _ = writeln!(out, "  }};");
        let _ = writeln!(out, "}}");
        Ok(out)
    }
}

/// Escapes a value for a double-quoted Nix string.
fn nix_string(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${")
}

/// Single-quotes a path for the image's build script. Inside a Nix
/// indented string, `''` must be written `'''`.
fn shell_single_quote(value: &str) -> String {
    let quoted = format!("'{}'", value.replace('\'', r#"'"'"'"#));
    quoted.replace("''", "'''").replace("${", "''${")
}

/// Writes `flake.nix` into `dir` and returns its path.
///
/// # Errors
///
/// Returns `NixboxError::Io` if the file cannot be written.
pub fn write_flake(dir: &Path, content: &str) -> Result<PathBuf> {
    let path = dir.join("flake.nix");
    std::fs::write(&path, content).map_err(|e| NixboxError::io(&path, e))?;
    tracing::debug!(path = %path.display(), "wrote generated flake");
    Ok(path)
}

/// Creates a temporary build directory that is removed when dropped.
///
/// # Errors
///
/// Returns `NixboxError::Io` if the directory cannot be created.
pub fn build_dir() -> Result<tempfile::TempDir> {
    tempfile::Builder::new()
        .prefix(TEMP_DIR_PREFIX)
        .tempdir()
        .map_err(|e| NixboxError::io(std::env::temp_dir(), e))
}
