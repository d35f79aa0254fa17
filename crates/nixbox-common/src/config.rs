//! Global configuration model for the nixbox engine.
//!
//! Layered lowest to highest: built-in defaults, the optional user file
//! (`$XDG_CONFIG_HOME/nixbox/config.yaml`), then environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{NixboxError, Result};

/// Root configuration for the nixbox engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NixboxConfig {
    /// Base directory for the artifact catalog and build locks.
    pub data_dir: PathBuf,
    /// Container runtime binary.
    pub runtime: String,
    /// Environment builder binary.
    pub builder: String,
    /// Shell used for delegated expansion and for executing the final command.
    pub shell: PathBuf,
    /// User-level registry aliases, overlaid on the built-in table.
    pub registry: BTreeMap<String, String>,
}

impl Default for NixboxConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::data_dir().clone(),
            runtime: constants::DEFAULT_RUNTIME_BINARY.to_string(),
            builder: constants::DEFAULT_BUILDER_BINARY.to_string(),
            shell: PathBuf::from(constants::FALLBACK_SHELL),
            registry: BTreeMap::new(),
        }
    }
}

impl NixboxConfig {
    /// Loads the configuration from the default user file (if present) and
    /// applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the user file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let base = match constants::default_config_file() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        Ok(base.with_env_overrides(|key| std::env::var(key).ok()))
    }

    /// Reads a configuration file. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading user configuration");
        let content = std::fs::read_to_string(path).map_err(|e| NixboxError::io(path, e))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|e| NixboxError::Config {
            message: format!("{}: {e}", path.display()),
        })
    }

    /// Applies `NIXBOX_DATA_DIR`, `NIXBOX_RUNTIME`, `NIXBOX_BUILDER`, and
    /// `SHELL` from the given lookup.
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(dir) = non_empty("NIXBOX_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(runtime) = non_empty("NIXBOX_RUNTIME") {
            self.runtime = runtime;
        }
        if let Some(builder) = non_empty("NIXBOX_BUILDER") {
            self.builder = builder;
        }
        if let Some(shell) = non_empty("SHELL") {
            self.shell = PathBuf::from(shell);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_replace_defaults() {
        let config = NixboxConfig::default().with_env_overrides(|key| match key {
            "NIXBOX_RUNTIME" => Some("podman".into()),
            "SHELL" => Some("/bin/zsh".into()),
            "NIXBOX_BUILDER" => Some("   ".into()),
            _ => None,
        });
        assert_eq!(config.runtime, "podman");
        assert_eq!(config.shell, PathBuf::from("/bin/zsh"));
        assert_eq!(config.builder, "nix");
    }

    #[test]
    fn file_with_registry_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "runtime: podman\nregistry:\n  team: github:acme/envs\n",
        )
        .expect("write");

        let config = NixboxConfig::from_file(&path).expect("parse");
        assert_eq!(config.runtime, "podman");
        assert_eq!(config.registry.get("team").map(String::as_str), Some("github:acme/envs"));
        assert_eq!(config.builder, "nix");
    }

    #[test]
    fn empty_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "\n").expect("write");
        assert_eq!(NixboxConfig::from_file(&path).expect("parse"), NixboxConfig::default());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "runtim: podman\n").expect("write");
        assert!(NixboxConfig::from_file(&path).is_err());
    }
}
