//! System-wide constants and default paths.

use std::path::PathBuf;
use std::sync::OnceLock;

/// Configuration document names looked up at a source root, in order of preference.
pub const CONFIG_FILE_NAMES: [&str; 4] = ["devbox.yaml", ".devbox.yaml", "devbox.yml", ".devbox.yml"];

/// Shell attribute selected when a reference carries no `#selector`.
pub const DEFAULT_SHELL_ATTR: &str = "devShells.${system}.default";

/// Attribute prefix prepended to bare shell selectors.
pub const DEVSHELLS_PREFIX: &str = "devShells.";

/// Default image tag when an image reference has none.
pub const DEFAULT_TAG: &str = "latest";

/// Working directory inside the container; the invocation directory is mounted here.
pub const DEFAULT_WORKDIR: &str = "/workspace";

/// Home directory used by the image builder; mounts under it are refused.
pub const RESERVED_PATH_PREFIX: &str = "/build";

/// Image label carrying the build fingerprint.
pub const FINGERPRINT_LABEL: &str = "dev.nixbox.fingerprint";

/// Prefix for temporary build directories.
pub const TEMP_DIR_PREFIX: &str = "nixbox.";

/// Runtime exit codes that end an interactive session normally
/// (exit, shell error on exit, SIGINT, SIGTERM).
pub const NORMAL_EXIT_CODES: [i32; 4] = [0, 1, 130, 143];

/// Default container runtime binary.
pub const DEFAULT_RUNTIME_BINARY: &str = "docker";

/// Default environment builder binary.
pub const DEFAULT_BUILDER_BINARY: &str = "nix";

/// Shell used for delegated expansion when `$SHELL` is unset.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// Built-in registry aliases, overlaid by user and source registry blocks.
pub const BUILTIN_REGISTRY: [(&str, &str); 3] = [
    ("templates", "github:NixOS/templates"),
    ("dev-templates", "github:the-nix-way/dev-templates"),
    ("nixpkgs", "github:NixOS/nixpkgs/nixpkgs-unstable"),
];

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "nixbox";

/// Binary name for the CLI.
pub const BIN_NAME: &str = "nixbox";

/// Returns the data directory, preferring the platform data dir
/// (`$XDG_DATA_HOME/nixbox`), then `$HOME/.nixbox`, then a temp-dir fallback.
fn resolve_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_NAME))
        .or_else(|| dirs::home_dir().map(|h| h.join(".nixbox")))
        .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
}

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Returns the resolved data directory for this session.
pub fn data_dir() -> &'static PathBuf {
    DATA_DIR.get_or_init(resolve_data_dir)
}

/// Returns the default user configuration file path, if a config dir exists.
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join("config.yaml"))
}
