//! Domain primitive types used across the nixbox workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_TAG;
use crate::error::{NixboxError, Result};

/// Container image reference (`name:tag`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    /// Repository name.
    pub name: String,
    /// Tag.
    pub tag: String,
}

impl ImageRef {
    /// Parses `name[:tag]`, applying optional name and tag overrides.
    ///
    /// The split happens on the last `:` that is not part of a registry
    /// host port (`localhost:5000/app` keeps its port).
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::Config` if the value is empty or has an empty name.
    pub fn parse(value: &str, name_override: Option<&str>, tag_override: Option<&str>) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(NixboxError::Config {
                message: "image reference cannot be empty".into(),
            });
        }

        let (name, tag) = match value.rsplit_once(':') {
            Some((name, tag)) if !tag.contains('/') => (name, tag),
            _ => (value, DEFAULT_TAG),
        };
        let name = name_override.filter(|n| !n.is_empty()).unwrap_or(name);
        let tag = tag_override.filter(|t| !t.is_empty()).unwrap_or(tag);
        if name.is_empty() || tag.is_empty() {
            return Err(NixboxError::Config {
                message: format!("invalid image reference: {value}"),
            });
        }

        Ok(Self {
            name: name.to_string(),
            tag: tag.to_string(),
        })
    }

    /// Default image reference for a project directory name:
    /// `<sanitized-name>-dev:latest`.
    #[must_use]
    pub fn default_for_dir(dir_name: &str) -> Self {
        Self {
            name: format!("{}-dev", sanitize_image_name(dir_name)),
            tag: DEFAULT_TAG.to_string(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Lowercases and collapses every run of characters outside `[a-z0-9]`
/// into a single `-`. Empty results fall back to `devbox`.
#[must_use]
pub fn sanitize_image_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
    }
    if out.is_empty() {
        "devbox".to_string()
    } else {
        out
    }
}

/// SHA-256 build fingerprint, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Creates a fingerprint from a hex-encoded SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a valid 64-character hex string.
    pub fn from_hex(hex: impl Into<String>) -> Result<Self> {
        let hex = hex.into();
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(NixboxError::Config {
                message: format!("invalid fingerprint: {hex}"),
            });
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    /// Returns the hex-encoded digest.
    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in log lines and file names.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = NixboxError;

    fn try_from(hex: String) -> Result<Self> {
        Self::from_hex(hex)
    }
}

impl From<Fingerprint> for String {
    fn from(fingerprint: Fingerprint) -> Self {
        fingerprint.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sha256:{}", self.0)
    }
}
