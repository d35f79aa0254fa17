//! Build fingerprint and cache gate.
//!
//! The fingerprint is a SHA-256 over the ordered canonical references and the
//! pre-expansion merged configuration. Expanded values and invocation-level
//! overrides never enter it, so the same sources give the same identity for
//! every user.

use nixbox_common::error::Result;
use nixbox_common::types::Fingerprint;
use sha2::{Digest, Sha256};

use crate::document::MergedConfig;
use crate::reference::Reference;

/// Bumped whenever the hashed layout or image generation changes.
const FINGERPRINT_VERSION: &str = "nixbox-fingerprint/1";

/// Computes the build fingerprint.
///
/// # Errors
///
/// Returns `NixboxError::Serialization` if the configuration cannot be encoded.
pub fn compute(references: &[Reference], config: &MergedConfig) -> Result<Fingerprint> {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_VERSION.as_bytes());
    hasher.update([0]);
    for reference in references {
        hasher.update(reference.canonical().as_bytes());
        hasher.update([0]);
    }
    hasher.update(serde_json::to_vec(config)?);
    let fingerprint = Fingerprint::from_hex(format!("{:x}", hasher.finalize()))?;
    tracing::debug!(fingerprint = fingerprint.short(), sources = references.len(), "computed build fingerprint");
    Ok(fingerprint)
}

/// Looks up previously built artifacts.
pub trait ArtifactIndex {
    /// Whether a usable artifact tagged with `fingerprint` exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the index or runtime cannot be queried.
    fn has_artifact(&self, fingerprint: &Fingerprint) -> Result<bool>;
}

/// Decides whether a build is required.
///
/// # Errors
///
/// Propagates lookup failures from `index`. Never queries when `force_rebuild` is set.
pub fn should_build(index: &dyn ArtifactIndex, fingerprint: &Fingerprint, force_rebuild: bool) -> Result<bool> {
    if force_rebuild {
        tracing::info!(fingerprint = fingerprint.short(), "rebuild forced");
        return Ok(true);
    }
    let exists = index.has_artifact(fingerprint)?;
    if exists {
        tracing::info!(fingerprint = fingerprint.short(), "reusing existing artifact");
    }
    Ok(!exists)
}
