//! # nixbox-compose
//!
//! Resolution and merge engine for layered development environments.
//!
//! Handles:
//! - **Reference**: Parsing local, `@alias`, and remote environment references.
//! - **Registry**: The frozen alias table (built-ins, user config, source overlays).
//! - **Inherit**: Single-level `extends` expansion.
//! - **Document**: `devbox.yaml` model and the source loader.
//! - **Merge**: Per-field merge policies and the left-to-right fold.
//! - **Expand**: Environment variable expansion after the merge.
//! - **Fingerprint**: Build identity and the cache gate.
//! - **Resolver**: The end-to-end resolution pipeline.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod document;
pub mod expand;
pub mod fingerprint;
pub mod inherit;
pub mod merge;
pub mod reference;
pub mod registry;
pub mod resolver;
