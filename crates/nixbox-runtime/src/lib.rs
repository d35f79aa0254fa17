//! # nixbox-runtime
//!
//! Everything past the merged configuration.
//!
//! Handles:
//! - **Command**: Rendering a configuration into `run` arguments, plus dry-run quoting.
//! - **Backend**: Container runtime, environment builder, and remote fetcher collaborators.
//! - **Flake**: Generation of the builder's input from resolved references.
//! - **Catalog**: Fingerprint-to-image records for build reuse.
//! - **Lock**: Per-fingerprint build serialization.
//! - **Engine**: The `build` and `run` orchestration.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod backend;
pub mod catalog;
pub mod command;
pub mod engine;
pub mod flake;
pub mod lock;
