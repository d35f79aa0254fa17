//! Unified error types for the nixbox workspace.
//!
//! Every fatal condition raised while resolving, merging, building, or
//! running an environment maps onto one variant here. Resolution errors are
//! raised before any build or run side effect takes place.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum NixboxError {
    /// A reference string matches no recognized grammar.
    #[error("invalid reference \"{raw}\": {reason}")]
    InvalidReference {
        /// The reference as given by the user or a document.
        raw: String,
        /// Why the string was rejected.
        reason: String,
    },

    /// An `@alias` has no entry in the registry table.
    #[error("unknown registry alias \"@{name}\" (referenced by \"{raw}\")")]
    UnknownRegistryAlias {
        /// Alias name without the leading `@`.
        name: String,
        /// Full reference string that used the alias.
        raw: String,
    },

    /// A configuration document exists but cannot be parsed.
    #[error("invalid configuration in {path} (source {source_ref}){}: {message}", location_suffix(.line, .column))]
    ConfigParse {
        /// Reference of the source the document belongs to.
        source_ref: String,
        /// Path of the offending document.
        path: PathBuf,
        /// 1-based line of the parse error, when known.
        line: Option<usize>,
        /// 1-based column of the parse error, when known.
        column: Option<usize>,
        /// Parser message.
        message: String,
    },

    /// A remote source could not be retrieved.
    #[error("failed to fetch {reference}: {message}")]
    FetchFailure {
        /// Reference that was being fetched.
        reference: String,
        /// Description reported by the retrieval collaborator.
        message: String,
    },

    /// The expander could not expand a configuration value.
    #[error("failed to expand \"{input}\": {message}")]
    ExpansionFailure {
        /// The unexpanded source string.
        input: String,
        /// Description of the failure.
        message: String,
    },

    /// The external environment builder failed.
    #[error("build failed{}: {message}", exit_suffix(.exit_code))]
    BuildFailure {
        /// Exit code of the builder process, if it exited normally.
        exit_code: Option<i32>,
        /// Captured diagnostic output.
        message: String,
    },

    /// The container runtime failed.
    #[error("container runtime failed{}: {message}", exit_suffix(.exit_code))]
    RuntimeFailure {
        /// Exit code of the runtime process, if it exited normally.
        exit_code: Option<i32>,
        /// Captured diagnostic output.
        message: String,
    },

    /// A mount target or working directory falls under a reserved prefix.
    #[error("{path} is reserved for internal use (under {prefix}) and cannot be mounted over")]
    ReservedMountPath {
        /// The offending container-side path.
        path: String,
        /// The reserved prefix it falls under.
        prefix: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl NixboxError {
    /// Builds an [`NixboxError::Io`] from a path and an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[allow(clippy::ref_option)]
fn location_suffix(line: &Option<usize>, column: &Option<usize>) -> String {
    match (*line, *column) {
        (Some(l), Some(c)) => format!(" at line {l}, column {c}"),
        (Some(l), None) => format!(" at line {l}"),
        _ => String::new(),
    }
}

#[allow(clippy::ref_option)]
fn exit_suffix(code: &Option<i32>) -> String {
    code.map_or_else(
        || " (terminated by signal)".to_string(),
        |c| format!(" (exit code {c})"),
    )
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, NixboxError>;
