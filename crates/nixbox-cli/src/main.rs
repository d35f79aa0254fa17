//! # nixbox
//!
//! Builds a development container from layered Nix environment sources
//! and runs it with the merged configuration.

mod commands;
mod output;

use std::process::ExitCode;

use clap::Parser;
use nixbox_common::error::NixboxError;
use tracing_subscriber::EnvFilter;

use crate::commands::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match commands::execute(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&e);
            exit_code(&e)
        }
    }
}

/// `RUST_LOG` wins; otherwise `--verbose` selects `debug` and the default is `warn`.
fn init_tracing(verbose: bool, json: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Propagates the builder's or runtime's exit code when it fits.
fn exit_code(error: &anyhow::Error) -> ExitCode {
    let code = match error.downcast_ref::<NixboxError>() {
        Some(NixboxError::BuildFailure { exit_code, .. } | NixboxError::RuntimeFailure { exit_code, .. }) => {
            exit_code.and_then(|c| u8::try_from(c).ok()).filter(|c| *c != 0)
        }
        _ => None,
    };
    code.map_or(ExitCode::FAILURE, ExitCode::from)
}
