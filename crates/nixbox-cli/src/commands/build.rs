//! `nixbox build`: resolve the environments and build (or reuse) the image.

use clap::Args;

use super::EnvironmentArgs;
use crate::output;

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Environment selection and image options.
    #[command(flatten)]
    pub env: EnvironmentArgs,
}

/// Executes the `build` command.
///
/// # Errors
///
/// Returns an error if resolution or the image build fails.
pub fn execute(args: BuildArgs, verbose: bool) -> anyhow::Result<()> {
    let request = args.env.to_request()?;
    tracing::info!(image = %request.image, roots = request.roots.len(), "build requested");

    let engine = super::engine(verbose)?;
    output::header();
    let report = engine.build(&request)?;
    output::build_report(&report);
    Ok(())
}
