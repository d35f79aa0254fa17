//! CLI command definitions and dispatch.

pub mod build;
pub mod run;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use nixbox_common::config::NixboxConfig;
use nixbox_common::constants::BIN_NAME;
use nixbox_common::types::ImageRef;
use nixbox_runtime::engine::{BuildRequest, Engine};

/// nixbox: layered Nix development containers.
#[derive(Parser, Debug)]
#[command(name = BIN_NAME, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Debug logging and streamed build output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the container image for the given environments.
    Build(build::BuildArgs),
    /// Build if needed, then start a container.
    Run(run::RunArgs),
}

/// Options shared by `build` and `run`.
#[derive(Args, Debug, Clone)]
pub struct EnvironmentArgs {
    /// Environment references: local paths, `@alias/path`, or remote flake URLs.
    /// Defaults to the current directory.
    pub references: Vec<String>,

    /// Output image as `name[:tag]`. Defaults to `<dir>-dev:latest`.
    #[arg(short, long)]
    pub output: Option<String>,

    /// Override the image name.
    #[arg(short, long)]
    pub name: Option<String>,

    /// Override the image tag.
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Build even if an image with the same fingerprint exists.
    #[arg(long)]
    pub rebuild: bool,

    /// Show what would happen without building or running.
    #[arg(long)]
    pub dry_run: bool,
}

impl EnvironmentArgs {
    /// Converts the arguments into a build request rooted at the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory is unavailable or the image
    /// reference is invalid.
    pub fn to_request(&self) -> anyhow::Result<BuildRequest> {
        let base_dir = std::env::current_dir().context("cannot determine current directory")?;
        let image = image_ref(self, &base_dir)?;
        Ok(BuildRequest {
            roots: self.references.clone(),
            base_dir,
            image,
            force_rebuild: self.rebuild,
            dry_run: self.dry_run,
        })
    }
}

fn image_ref(args: &EnvironmentArgs, base_dir: &std::path::Path) -> anyhow::Result<ImageRef> {
    let value = match &args.output {
        Some(output) => output.clone(),
        None => {
            let dir_name = base_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            ImageRef::default_for_dir(&dir_name).to_string()
        }
    };
    Ok(ImageRef::parse(&value, args.name.as_deref(), args.tag.as_deref())?)
}

/// Loads the engine configuration and wires the default collaborators.
///
/// # Errors
///
/// Returns an error if the user configuration file is invalid.
pub fn engine(verbose: bool) -> anyhow::Result<Engine> {
    let config = NixboxConfig::load().context("failed to load nixbox configuration")?;
    tracing::debug!(data_dir = %config.data_dir.display(), runtime = %config.runtime, "configuration loaded");
    Ok(Engine::new(config, verbose))
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Build(args) => build::execute(args, cli.verbose),
        Command::Run(args) => run::execute(args, cli.verbose),
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use clap::CommandFactory;

    use super::*;

    fn env_args(argv: &[&str]) -> EnvironmentArgs {
        let cli = Cli::try_parse_from(argv).expect("parse");
        match cli.command {
            Command::Build(args) => args.env,
            Command::Run(args) => args.env,
        }
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn program_name_matches_binary() {
        assert_eq!(Cli::command().get_name(), BIN_NAME);
    }

    #[test]
    fn default_image_comes_from_directory_name() {
        let args = env_args(&["nixbox", "build"]);
        let image = image_ref(&args, Path::new("/home/me/My Project")).expect("image");
        assert_eq!(image.to_string(), "my-project-dev:latest");
    }

    #[test]
    fn name_and_tag_override_output() {
        let args = env_args(&["nixbox", "build", "-o", "base:1.0", "-t", "2.0", "./env", "@templates/rust"]);
        assert_eq!(args.references, vec!["./env", "@templates/rust"]);
        let image = image_ref(&args, Path::new("/x")).expect("image");
        assert_eq!(image.to_string(), "base:2.0");

        let args = env_args(&["nixbox", "run", "-n", "tools", "--dry-run"]);
        assert!(args.dry_run);
        assert_eq!(image_ref(&args, Path::new("/srv/app")).expect("image").to_string(), "tools:latest");
    }
}
