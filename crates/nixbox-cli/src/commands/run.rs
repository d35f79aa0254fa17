//! `nixbox run`: build the image if needed, then start a container.

use anyhow::Context;
use clap::Args;
use nixbox_runtime::command::{RunOptions, split_command};
use nixbox_runtime::engine::{RunOutcome, RunRequest};

use super::EnvironmentArgs;
use crate::output;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Environment selection and image options.
    #[command(flatten)]
    pub env: EnvironmentArgs,

    /// Publish a port (`host:container`). Repeatable.
    #[arg(short, long = "port")]
    pub ports: Vec<String>,

    /// Mount a volume (`host:container[:opts]`). Repeatable.
    #[arg(short = 'V', long = "volume")]
    pub volumes: Vec<String>,

    /// Set an environment variable (`KEY=VALUE`). Repeatable.
    #[arg(short, long = "env")]
    pub env_vars: Vec<String>,

    /// Working directory inside the container.
    #[arg(short, long)]
    pub workdir: Option<String>,

    /// User to run as inside the container.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Run in the background without a TTY.
    #[arg(short, long)]
    pub detach: bool,

    /// Keep the container after it exits.
    #[arg(long)]
    pub no_rm: bool,

    /// Container name.
    #[arg(long)]
    pub container_name: Option<String>,

    /// Command to run instead of the interactive shell.
    #[arg(long, visible_alias = "cmd")]
    pub command: Option<String>,
}

impl RunArgs {
    fn options(&self) -> anyhow::Result<RunOptions> {
        let command = match &self.command {
            Some(line) => split_command(line).context("invalid --command")?,
            None => Vec::new(),
        };
        Ok(RunOptions {
            container_name: self.container_name.clone(),
            detach: self.detach,
            remove: !self.no_rm,
            workdir: self.workdir.clone(),
            user: self.user.clone(),
            command,
        })
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Returns an error if resolution, the build, or the container run fails.
pub fn execute(args: RunArgs, verbose: bool) -> anyhow::Result<()> {
    let request = RunRequest {
        build: args.env.to_request()?,
        ports: args.ports.clone(),
        volumes: args.volumes.clone(),
        env: args.env_vars.clone(),
        options: args.options()?,
    };
    tracing::info!(image = %request.build.image, detach = args.detach, "run requested");

    let engine = super::engine(verbose)?;
    if !request.build.dry_run {
        output::header();
    }
    match engine.run(&request)? {
        RunOutcome::DryRun { command } => output::command_line(&command),
        RunOutcome::Completed { build } => output::session_ended(&build, args.detach),
    }
    Ok(())
}
