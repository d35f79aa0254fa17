//! Formatted output helpers for CLI commands.
//!
//! Progress and results go to stderr; a dry-run command line goes to stdout
//! so it can be piped or copied.

#![allow(clippy::print_stderr)]

use nixbox_runtime::engine::{BuildOutcome, BuildReport};

const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn header() {
    eprintln!();
    eprintln!("  {BOLD}nixbox{RESET} {DIM}v{}{RESET}", env!("CARGO_PKG_VERSION"));
    eprintln!();
}

/// One-line summary of a build.
#[must_use]
pub fn outcome_line(report: &BuildReport) -> String {
    let image = &report.image;
    let short = report.fingerprint.short();
    match &report.outcome {
        BuildOutcome::Built => format!("{GREEN}{BOLD}Built{RESET} {BOLD}{image}{RESET} {DIM}[{short}]{RESET}"),
        BuildOutcome::Reused => format!("{CYAN}Up to date{RESET} {BOLD}{image}{RESET} {DIM}[{short}]{RESET}"),
        BuildOutcome::DryRun { flake_dir } => format!(
            "{CYAN}Dry run{RESET}: flake for {BOLD}{image}{RESET} written to {}",
            flake_dir.join("flake.nix").display()
        ),
    }
}

pub fn build_report(report: &BuildReport) {
    eprintln!("  Sources:");
    for reference in &report.references {
        eprintln!("    {GREEN}●{RESET} {reference}");
    }
    eprintln!();
    eprintln!("  {}", outcome_line(report));
}

pub fn session_ended(report: &BuildReport, detached: bool) {
    eprintln!("  {}", outcome_line(report));
    if detached {
        eprintln!("  Container started in the background.");
    }
}

#[allow(clippy::print_stdout)]
pub fn command_line(command: &str) {
    println!("{command}");
}

pub fn error(error: &anyhow::Error) {
    eprintln!("{RED}{BOLD}error{RESET}: {error:#}");
}
