//! Container runtime command synthesis.
//!
//! Renders a merged, expanded configuration into the argument list of a
//! `<runtime> run` invocation. Field-to-flag mapping is fixed so the same
//! configuration always yields the same command:
//!
//! ```text
//! run [--rm] [-i -t | -d] [--name] [--workdir] [--user]
//!     security  resources  logging  --publish  --volume  --tmpfs  --env
//!     extra_args  IMAGE  [COMMAND...]
//! ```
//!
//! `extra_args` come after every generated flag so the most specific layer
//! can override anything the engine emits.

use nixbox_common::constants::RESERVED_PATH_PREFIX;
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::ImageRef;
use nixbox_compose::document::MergedConfig;
use nixbox_compose::merge::{tmpfs_key, volume_key};

/// Invocation options that are not part of the layered configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Container name.
    pub container_name: Option<String>,
    /// Run in the background; disables the interactive TTY.
    pub detach: bool,
    /// Remove the container when it exits.
    pub remove: bool,
    /// Working directory inside the container.
    pub workdir: Option<String>,
    /// User override; wins over the configured `user`.
    pub user: Option<String>,
    /// Command and arguments run after the image.
    pub command: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            container_name: None,
            detach: false,
            remove: true,
            workdir: None,
            user: None,
            command: Vec::new(),
        }
    }
}

impl RunOptions {
    /// Whether the container gets an interactive TTY.
    #[must_use]
    pub const fn interactive(&self) -> bool {
        !self.detach
    }
}

/// Renders the runtime argument list (without the runtime program itself).
///
/// # Errors
///
/// Returns `NixboxError::ReservedMountPath` if a volume target, tmpfs path,
/// or the working directory falls under the reserved build prefix.
pub fn render(image: &ImageRef, config: &MergedConfig, options: &RunOptions) -> Result<Vec<String>> {
    for volume in &config.volumes {
        check_reserved(volume_key(volume))?;
    }
    for tmpfs in &config.tmpfs {
        check_reserved(tmpfs_key(tmpfs))?;
    }
    if let Some(workdir) = &options.workdir {
        check_reserved(workdir)?;
    }

    let mut args = vec!["run".to_string()];
    if options.remove {
        args.push("--rm".into());
    }
    if options.detach {
        args.push("-d".into());
    } else {
        args.extend(["-i".to_string(), "-t".to_string()]);
    }
    if let Some(name) = &options.container_name {
        args.push(format!("--name={name}"));
    }
    if let Some(workdir) = &options.workdir {
        args.push(format!("--workdir={workdir}"));
    }
    if let Some(user) = options.user.as_ref().or(config.user.as_ref()) {
        args.push(format!("--user={user}"));
    }

    let security = &config.security;
    if security.read_only {
        args.push("--read-only".into());
    }
    if security.no_new_privileges {
        args.push("--security-opt=no-new-privileges".into());
    }
    args.extend(security.cap_drop.iter().map(|cap| format!("--cap-drop={cap}")));
    args.extend(security.cap_add.iter().map(|cap| format!("--cap-add={cap}")));

    let resources = &config.resources;
    if let Some(memory) = &resources.memory {
        args.push(format!("--memory={memory}"));
    }
    if let Some(cpus) = &resources.cpus {
        args.push(format!("--cpus={cpus}"));
    }
    if let Some(pids) = resources.pids_limit {
        args.push(format!("--pids-limit={pids}"));
    }

    if let Some(driver) = &config.logging.driver {
        args.push(format!("--log-driver={driver}"));
    }
    args.extend(config.logging.options.iter().map(|(k, v)| format!("--log-opt={k}={v}")));

    args.extend(config.ports.iter().map(|p| format!("--publish={p}")));
    args.extend(config.volumes.iter().map(|v| format!("--volume={v}")));
    args.extend(config.tmpfs.iter().map(|t| format!("--tmpfs={t}")));
    args.extend(config.env.iter().map(|e| format!("--env={e}")));
    args.extend(config.extra_args.iter().cloned());

    args.push(image.to_string());
    args.extend(options.command.iter().cloned());
    Ok(args)
}

/// Fails if `path` is the reserved prefix or lies beneath it.
///
/// # Errors
///
/// Returns `NixboxError::ReservedMountPath`.
pub fn check_reserved(path: &str) -> Result<()> {
    let trimmed = path.trim();
    let normalized = if trimmed.len() > 1 { trimmed.trim_end_matches('/') } else { trimmed };
    let reserved = normalized == RESERVED_PATH_PREFIX
        || normalized
            .strip_prefix(RESERVED_PATH_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'));
    if reserved {
        return Err(NixboxError::ReservedMountPath {
            path: path.to_string(),
            prefix: RESERVED_PATH_PREFIX.to_string(),
        });
    }
    Ok(())
}

/// Quotes one argument for a POSIX shell; safe words are left bare.
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}

/// Joins `program` and `args` into one shell-quoted command line.
#[must_use]
pub fn render_dry(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits a command string into words with POSIX shell quoting rules
/// (single quotes, double quotes, backslash escapes). Nothing is expanded.
///
/// # Errors
///
/// Returns `NixboxError::Config` on an unterminated quote or trailing backslash.
pub fn split_command(input: &str) -> Result<Vec<String>> {
    let unterminated = |what: &str| NixboxError::Config {
        message: format!("unterminated {what} in command: {input}"),
    };

    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated("single quote")),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some('\n') => {}
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(unterminated("double quote")),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated("double quote")),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some('\n') => {}
                    Some(ch) => current.push(ch),
                    None => return Err(unterminated("escape")),
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

#[cfg(test)]
mod tests {
    use nixbox_compose::document::{LoggingConfig, ResourceConfig, SecurityConfig};

    use super::*;

    fn image() -> ImageRef {
        ImageRef::parse("app-dev:latest", None, None).expect("image")
    }

    #[test]
    fn minimal_interactive_command() {
        let args = render(&image(), &MergedConfig::default(), &RunOptions::default()).expect("render");
        assert_eq!(args, vec!["run", "--rm", "-i", "-t", "app-dev:latest"]);
    }

    #[test]
    fn full_mapping_order() {
        let config = MergedConfig {
            security: SecurityConfig {
                read_only: true,
                no_new_privileges: true,
                cap_drop: vec!["ALL".into()],
                cap_add: vec!["NET_BIND_SERVICE".into()],
            },
            resources: ResourceConfig {
                memory: Some("1g".into()),
                cpus: Some("2".into()),
                pids_limit: Some(128),
            },
            logging: LoggingConfig {
                driver: Some("json-file".into()),
                options: [("max-size".to_string(), "10m".to_string())].into_iter().collect(),
            },
            ports: vec!["3000:3000".into()],
            volumes: vec!["/src:/workspace".into()],
            tmpfs: vec!["/tmp:size=64m".into()],
            env: vec!["A=1".into()],
            extra_args: vec!["--memory=4g".into()],
            user: Some("dev".into()),
            ..MergedConfig::default()
        };
        let options = RunOptions {
            container_name: Some("box".into()),
            detach: true,
            remove: false,
            workdir: Some("/workspace".into()),
            user: None,
            command: vec!["make".into(), "test".into()],
        };
        let args = render(&image(), &config, &options).expect("render");
        assert_eq!(
            args,
            vec![
                "run",
                "-d",
                "--name=box",
                "--workdir=/workspace",
                "--user=dev",
                "--read-only",
                "--security-opt=no-new-privileges",
                "--cap-drop=ALL",
                "--cap-add=NET_BIND_SERVICE",
                "--memory=1g",
                "--cpus=2",
                "--pids-limit=128",
                "--log-driver=json-file",
                "--log-opt=max-size=10m",
                "--publish=3000:3000",
                "--volume=/src:/workspace",
                "--tmpfs=/tmp:size=64m",
                "--env=A=1",
                "--memory=4g",
                "app-dev:latest",
                "make",
                "test",
            ]
        );
    }

    #[test]
    fn cli_user_wins_over_config() {
        let config = MergedConfig {
            user: Some("dev".into()),
            ..MergedConfig::default()
        };
        let options = RunOptions {
            user: Some("1000:1000".into()),
            ..RunOptions::default()
        };
        let args = render(&image(), &config, &options).expect("render");
        assert!(args.contains(&"--user=1000:1000".to_string()));
        assert!(!args.contains(&"--user=dev".to_string()));
    }

    #[test]
    fn reserved_targets_are_rejected() {
        let config = MergedConfig {
            volumes: vec!["/cache:/build/.cache".into()],
            ..MergedConfig::default()
        };
        let err = render(&image(), &config, &RunOptions::default()).expect_err("reserved");
        assert!(matches!(err, NixboxError::ReservedMountPath { ref path, .. } if path == "/build/.cache"));

        let options = RunOptions {
            workdir: Some("/build".into()),
            ..RunOptions::default()
        };
        assert!(render(&image(), &MergedConfig::default(), &options).is_err());
    }

    #[test]
    fn reserved_check_is_prefix_aware() {
        assert!(check_reserved("/build/").is_err());
        assert!(check_reserved("/builder").is_ok());
        assert!(check_reserved("/").is_ok());
    }

    #[test]
    fn dry_rendering_quotes_arguments() {
        let args = vec![
            "run".to_string(),
            "--env=GREETING=hello world".to_string(),
            "--volume=/a:/b".to_string(),
            "it's".to_string(),
        ];
        assert_eq!(
            render_dry("docker", &args),
            r#"docker run '--env=GREETING=hello world' --volume=/a:/b 'it'"'"'s'"#
        );
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("$HOME"), "'$HOME'");
    }

    #[test]
    fn split_command_follows_shell_words() {
        assert_eq!(
            split_command(r#"bash -lc 'echo $HOME' "a \"b\"" c\ d"#).expect("split"),
            vec!["bash", "-lc", "echo $HOME", r#"a "b""#, "c d"]
        );
        assert_eq!(split_command("  ").expect("split"), Vec::<String>::new());
        assert_eq!(split_command("''").expect("split"), vec![""]);
    }

    #[test]
    fn split_command_rejects_unterminated_quotes() {
        assert!(split_command("echo 'oops").is_err());
        assert!(split_command("echo \"oops").is_err());
        assert!(split_command("echo \\").is_err());
    }
}
