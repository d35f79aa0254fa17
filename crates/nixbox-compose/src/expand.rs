//! Environment variable expansion of configuration values.
//!
//! Only `volumes`, `tmpfs`, and `extra_args` are expanded, and only after the
//! merge is frozen. `$NAME` and `${NAME}` take the invoking environment's
//! value (empty when unset), `\$` yields a literal `$`, and a leading `~`
//! stands for the home directory.
//!
//! [`ShellExpander`] hands each value to a real shell so command substitution
//! (`$(cmd)`) works natively; [`EnvExpander`] is a self-contained variant that
//! never spawns a process and refuses command substitution.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

use nixbox_common::error::{NixboxError, Result};

use crate::document::MergedConfig;

/// Expands one configuration value.
pub trait CommandExpander: Send + Sync {
    /// Returns the expanded form of `input`.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::ExpansionFailure` carrying `input` unchanged.
    fn expand(&self, input: &str) -> Result<String>;
}

/// Expands the designated fields of a frozen merge result.
///
/// # Errors
///
/// Propagates the first `NixboxError::ExpansionFailure`.
pub fn expand_config(config: &MergedConfig, expander: &dyn CommandExpander) -> Result<MergedConfig> {
    let expand_all = |values: &[String]| -> Result<Vec<String>> {
        values.iter().map(|value| expander.expand(value)).collect()
    };
    let expanded = MergedConfig {
        volumes: expand_all(&config.volumes)?,
        tmpfs: expand_all(&config.tmpfs)?,
        extra_args: expand_all(&config.extra_args)?,
        ..config.clone()
    };
    tracing::debug!(
        volumes = expanded.volumes.len(),
        tmpfs = expanded.tmpfs.len(),
        extra_args = expanded.extra_args.len(),
        "expanded configuration values"
    );
    Ok(expanded)
}

/// Delegates expansion to `<shell> -c "printf '%s' <word>"`.
#[derive(Debug, Clone)]
pub struct ShellExpander {
    shell: PathBuf,
    envs: Vec<(OsString, OsString)>,
}

impl ShellExpander {
    /// Creates an expander running `shell`, inheriting the process environment.
    #[must_use]
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            envs: Vec::new(),
        }
    }

    /// Sets an extra variable in the shell's environment.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl CommandExpander for ShellExpander {
    fn expand(&self, input: &str) -> Result<String> {
        if !input.contains(['$', '~', '`', '\\']) {
            return Ok(input.to_string());
        }
        let script = format!("printf '%s' {}", shell_word(input));
        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(&script)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .output()
            .map_err(|e| failure(input, &format!("cannot run {}: {e}", self.shell.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(input, stderr.trim()));
        }
        String::from_utf8(output.stdout).map_err(|_| failure(input, "expansion produced invalid UTF-8"))
    }
}

/// Renders `input` as a single shell word that expands variables and
/// command substitutions but nothing else. `\$` becomes a quoted literal `$`;
/// a leading `~` or `~/` is left unquoted for tilde expansion.
fn shell_word(input: &str) -> String {
    if input == "~" {
        return input.to_string();
    }
    let (tilde, rest) = match input.strip_prefix("~/") {
        Some(rest) => ("~/", rest),
        None => ("", input),
    };

    let mut word = String::from(tilde);
    word.push('"');
    let mut chars = rest.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'$') => {
                let _ = chars.next();
                word.push_str("\"'$'\"");
            }
            '$' if chars.peek() == Some(&'(') => {
                word.push('$');
                copy_substitution(&mut chars, &mut word);
            }
            '\\' => word.push_str("\\\\"),
            '"' => word.push_str("\\\""),
            other => word.push(other),
        }
    }
    word.push('"');
    word
}

/// Copies a `( ... )` group verbatim, tracking nesting. Parentheses inside
/// quotes or after a backslash do not count.
fn copy_substitution(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, word: &mut String) {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in chars.by_ref() {
        word.push(c);
        if escaped {
            escaped = false;
            continue;
        }
        match (quote, c) {
            (Some('\''), '\'') | (Some('"'), '"') => quote = None,
            (Some('\''), _) => {}
            (_, '\\') => escaped = true,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return;
                }
            }
            (None, _) => {}
        }
    }
}

/// Self-contained expander over a variable lookup; no process is spawned.
pub struct EnvExpander<F> {
    lookup: F,
}

impl<F> std::fmt::Debug for EnvExpander<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvExpander").finish_non_exhaustive()
    }
}

impl<F> EnvExpander<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    /// Creates an expander that resolves names through `lookup`.
    pub const fn new(lookup: F) -> Self {
        Self { lookup }
    }
}

impl<F> CommandExpander for EnvExpander<F>
where
    F: Fn(&str) -> Option<String> + Send + Sync,
{
    fn expand(&self, input: &str) -> Result<String> {
        let mut out = String::with_capacity(input.len());
        let rest = match input.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => {
                out.push_str(&(self.lookup)("HOME").unwrap_or_default());
                rest
            }
            _ => input,
        };

        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' if chars.peek() == Some(&'$') => {
                    let _ = chars.next();
                    out.push('$');
                }
                '$' => match chars.peek() {
                    Some('(') => return Err(failure(input, "command substitution requires a shell expander")),
                    Some('{') => {
                        let _ = chars.next();
                        let mut name = String::new();
                        loop {
                            match chars.next() {
                                Some('}') => break,
                                Some(ch) => name.push(ch),
                                None => return Err(failure(input, "unterminated ${")),
                            }
                        }
                        if !is_var_name(&name) {
                            return Err(failure(input, &format!("bad substitution ${{{name}}}")));
                        }
                        out.push_str(&(self.lookup)(&name).unwrap_or_default());
                    }
                    Some(&ch) if ch == '_' || ch.is_ascii_alphabetic() => {
                        let mut name = String::new();
                        while let Some(&ch) = chars.peek() {
                            if ch == '_' || ch.is_ascii_alphanumeric() {
                                name.push(ch);
                                let _ = chars.next();
                            } else {
                                break;
                            }
                        }
                        out.push_str(&(self.lookup)(&name).unwrap_or_default());
                    }
                    _ => out.push('$'),
                },
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn failure(input: &str, message: &str) -> NixboxError {
    NixboxError::ExpansionFailure {
        input: input.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/dev".into()),
            "PROJECT" => Some("demo".into()),
            _ => None,
        }
    }

    fn sh() -> ShellExpander {
        ShellExpander::new("/bin/sh")
            .with_env("HOME", "/home/dev")
            .with_env("PROJECT", "demo")
    }

    #[test]
    fn env_expander_substitutes_both_forms() {
        let expander = EnvExpander::new(env);
        assert_eq!(expander.expand("$HOME/.cache:/cache").expect("expand"), "/home/dev/.cache:/cache");
        assert_eq!(expander.expand("/src/${PROJECT}_data").expect("expand"), "/src/demo_data");
    }

    #[test]
    fn env_expander_unset_is_empty() {
        let expander = EnvExpander::new(env);
        assert_eq!(expander.expand("/x/$NOPE/y").expect("expand"), "/x//y");
    }

    #[test]
    fn env_expander_escaped_dollar_is_literal() {
        let expander = EnvExpander::new(env);
        assert_eq!(expander.expand(r"--label=\$HOME").expect("expand"), "--label=$HOME");
        assert_eq!(expander.expand("cost: 5$").expect("expand"), "cost: 5$");
    }

    #[test]
    fn env_expander_tilde_prefix() {
        let expander = EnvExpander::new(env);
        assert_eq!(expander.expand("~/.ssh:/root/.ssh:ro").expect("expand"), "/home/dev/.ssh:/root/.ssh:ro");
        assert_eq!(expander.expand("~other/x").expect("expand"), "~other/x");
    }

    #[test]
    fn env_expander_refuses_command_substitution() {
        let err = EnvExpander::new(env).expand("$(id -u)").expect_err("no shell");
        assert!(matches!(err, NixboxError::ExpansionFailure { ref input, .. } if input == "$(id -u)"));
    }

    #[test]
    fn shell_word_quoting() {
        assert_eq!(shell_word(r"a\$b"), r#""a"'$'"b""#);
        assert_eq!(shell_word(r#"say "hi""#), r#""say \"hi\"""#);
        assert_eq!(shell_word("~/x"), r#"~/"x""#);
        assert_eq!(shell_word("$(id -u)"), r#""$(id -u)""#);
    }

    #[test]
    fn shell_word_skips_quoted_parens_in_substitution() {
        assert_eq!(shell_word(r#"$(echo ")")x"#), r#""$(echo ")")x""#);
        assert_eq!(shell_word("$(echo ')')x"), r#""$(echo ')')x""#);
        assert_eq!(shell_word(r"$(echo \))x"), r#""$(echo \))x""#);
    }

    #[test]
    fn shell_expander_substitutes_variables() {
        assert_eq!(sh().expand("$HOME/${PROJECT}").expect("expand"), "/home/dev/demo");
    }

    #[test]
    fn shell_expander_escape_and_unset() {
        let expander = sh();
        assert_eq!(expander.expand(r"\$HOME").expect("expand"), "$HOME");
        assert_eq!(expander.expand("[$NIXBOX_TEST_SURELY_UNSET]").expect("expand"), "[]");
    }

    #[test]
    fn shell_expander_keeps_spaces_and_quotes() {
        assert_eq!(sh().expand(r#"--label=a "b" c"#).expect("expand"), r#"--label=a "b" c"#);
    }

    #[test]
    fn shell_expander_runs_command_substitution() {
        assert_eq!(sh().expand("--name=$(echo box)").expect("expand"), "--name=box");
    }

    #[test]
    fn shell_expander_quoted_paren_stays_in_substitution() {
        assert_eq!(sh().expand(r#"$(echo ")")x"#).expect("expand"), ")x");
        assert_eq!(sh().expand("$(echo ')')x").expect("expand"), ")x");
    }

    #[test]
    fn shell_expander_tilde() {
        assert_eq!(sh().expand("~/.ssh").expect("expand"), "/home/dev/.ssh");
    }

    #[test]
    fn shell_expander_reports_syntax_errors() {
        let err = sh().expand("$(echo").expect_err("unterminated");
        assert!(matches!(err, NixboxError::ExpansionFailure { ref input, .. } if input == "$(echo"));
    }

    #[test]
    fn expand_config_touches_only_designated_fields() {
        let config = MergedConfig {
            volumes: vec!["$HOME/src:/src".into()],
            tmpfs: vec!["/tmp/$PROJECT".into()],
            extra_args: vec!["--hostname=$PROJECT".into()],
            env: vec!["HOME_COPY=$HOME".into()],
            ports: vec!["$PORT:80".into()],
            ..MergedConfig::default()
        };
        let expanded = expand_config(&config, &EnvExpander::new(env)).expect("expand");
        assert_eq!(expanded.volumes, vec!["/home/dev/src:/src"]);
        assert_eq!(expanded.tmpfs, vec!["/tmp/demo"]);
        assert_eq!(expanded.extra_args, vec!["--hostname=demo"]);
        assert_eq!(expanded.env, vec!["HOME_COPY=$HOME"]);
        assert_eq!(expanded.ports, vec!["$PORT:80"]);
    }
}
