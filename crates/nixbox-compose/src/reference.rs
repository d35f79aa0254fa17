//! Environment reference parsing.
//!
//! A reference points at one environment-definition source:
//!
//! | Form                                   | Kind     |
//! |----------------------------------------|----------|
//! | `./dir`, `/abs/dir`, `path:dir`        | local    |
//! | `@name[/path][#selector]`              | alias    |
//! | `github:owner/repo?dir=sub#selector`   | remote   |
//!
//! Local paths are normalized lexically to an absolute form against a base
//! directory. Selectors are not checked for existence; the environment
//! builder does that when it evaluates the generated flake.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use nixbox_common::constants::{DEFAULT_SHELL_ATTR, DEVSHELLS_PREFIX};
use nixbox_common::error::{NixboxError, Result};
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::recognize,
    sequence::preceded,
};

/// Query parameter naming a subdirectory of a remote source.
const SUBDIR_PARAM: &str = "dir";

/// Which grammar a reference matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// A filesystem path on this machine.
    Local,
    /// An `@name` entry in the registry table, not yet resolved.
    Alias,
    /// A scheme-qualified locator fetched by the retrieval collaborator.
    Remote,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Alias => write!(f, "alias"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// A parsed, immutable environment reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    kind: ReferenceKind,
    location: String,
    subdir: Option<String>,
    shell_selector: Option<String>,
    raw: String,
}

impl Reference {
    /// Parses a reference string, resolving relative local paths against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::InvalidReference` if the string is empty, has an
    /// empty selector, an empty alias name, or a remote scheme with no locator.
    pub fn parse(raw: &str, base_dir: &Path) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(invalid(raw, "reference is empty"));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(invalid(raw, "reference contains control characters"));
        }

        let (body, shell_selector) = split_selector(trimmed).map_err(|reason| invalid(raw, reason))?;

        if let Ok((path, name)) = alias_name(body) {
            return parse_alias(raw, name, path, shell_selector);
        }
        if body.starts_with('@') {
            return Err(invalid(raw, "alias name must be alphanumeric, '-', '_' or '.'"));
        }
        if let Ok((locator, scheme)) = remote_scheme(body) {
            return parse_remote(raw, scheme, locator, shell_selector);
        }

        let path = body.strip_prefix("path:").unwrap_or(body);
        if path.is_empty() {
            return Err(invalid(raw, "local path is empty"));
        }
        let location = normalize_path(Path::new(path), base_dir);
        Ok(Self {
            kind: ReferenceKind::Local,
            location: location.to_string_lossy().into_owned(),
            subdir: None,
            shell_selector,
            raw: raw.to_string(),
        })
    }

    /// Builds the concrete reference an alias stands for.
    ///
    /// `target` is the registry entry; this alias's path is appended to the
    /// target's subdirectory and this alias's selector (if any) replaces the
    /// target's. The result keeps this alias's raw string.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::InvalidReference` if `self` is not an alias or if
    /// `target` is itself an alias (alias resolution is single-step).
    pub fn with_alias_target(&self, target: &Self) -> Result<Self> {
        if self.kind != ReferenceKind::Alias {
            return Err(invalid(&self.raw, "not an alias reference"));
        }
        if target.kind == ReferenceKind::Alias {
            return Err(invalid(
                &self.raw,
                &format!("registry entry for @{} points at another alias ({})", self.location, target.raw),
            ));
        }

        let shell_selector = self.shell_selector.clone().or_else(|| target.shell_selector.clone());
        let resolved = match (target.kind, self.subdir.as_deref()) {
            (ReferenceKind::Local, Some(sub)) => Self {
                location: Path::new(&target.location).join(sub).to_string_lossy().into_owned(),
                ..target.clone()
            },
            (ReferenceKind::Remote, Some(sub)) => Self {
                subdir: Some(join_subdir(target.subdir.as_deref(), sub)),
                ..target.clone()
            },
            _ => target.clone(),
        };

        Ok(Self {
            shell_selector,
            raw: self.raw.clone(),
            ..resolved
        })
    }

    /// Grammar the reference matched.
    #[must_use]
    pub const fn kind(&self) -> ReferenceKind {
        self.kind
    }

    /// Absolute path (local), alias name (alias), or locator without the
    /// subdirectory parameter (remote).
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Subdirectory inside the source tree, if any.
    #[must_use]
    pub fn subdir(&self) -> Option<&str> {
        self.subdir.as_deref()
    }

    /// The `#selector` as written, if any.
    #[must_use]
    pub fn shell_selector(&self) -> Option<&str> {
        self.shell_selector.as_deref()
    }

    /// The string this reference was parsed from.
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Fully qualified shell attribute the selector designates.
    ///
    /// No selector selects `devShells.${system}.default`; a bare name `x`
    /// selects `devShells.${system}.x`; a dotted path is kept verbatim.
    #[must_use]
    pub fn shell_attr(&self) -> String {
        match self.shell_selector.as_deref() {
            None => DEFAULT_SHELL_ATTR.to_string(),
            Some(sel) if sel.starts_with(DEVSHELLS_PREFIX) || sel.contains('.') => sel.to_string(),
            Some(sel) => format!("{DEVSHELLS_PREFIX}${{system}}.{sel}"),
        }
    }

    /// Source locator in flake URL form, without the selector.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::InvalidReference` for unresolved aliases.
    pub fn flake_url(&self) -> Result<String> {
        match self.kind {
            ReferenceKind::Local => Ok(format!("path:{}", self.location)),
            ReferenceKind::Remote => Ok(match self.subdir.as_deref() {
                None => self.location.clone(),
                Some(sub) => {
                    let sep = if self.location.contains('?') { '&' } else { '?' };
                    format!("{}{sep}{SUBDIR_PARAM}={sub}", self.location)
                }
            }),
            ReferenceKind::Alias => Err(invalid(&self.raw, "alias has not been resolved")),
        }
    }

    /// Canonical identity string: equal for references that designate the
    /// same source and shell, whatever their raw spelling.
    #[must_use]
    pub fn canonical(&self) -> String {
        let base = match self.kind {
            ReferenceKind::Alias => match self.subdir.as_deref() {
                Some(sub) => format!("@{}/{sub}", self.location),
                None => format!("@{}", self.location),
            },
            ReferenceKind::Local | ReferenceKind::Remote => {
                self.flake_url().unwrap_or_else(|_| self.location.clone())
            }
        };
        format!("{base}#{}", self.shell_attr())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn invalid(raw: &str, reason: &str) -> NixboxError {
    NixboxError::InvalidReference {
        raw: raw.to_string(),
        reason: reason.to_string(),
    }
}

/// Splits `body#selector`. An empty selector after `#` is an error.
fn split_selector(input: &str) -> std::result::Result<(&str, Option<String>), &'static str> {
    match input.split_once('#') {
        None => Ok((input, None)),
        Some((_, "")) => Err("selector after '#' is empty"),
        Some((_, sel)) if sel.chars().any(char::is_whitespace) => Err("selector contains whitespace"),
        Some((body, sel)) => Ok((body, Some(sel.to_string()))),
    }
}

const fn is_alias_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

/// `@name`, leaving `/path` (or nothing) as the remainder.
fn alias_name(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_while1(is_alias_char)).parse(input)
}

/// Recognized remote-source scheme prefixes.
fn remote_scheme(input: &str) -> IResult<&str, &str> {
    recognize(alt((
        tag("github:"),
        tag("gitlab:"),
        tag("sourcehut:"),
        tag("git+https://"),
        tag("git+http://"),
        tag("git+ssh://"),
        tag("git+file://"),
        tag("git://"),
        tag("hg+https://"),
        tag("hg+http://"),
        tag("tarball+https://"),
        tag("tarball+http://"),
        tag("file+https://"),
        tag("file+http://"),
        tag("https://"),
        tag("http://"),
        tag("flake:"),
    )))
    .parse(input)
}

fn parse_alias(raw: &str, name: &str, rest: &str, shell_selector: Option<String>) -> Result<Reference> {
    let subdir = match rest {
        "" => None,
        _ => {
            let Some(path) = rest.strip_prefix('/') else {
                return Err(invalid(raw, "expected '/' after alias name"));
            };
            clean_subdir(path).map_err(|reason| invalid(raw, reason))?
        }
    };
    Ok(Reference {
        kind: ReferenceKind::Alias,
        location: name.to_string(),
        subdir,
        shell_selector,
        raw: raw.to_string(),
    })
}

fn parse_remote(raw: &str, scheme: &str, locator: &str, shell_selector: Option<String>) -> Result<Reference> {
    let (path, query) = locator.split_once('?').map_or((locator, None), |(p, q)| (p, Some(q)));
    if path.trim_matches('/').is_empty() {
        return Err(invalid(raw, "remote locator has nothing after the scheme"));
    }

    let mut subdir = None;
    let mut kept = Vec::new();
    for param in query.unwrap_or_default().split('&').filter(|p| !p.is_empty()) {
        match param.split_once('=') {
            Some((SUBDIR_PARAM, value)) => {
                subdir = clean_subdir(value).map_err(|reason| invalid(raw, reason))?;
            }
            _ => kept.push(param),
        }
    }

    let mut location = format!("{scheme}{path}");
    if !kept.is_empty() {
        location.push('?');
        location.push_str(&kept.join("&"));
    }
    Ok(Reference {
        kind: ReferenceKind::Remote,
        location,
        subdir,
        shell_selector,
        raw: raw.to_string(),
    })
}

/// Trims slashes and rejects `..` segments. Empty means "root".
fn clean_subdir(path: &str) -> std::result::Result<Option<String>, &'static str> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
    if segments.contains(&"..") {
        return Err("subdirectory may not contain '..'");
    }
    Ok((!segments.is_empty()).then(|| segments.join("/")))
}

fn join_subdir(base: Option<&str>, sub: &str) -> String {
    base.map_or_else(|| sub.to_string(), |b| format!("{b}/{sub}"))
}

/// Lexically normalizes `path` to an absolute path against `base_dir`
/// (no symlink resolution, `..` never climbs above the root).
fn normalize_path(path: &Path, base_dir: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let _ = out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
