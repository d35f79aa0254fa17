//! Alias registry table.
//!
//! Maps `@name` aliases to reference strings. The table is seeded from the
//! built-in set, overlaid by user configuration and then by the `registry`
//! blocks of loaded root documents (in resolution order, last write wins),
//! and frozen before any alias is resolved.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nixbox_common::constants::BUILTIN_REGISTRY;
use nixbox_common::error::{NixboxError, Result};

use crate::reference::{Reference, ReferenceKind};

/// Where a registry entry came from. Later origins always win over earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EntryOrigin {
    /// Compiled-in default.
    Builtin,
    /// User configuration file.
    User,
    /// A `registry` block in a loaded document.
    Source,
}

#[derive(Debug, Clone)]
struct RegistryEntry {
    target: String,
    base_dir: PathBuf,
    origin: EntryOrigin,
}

/// Immutable alias table, constructed once per invocation.
#[derive(Debug, Clone)]
pub struct RegistryTable {
    entries: BTreeMap<String, RegistryEntry>,
}

impl RegistryTable {
    /// Starts a table seeded with the built-in aliases.
    #[must_use]
    pub fn builder(base_dir: &Path) -> RegistryBuilder {
        let mut builder = RegistryBuilder {
            entries: BTreeMap::new(),
        };
        for (name, target) in BUILTIN_REGISTRY {
            builder.insert(name, target, base_dir, EntryOrigin::Builtin);
        }
        builder
    }

    /// Resolves an alias reference to the concrete reference it designates.
    ///
    /// Non-alias references are returned unchanged. The registry target is
    /// parsed relative to the directory of the document that declared it and
    /// is not itself re-resolved as an alias.
    ///
    /// # Errors
    ///
    /// Returns `NixboxError::UnknownRegistryAlias` if the name has no entry,
    /// or `NixboxError::InvalidReference` if the entry is malformed or
    /// points at another alias.
    pub fn resolve(&self, reference: &Reference) -> Result<Reference> {
        if reference.kind() != ReferenceKind::Alias {
            return Ok(reference.clone());
        }
        let name = reference.location();
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| NixboxError::UnknownRegistryAlias {
                name: name.to_string(),
                raw: reference.raw().to_string(),
            })?;

        let target = Reference::parse(&entry.target, &entry.base_dir)?;
        let resolved = reference.with_alias_target(&target)?;
        tracing::debug!(alias = name, origin = ?entry.origin, resolved = %resolved, "resolved registry alias");
        Ok(resolved)
    }

    /// Number of registered aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no aliases.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Accumulates overlays before the table is frozen.
#[derive(Debug, Clone)]
pub struct RegistryBuilder {
    entries: BTreeMap<String, RegistryEntry>,
}

impl RegistryBuilder {
    /// Overlays user-configured aliases.
    #[must_use]
    pub fn with_user_entries(mut self, entries: &BTreeMap<String, String>, base_dir: &Path) -> Self {
        for (name, target) in entries {
            self.insert(name, target, base_dir, EntryOrigin::User);
        }
        self
    }

    /// Overlays a document's `registry` block. `base_dir` is the document's
    /// source root, used for relative local targets.
    pub fn overlay(&mut self, entries: &BTreeMap<String, String>, base_dir: &Path) {
        for (name, target) in entries {
            self.insert(name, target, base_dir, EntryOrigin::Source);
        }
    }

    fn insert(&mut self, name: &str, target: &str, base_dir: &Path, origin: EntryOrigin) {
        let name = name.strip_prefix('@').unwrap_or(name);
        if let Some(existing) = self.entries.get(name) {
            if existing.origin > origin {
                return;
            }
            tracing::debug!(alias = name, from = %existing.target, to = target, "registry entry overridden");
        }
        let _ = self.entries.insert(
            name.to_string(),
            RegistryEntry {
                target: target.to_string(),
                base_dir: base_dir.to_path_buf(),
                origin,
            },
        );
    }

    /// Freezes the table.
    #[must_use]
    pub fn build(self) -> RegistryTable {
        RegistryTable {
            entries: self.entries,
        }
    }
}
