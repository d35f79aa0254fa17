//! Resolution pipeline: references in, ordered sources and merged config out.
//!
//! 1. Parse every root reference (all syntax errors surface before any fetch).
//! 2. Load the non-alias roots and overlay their `registry` blocks.
//! 3. Resolve and load alias roots, overlay theirs, and freeze the table.
//! 4. Expand each root's `extends`, concatenate in root order, drop repeats.
//! 5. Load the remaining sources, fetching remote ones concurrently.
//! 6. Fold the documents in resolution order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use nixbox_common::error::{NixboxError, Result};

use crate::document::{LoadedSource, MergedConfig, SourceFetcher, SourceLoader};
use crate::inherit::resolution_order;
use crate::merge::merge;
use crate::reference::{Reference, ReferenceKind};
use crate::registry::{RegistryBuilder, RegistryTable};

/// Output of a successful resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Resolved references in fold order.
    pub references: Vec<Reference>,
    /// One loaded document per reference, same order.
    pub sources: Vec<LoadedSource>,
    /// Frozen merge result, not yet expanded.
    pub merged: MergedConfig,
    /// The frozen registry table used for alias resolution.
    pub registry: RegistryTable,
}

/// Drives references through registry, inheritance, loading, and merge.
pub struct Resolver<'a> {
    fetcher: &'a dyn SourceFetcher,
    user_registry: BTreeMap<String, String>,
    user_registry_dir: PathBuf,
}

impl fmt::Debug for Resolver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("user_registry", &self.user_registry)
            .finish_non_exhaustive()
    }
}

impl<'a> Resolver<'a> {
    /// Creates a resolver fetching remote sources through `fetcher`.
    #[must_use]
    pub fn new(fetcher: &'a dyn SourceFetcher) -> Self {
        Self {
            fetcher,
            user_registry: BTreeMap::new(),
            user_registry_dir: PathBuf::from("/"),
        }
    }

    /// Adds user-level registry entries; relative local targets resolve against `dir`.
    #[must_use]
    pub fn with_user_registry(mut self, entries: BTreeMap<String, String>, dir: impl Into<PathBuf>) -> Self {
        self.user_registry = entries;
        self.user_registry_dir = dir.into();
        self
    }

    /// Resolves `roots` (CLI order) against `base_dir`. No roots means `.`.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidReference`, `UnknownRegistryAlias`,
    /// `FetchFailure`, or `ConfigParse` error encountered. Nothing is built or
    /// run when resolution fails.
    pub fn resolve(&self, roots: &[String], base_dir: &Path) -> Result<Resolution> {
        let default_root = [".".to_string()];
        let roots = if roots.is_empty() { &default_root[..] } else { roots };
        let parsed = roots
            .iter()
            .map(|raw| Reference::parse(raw, base_dir))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(roots = parsed.len(), "resolving environment sources");

        let loader = SourceLoader::new(self.fetcher);
        let mut registry = RegistryTable::builder(base_dir).with_user_entries(&self.user_registry, &self.user_registry_dir);

        let concrete: Vec<Reference> = parsed.iter().filter(|r| r.kind() != ReferenceKind::Alias).cloned().collect();
        let mut loaded_roots: HashMap<String, LoadedSource> = HashMap::new();
        for source in load_all(&loader, &concrete)? {
            overlay(&mut registry, &source);
            let _ = loaded_roots.insert(source.reference.canonical(), source);
        }

        // Alias roots resolve against the table before their own overlays apply.
        let preliminary = registry.clone().build();
        let aliased = parsed
            .iter()
            .filter(|r| r.kind() == ReferenceKind::Alias)
            .map(|r| preliminary.resolve(r))
            .collect::<Result<Vec<_>>>()?;
        for source in load_all(&loader, &aliased)? {
            overlay(&mut registry, &source);
            let _ = loaded_roots.insert(source.reference.canonical(), source);
        }
        let registry = registry.build();
        tracing::debug!(aliases = registry.len(), "registry frozen");

        let root_refs = parsed
            .iter()
            .map(|r| preliminary.resolve(r))
            .collect::<Result<Vec<_>>>()?;
        let mut references = Vec::new();
        let mut seen = HashSet::new();
        for root_ref in &root_refs {
            let root = loaded_roots
                .get(&root_ref.canonical())
                .ok_or_else(|| NixboxError::Config {
                    message: format!("root {root_ref} was not loaded"),
                })?;
            for reference in resolution_order(root, &registry)? {
                if seen.insert(reference.canonical()) {
                    references.push(reference);
                } else {
                    tracing::debug!(reference = %reference, "source already in resolution order");
                }
            }
        }

        let pending: Vec<Reference> = references
            .iter()
            .filter(|r| !loaded_roots.contains_key(&r.canonical()))
            .cloned()
            .collect();
        let mut fetched: HashMap<String, LoadedSource> = load_all(&loader, &pending)?
            .into_iter()
            .map(|s| (s.reference.canonical(), s))
            .collect();

        let root_keys: HashSet<String> = root_refs.iter().map(Reference::canonical).collect();
        let mut sources = Vec::with_capacity(references.len());
        for reference in &references {
            let key = reference.canonical();
            let source = match fetched.remove(&key) {
                Some(source) => source,
                None => loaded_roots.get(&key).cloned().ok_or_else(|| NixboxError::Config {
                    message: format!("source {reference} was not loaded"),
                })?,
            };
            if !root_keys.contains(&key) {
                warn_ignored_fields(&source);
            }
            sources.push(source);
        }

        let layers: Vec<_> = sources.iter().map(|s| s.config.clone()).collect();
        let merged = merge(&layers);
        tracing::info!(sources = sources.len(), "merged environment configuration");
        Ok(Resolution {
            references,
            sources,
            merged,
            registry,
        })
    }
}

fn overlay(registry: &mut RegistryBuilder, source: &LoadedSource) {
    if !source.config.registry.is_empty() {
        tracing::debug!(source = %source.reference, entries = source.config.registry.len(), "registry overlay");
        registry.overlay(&source.config.registry, &source.root);
    }
}

fn warn_ignored_fields(source: &LoadedSource) {
    if !source.config.registry.is_empty() {
        tracing::warn!(source = %source.reference, "ignoring registry block of an extended source");
    }
    if !source.config.extends.is_empty() {
        tracing::warn!(source = %source.reference, "ignoring extends of an extended source (inheritance is single-level)");
    }
}

/// Loads documents for `references`, fetching remote ones concurrently.
/// Results come back in input order; the first failure in that order wins.
fn load_all(loader: &SourceLoader<'_>, references: &[Reference]) -> Result<Vec<LoadedSource>> {
    let remote = references.iter().filter(|r| r.kind() == ReferenceKind::Remote).count();
    if remote < 2 {
        return references.iter().map(|r| loader.load(r)).collect();
    }

    tracing::debug!(remote, "fetching remote sources concurrently");
    std::thread::scope(|scope| {
        let handles: Vec<_> = references
            .iter()
            .map(|reference| (reference, scope.spawn(move || loader.load(reference))))
            .collect();
        handles
            .into_iter()
            .map(|(reference, handle)| {
                handle.join().unwrap_or_else(|_| {
                    Err(NixboxError::FetchFailure {
                        reference: reference.raw().to_string(),
                        message: "loader thread panicked".into(),
                    })
                })
            })
            .collect()
    })
}
