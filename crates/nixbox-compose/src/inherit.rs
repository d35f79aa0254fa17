//! Single-level `extends` expansion.

use nixbox_common::error::Result;

use crate::document::LoadedSource;
use crate::reference::Reference;
use crate::registry::RegistryTable;

/// Ordered references for one root: its `extends` entries (parsed against
/// the root's directory and alias-resolved, in declared order) followed by
/// the root itself.
///
/// Extended sources' own `extends` are not consulted.
///
/// # Errors
///
/// Returns `NixboxError::InvalidReference` or
/// `NixboxError::UnknownRegistryAlias` for a bad `extends` entry.
pub fn resolution_order(root: &LoadedSource, registry: &RegistryTable) -> Result<Vec<Reference>> {
    let mut order = Vec::with_capacity(root.config.extends.len() + 1);
    for raw in &root.config.extends {
        let parsed = Reference::parse(raw, &root.root)?;
        let resolved = registry.resolve(&parsed)?;
        tracing::debug!(root = %root.reference, extends = %resolved, "inherited source");
        order.push(resolved);
    }
    order.push(root.reference.clone());
    Ok(order)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};

    use nixbox_common::error::NixboxError;

    use super::*;
    use crate::document::RawConfig;
    use crate::reference::ReferenceKind;

    fn root_with_extends(extends: &[&str]) -> LoadedSource {
        LoadedSource {
            reference: Reference::parse("/work/app", Path::new("/")).expect("reference"),
            root: PathBuf::from("/work/app"),
            document: None,
            config: RawConfig {
                extends: extends.iter().map(ToString::to_string).collect(),
                ..RawConfig::default()
            },
        }
    }

    fn registry() -> RegistryTable {
        let mut builder = RegistryTable::builder(Path::new("/"));
        let entries: BTreeMap<String, String> = [
            ("a".to_string(), "github:acme/a".to_string()),
            ("b".to_string(), "/srv/b".to_string()),
        ]
        .into_iter()
        .collect();
        builder.overlay(&entries, Path::new("/"));
        builder.build()
    }

    #[test]
    fn no_extends_is_just_root() {
        let root = root_with_extends(&[]);
        let order = resolution_order(&root, &registry()).expect("order");
        assert_eq!(order, vec![root.reference]);
    }

    #[test]
    fn extends_precede_root_in_declared_order() {
        let root = root_with_extends(&["@a", "@b", "../shared"]);
        let order = resolution_order(&root, &registry()).expect("order");
        let locations: Vec<&str> = order.iter().map(Reference::location).collect();
        assert_eq!(locations, vec!["github:acme/a", "/srv/b", "/work/shared", "/work/app"]);
        assert_eq!(order[0].kind(), ReferenceKind::Remote);
        assert_eq!(order[0].raw(), "@a");
    }

    #[test]
    fn unknown_alias_in_extends_fails() {
        let root = root_with_extends(&["@nope"]);
        assert!(matches!(
            resolution_order(&root, &registry()),
            Err(NixboxError::UnknownRegistryAlias { .. })
        ));
    }
}
