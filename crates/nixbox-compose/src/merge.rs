//! Layered configuration merge.
//!
//! Documents are folded left to right, one policy per field:
//!
//! | Field                                              | Policy            |
//! |----------------------------------------------------|-------------------|
//! | `resources.*`, `logging.driver`, `user`            | override          |
//! | `security.read_only`, `security.no_new_privileges` | logical-or        |
//! | `ports`, `env`, `extra_args`, `cap_add`, `cap_drop`, `init.ensure_dirs` | concat-dedupe |
//! | `volumes` (container path), `tmpfs` (mount path)   | override-by-key   |
//! | `logging.options`                                  | override per key  |
//!
//! The fold is total and associative for a fixed order: folding
//! `[A, B, C]` gives the same result as folding `C` onto the fold of `[A, B]`.

use crate::document::{MergedConfig, RawConfig};

/// Extracts the identity of a keyed list entry.
pub type KeyFn = fn(&str) -> &str;

/// How a list field combines across layers. Scalars use [`override_scalar`]
/// and flags use [`logical_or`].
#[derive(Debug, Clone, Copy)]
pub enum MergePolicy {
    /// Union of all entries in order of first appearance.
    ConcatDedupe,
    /// Entries with equal keys replace the earlier one in place; new keys append.
    OverrideByKey(KeyFn),
}

impl MergePolicy {
    /// Policy for `volumes`.
    pub const VOLUMES: Self = Self::OverrideByKey(volume_key);
    /// Policy for `tmpfs`.
    pub const TMPFS: Self = Self::OverrideByKey(tmpfs_key);

    /// Folds `later` onto the list `acc`.
    pub fn list(self, acc: &mut Vec<String>, later: &[String]) {
        match self {
            Self::ConcatDedupe => {
                for entry in later {
                    if !acc.contains(entry) {
                        acc.push(entry.clone());
                    }
                }
            }
            Self::OverrideByKey(key) => {
                for entry in later {
                    let wanted = key(entry);
                    match acc.iter().position(|existing| key(existing) == wanted) {
                        Some(index) => {
                            if acc[index] != *entry {
                                tracing::debug!(key = wanted, from = %acc[index], to = %entry, "keyed entry overridden");
                            }
                            acc[index].clone_from(entry);
                        }
                        None => acc.push(entry.clone()),
                    }
                }
            }
        }
    }
}

/// Override: the last layer that sets the field wins; unset never clears.
pub fn override_scalar<T: Clone>(acc: &mut Option<T>, later: Option<&T>) {
    if let Some(value) = later {
        *acc = Some(value.clone());
    }
}

/// Logical-or: true once any layer sets it.
pub const fn logical_or(acc: &mut bool, later: bool) {
    *acc |= later;
}

/// Key of a `host:container[:opts]` volume: the container path.
/// A single-field entry (anonymous volume) is keyed by itself.
#[must_use]
pub fn volume_key(entry: &str) -> &str {
    let mut fields = entry.splitn(3, ':');
    let first = fields.next().unwrap_or(entry);
    fields.next().unwrap_or(first)
}

/// Key of a `path[:opts]` tmpfs entry: the mount path.
#[must_use]
pub fn tmpfs_key(entry: &str) -> &str {
    entry.split_once(':').map_or(entry, |(path, _)| path)
}

/// Folds documents in order into one runtime configuration.
#[must_use]
pub fn merge(layers: &[RawConfig]) -> MergedConfig {
    let mut merged = MergedConfig::default();
    for layer in layers {
        merge_into(&mut merged, layer);
    }
    merged
}

/// Folds a single document onto an existing accumulator.
pub fn merge_into(acc: &mut MergedConfig, layer: &RawConfig) {
    let union = MergePolicy::ConcatDedupe;

    logical_or(&mut acc.security.read_only, layer.security.read_only);
    logical_or(&mut acc.security.no_new_privileges, layer.security.no_new_privileges);
    union.list(&mut acc.security.cap_drop, &layer.security.cap_drop);
    union.list(&mut acc.security.cap_add, &layer.security.cap_add);

    override_scalar(&mut acc.resources.memory, layer.resources.memory.as_ref());
    override_scalar(&mut acc.resources.cpus, layer.resources.cpus.as_ref());
    override_scalar(&mut acc.resources.pids_limit, layer.resources.pids_limit.as_ref());

    override_scalar(&mut acc.logging.driver, layer.logging.driver.as_ref());
    for (key, value) in &layer.logging.options {
        let _ = acc.logging.options.insert(key.clone(), value.clone());
    }

    union.list(&mut acc.ports, &layer.ports);
    MergePolicy::VOLUMES.list(&mut acc.volumes, &layer.volumes);
    MergePolicy::TMPFS.list(&mut acc.tmpfs, &layer.tmpfs);
    union.list(&mut acc.env, &layer.env);
    union.list(&mut acc.extra_args, &layer.extra_args);

    override_scalar(&mut acc.user, layer.user.as_ref());
    union.list(&mut acc.init.ensure_dirs, &layer.init.ensure_dirs);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    fn layer(f: impl FnOnce(&mut RawConfig)) -> RawConfig {
        let mut config = RawConfig::default();
        f(&mut config);
        config
    }

    #[test]
    fn scalar_override_last_wins() {
        let a = layer(|c| c.resources.memory = Some("512m".into()));
        let b = layer(|c| c.resources.memory = Some("1g".into()));
        assert_eq!(merge(&[a, b]).resources.memory.as_deref(), Some("1g"));
    }

    #[test]
    fn unset_scalar_does_not_clear() {
        let a = layer(|c| c.user = Some("dev".into()));
        let b = RawConfig::default();
        assert_eq!(merge(&[a, b]).user.as_deref(), Some("dev"));
    }

    #[test]
    fn booleans_are_logical_or() {
        let a = layer(|c| c.security.read_only = true);
        let b = layer(|c| c.security.no_new_privileges = true);
        let merged = merge(&[a, b]);
        assert!(merged.security.read_only);
        assert!(merged.security.no_new_privileges);
    }

    #[test]
    fn ports_concat_dedupe_preserves_order() {
        let a = layer(|c| c.ports = strings(&["3000:3000"]));
        let b = layer(|c| c.ports = strings(&["3000:3000", "8080:8080"]));
        assert_eq!(merge(&[a, b]).ports, strings(&["3000:3000", "8080:8080"]));
    }

    #[test]
    fn volumes_keyed_by_container_path() {
        let a = layer(|c| c.volumes = strings(&["/data:/data"]));
        let b = layer(|c| c.volumes = strings(&["/data:/data:ro"]));
        assert_eq!(merge(&[a, b]).volumes, strings(&["/data:/data:ro"]));
    }

    #[test]
    fn volume_override_keeps_position() {
        let a = layer(|c| c.volumes = strings(&["/a:/one", "/b:/two"]));
        let b = layer(|c| c.volumes = strings(&["/other:/one", "/c:/three"]));
        assert_eq!(merge(&[a, b]).volumes, strings(&["/other:/one", "/b:/two", "/c:/three"]));
    }

    #[test]
    fn tmpfs_keyed_by_mount_path() {
        let a = layer(|c| c.tmpfs = strings(&["/tmp", "/run:size=8m"]));
        let b = layer(|c| c.tmpfs = strings(&["/tmp:size=64m"]));
        assert_eq!(merge(&[a, b]).tmpfs, strings(&["/tmp:size=64m", "/run:size=8m"]));
    }

    #[test]
    fn logging_options_merge_per_key() {
        let a = layer(|c| {
            c.logging.driver = Some("json-file".into());
            let _ = c.logging.options.insert("max-size".into(), "10m".into());
            let _ = c.logging.options.insert("max-file".into(), "3".into());
        });
        let b = layer(|c| {
            let _ = c.logging.options.insert("max-size".into(), "50m".into());
        });
        let merged = merge(&[a, b]);
        assert_eq!(merged.logging.driver.as_deref(), Some("json-file"));
        assert_eq!(merged.logging.options.get("max-size").map(String::as_str), Some("50m"));
        assert_eq!(merged.logging.options.get("max-file").map(String::as_str), Some("3"));
    }

    #[test]
    fn merge_of_nothing_is_empty() {
        assert_eq!(merge(&[]), MergedConfig::default());
    }

    #[test]
    fn fold_is_associative() {
        let a = layer(|c| {
            c.volumes = strings(&["/x:/data", "/y:/cache"]);
            c.ports = strings(&["1:1"]);
            c.resources.cpus = Some("1".into());
        });
        let b = layer(|c| {
            c.volumes = strings(&["/z:/data:ro"]);
            c.env = strings(&["A=1"]);
            c.security.read_only = true;
        });
        let c = layer(|c| {
            c.volumes = strings(&["/w:/cache", "/v:/extra"]);
            c.ports = strings(&["2:2", "1:1"]);
            c.resources.cpus = Some("2".into());
        });

        let all = merge(&[a.clone(), b.clone(), c.clone()]);
        let staged = merge(&[RawConfig::from(merge(&[a, b])), c]);
        assert_eq!(all, staged);
    }

    #[test]
    fn later_false_does_not_clear_flag() {
        let mut flag = false;
        logical_or(&mut flag, true);
        logical_or(&mut flag, false);
        assert!(flag);
    }

    #[test]
    fn list_policies_differ_on_repeated_keys() {
        let mut union = strings(&["/a:/data"]);
        MergePolicy::ConcatDedupe.list(&mut union, &strings(&["/b:/data"]));
        assert_eq!(union, strings(&["/a:/data", "/b:/data"]));

        let mut keyed = strings(&["/a:/data"]);
        MergePolicy::VOLUMES.list(&mut keyed, &strings(&["/b:/data"]));
        assert_eq!(keyed, strings(&["/b:/data"]));
    }

    #[test]
    fn key_extraction() {
        assert_eq!(volume_key("/h:/c:ro"), "/c");
        assert_eq!(volume_key("/c"), "/c");
        assert_eq!(tmpfs_key("/tmp:size=1m"), "/tmp");
        assert_eq!(tmpfs_key("/tmp"), "/tmp");
    }
}
