//! Local artifact catalog.
//!
//! Records which fingerprint each built image was produced from, so an
//! unchanged configuration reuses its image instead of rebuilding.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nixbox_common::error::{NixboxError, Result};
use nixbox_common::types::{Fingerprint, ImageRef};
use nixbox_compose::fingerprint::ArtifactIndex;
use serde::{Deserialize, Serialize};

use crate::backend::ContainerRuntime;

/// One built image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Fingerprint of the inputs the image was built from.
    pub fingerprint: Fingerprint,
    /// Image the artifact was loaded as.
    pub image: ImageRef,
    /// Canonical references in resolution order.
    pub sources: Vec<String>,
    /// Build completion time.
    pub built_at: DateTime<Utc>,
}

/// Artifact catalog backed by a JSON file.
#[derive(Debug)]
pub struct ArtifactCatalog {
    catalog_path: PathBuf,
}

impl ArtifactCatalog {
    /// Opens or creates the catalog under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog directory cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let catalog_path = data_dir.join("images").join("catalog.json");
        if let Some(parent) = catalog_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NixboxError::io(parent, e))?;
        }
        Ok(Self { catalog_path })
    }

    /// Lists all recorded artifacts.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<CatalogEntry>> {
        if !self.catalog_path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(&self.catalog_path).map_err(|e| NixboxError::io(&self.catalog_path, e))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// The entry recorded for `image`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn lookup(&self, image: &ImageRef) -> Result<Option<CatalogEntry>> {
        Ok(self.list()?.into_iter().find(|e| &e.image == image))
    }

    /// Records a freshly built artifact. A previous entry for the same image
    /// is replaced, since loading the new archive retagged it.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read or written.
    pub fn record(&self, entry: CatalogEntry) -> Result<()> {
        let mut entries = self.list()?;
        entries.retain(|e| e.image != entry.image);
        tracing::debug!(image = %entry.image, fingerprint = entry.fingerprint.short(), "recording artifact");
        entries.push(entry);
        self.write_entries(&entries)
    }

    fn write_entries(&self, entries: &[CatalogEntry]) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.catalog_path, json).map_err(|e| NixboxError::io(&self.catalog_path, e))
    }
}

/// Artifact lookup for one target image: the catalog must map the image to
/// the fingerprint and the runtime must still have it.
pub struct ImageIndex<'a> {
    catalog: &'a ArtifactCatalog,
    runtime: &'a dyn ContainerRuntime,
    image: &'a ImageRef,
}

impl<'a> ImageIndex<'a> {
    /// Creates an index for `image`.
    #[must_use]
    pub fn new(catalog: &'a ArtifactCatalog, runtime: &'a dyn ContainerRuntime, image: &'a ImageRef) -> Self {
        Self { catalog, runtime, image }
    }
}

impl ArtifactIndex for ImageIndex<'_> {
    fn has_artifact(&self, fingerprint: &Fingerprint) -> Result<bool> {
        let recorded = self
            .catalog
            .lookup(self.image)?
            .is_some_and(|e| &e.fingerprint == fingerprint);
        if !recorded {
            return Ok(false);
        }
        let present = self.runtime.image_exists(self.image)?;
        if !present {
            tracing::info!(image = %self.image, "catalogued image missing from runtime");
        }
        Ok(present)
    }
}
