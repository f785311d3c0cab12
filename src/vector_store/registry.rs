
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const REGISTRY_FILE_NAME: &str = "indexed_documents.json";
pub const PENDING_MARKER_FILE_NAME: &str = "indexed_documents.pending";

/// JSON side-file listing the names of the documents present in the index.
///
/// A marker file is written before every index mutation and removed once the
/// registry has been rewritten, so a crash in between leaves evidence that
/// the registry may not match the table.
#[derive(Debug, Clone)]
pub struct DocumentRegistry {
    dir: PathBuf,
}

impl DocumentRegistry {
    #[inline]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    #[inline]
    pub fn path(&self) -> PathBuf {
        self.dir.join(REGISTRY_FILE_NAME)
    }

    #[inline]
    pub fn marker_path(&self) -> PathBuf {
        self.dir.join(PENDING_MARKER_FILE_NAME)
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    /// Names recorded in the registry; empty when the file is absent or
    /// unreadable
    #[inline]
    pub fn load(&self) -> BTreeSet<String> {
        match self.try_load() {
            Ok(names) => names,
            Err(e) => {
                warn!("Error reading document registry: {:#}", e);
                BTreeSet::new()
            }
        }
    }

    /// Names recorded in the registry. An absent file is an empty set, an
    /// unreadable one is an error.
    #[inline]
    pub fn try_load(&self) -> Result<BTreeSet<String>> {
        self.warn_if_pending();

        let path = self.path();
        if !path.exists() {
            return Ok(BTreeSet::new());
        }

        let names = read_names(&path)?;
        debug!("Registry lists {} document(s)", names.len());
        Ok(names)
    }

    /// Replace the registry contents with `names`, sorted
    #[inline]
    pub fn save(&self, names: &BTreeSet<String>) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create registry directory {}", self.dir.display())
        })?;

        let sorted: Vec<&String> = names.iter().collect();
        let json = serde_json::to_string_pretty(&sorted).context("Failed to serialize registry")?;

        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write registry {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace registry {}", path.display()))?;

        debug!("Saved registry with {} document(s)", names.len());
        Ok(())
    }

    /// Record that an index mutation is about to start
    #[inline]
    pub fn begin_mutation(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create registry directory {}", self.dir.display())
        })?;
        let stamp = chrono::Utc::now().to_rfc3339();
        fs::write(self.marker_path(), stamp).context("Failed to write pending marker")?;
        Ok(())
    }

    /// Clear the marker left by [`Self::begin_mutation`]
    #[inline]
    pub fn finish_mutation(&self) -> Result<()> {
        let marker = self.marker_path();
        if marker.exists() {
            fs::remove_file(&marker).context("Failed to remove pending marker")?;
        }
        Ok(())
    }

    /// Whether an earlier mutation never completed
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.marker_path().exists()
    }

    fn warn_if_pending(&self) {
        if self.is_pending() {
            warn!(
                "An earlier index update did not finish; the document registry in {} may be out of date. Rebuilding the index is advisable.",
                self.dir.display()
            );
        }
    }
}

fn read_names(path: &Path) -> Result<BTreeSet<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let names: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(names.into_iter().collect())
}
