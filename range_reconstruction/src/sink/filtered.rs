use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use clut_core::ParsedVersion;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{KeepFn, TargetFile, TargetSink};
use crate::error::{ReconstructionError, Result};

/// Discards everything written to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlackHoleFile;

#[async_trait::async_trait]
impl TargetFile for BlackHoleFile {
    async fn write_at(&self, _data: Bytes, _offset: u64) -> Result<()> {
        Ok(())
    }

    async fn truncate(&self) -> Result<()> {
        Ok(())
    }
}

/// Restricts another sink to the paths accepted by a predicate.
///
/// Files outside the predicate are opened as [`BlackHoleFile`]s and remembered, so a later run
/// can tell which files were never materialized.
pub struct FilteredSink<S> {
    inner: S,
    include: Box<KeepFn<'static>>,
    filtered: Mutex<BTreeSet<String>>,
}

impl<S: TargetSink> FilteredSink<S> {
    pub fn new(inner: S, include: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner,
            include: Box::new(include),
            filtered: Mutex::new(BTreeSet::new()),
        }
    }

    /// Seeds the filtered set, typically from the ledger of a previous run.
    pub fn with_filtered_files(self, files: impl IntoIterator<Item = String>) -> Self {
        self.lock_filtered().extend(files);
        self
    }

    pub fn includes(&self, path: &str) -> bool {
        (self.include)(path)
    }

    pub fn filtered_files(&self) -> BTreeSet<String> {
        self.lock_filtered().clone()
    }

    pub fn filtered_count(&self) -> usize {
        self.lock_filtered().len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn lock_filtered(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.filtered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl<S: TargetSink> TargetSink for FilteredSink<S> {
    async fn open_file(&self, path: &str) -> Result<Arc<dyn TargetFile>> {
        if self.includes(path) {
            return self.inner.open_file(path).await;
        }
        if self.lock_filtered().insert(path.to_owned()) {
            debug!(path, "Filtered out file");
        }
        Ok(Arc::new(BlackHoleFile))
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        self.inner.create_directory(path).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        if self.includes(path) {
            return self.inner.delete_file(path).await;
        }
        self.lock_filtered().remove(path);
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        self.inner.delete_directory(path).await
    }

    async fn delete_expansion(&self, expansion_id: u16, keep: &KeepFn<'_>) -> Result<()> {
        // Files outside the filter stay on disk; the ones the removal would have deleted are forgotten.
        let keep_filtered = |path: &str| {
            if self.includes(path) {
                return keep(path);
            }
            if !keep(path) {
                self.lock_filtered().remove(path);
            }
            true
        };
        self.inner.delete_expansion(expansion_id, &keep_filtered).await
    }
}

/// The set of files a filtered install skipped, persisted next to the install together with the
/// version the install is at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilteredFileLedger {
    #[serde(default)]
    pub installed_version: Option<ParsedVersion>,
    pub files: BTreeSet<String>,
}

impl FilteredFileLedger {
    pub const FILE_NAME: &'static str = ".clut_filtered.json";

    pub fn new(files: BTreeSet<String>) -> Self {
        Self {
            installed_version: None,
            files,
        }
    }

    pub fn with_installed_version(self, version: ParsedVersion) -> Self {
        Self {
            installed_version: Some(version),
            ..self
        }
    }

    /// Loads the ledger from `dir`; a missing ledger is empty.
    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ReconstructionError::sink(Self::FILE_NAME, e)),
        };
        serde_json::from_slice(&contents).map_err(|e| ReconstructionError::sink(Self::FILE_NAME, e.into()))
    }

    /// Writes the ledger into `dir`, replacing any previous one.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| ReconstructionError::sink(Self::FILE_NAME, e.into()))?;
        let path = dir.join(Self::FILE_NAME);
        let staging = dir.join(format!("{}.tmp", Self::FILE_NAME));

        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| ReconstructionError::sink(Self::FILE_NAME, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| ReconstructionError::sink(Self::FILE_NAME, e))
    }
}
