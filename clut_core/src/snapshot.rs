use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::{debug, info};

use crate::error::{ClutError, Result};
use crate::extent_map::FileExtentMap;
use crate::interval::ByteInterval;
use crate::operations::{ApplyOperation, HEADER_SIZE, HeaderKind, expansion_directories, normalize_path, should_keep};
use crate::serialization::PlatformId;
use crate::version::ParsedVersion;

/// Which version and which patch bytes produced every byte of every file, as of `version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub repository: String,
    pub version: ParsedVersion,
    pub base_patch_url: Option<String>,
    pub platform: PlatformId,
    pub folders: BTreeSet<String>,
    pub files: BTreeMap<String, FileExtentMap>,
}

/// Counters reported when a version fold completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldSummary {
    pub operations: usize,
    pub intervals_inserted: usize,
    pub files_touched: usize,
    pub files_removed: usize,
}

impl Snapshot {
    /// An empty snapshot at [`ParsedVersion::EPOCH`].
    pub fn empty(repository: impl Into<String>, platform: PlatformId) -> Self {
        Self {
            repository: repository.into(),
            version: ParsedVersion::EPOCH,
            base_patch_url: None,
            platform,
            folders: BTreeSet::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn with_base_patch_url(self, url: impl Into<String>) -> Self {
        Self {
            base_patch_url: Some(url.into()),
            ..self
        }
    }

    /// Starts folding the operations of `version` into this snapshot.
    ///
    /// The returned guard holds the only mutable borrow of the snapshot until it is finished, so the
    /// operations of two versions cannot interleave.
    pub fn begin_fold(&mut self, version: ParsedVersion) -> Result<VersionFold<'_>> {
        if version <= self.version {
            return Err(ClutError::ValidationError(format!(
                "Cannot fold version {version} into a snapshot already at {}",
                self.version
            )));
        }

        Ok(VersionFold {
            snapshot: self,
            version,
            summary: FoldSummary::default(),
            touched: HashSet::new(),
        })
    }

    /// Rebuilds every file map from its own intervals and checks it.
    pub fn normalize(&mut self) -> Result<()> {
        for (path, map) in self.files.iter_mut() {
            let intervals = std::mem::take(map).into_intervals();
            *map = FileExtentMap::rebuild(intervals)
                .map_err(|e| ClutError::ValidationError(format!("File {path} is inconsistent: {e}")))?;
        }
        Ok(())
    }

    pub fn interval_count(&self) -> usize {
        self.files.values().map(|m| m.len()).sum()
    }
}

/// An in-progress fold of one version's operations. See [`Snapshot::begin_fold`].
pub struct VersionFold<'a> {
    snapshot: &'a mut Snapshot,
    version: ParsedVersion,
    summary: FoldSummary,
    touched: HashSet<String>,
}

impl VersionFold<'_> {
    pub fn version(&self) -> &ParsedVersion {
        &self.version
    }

    pub fn apply(&mut self, operation: &ApplyOperation) -> Result<()> {
        self.summary.operations += 1;
        let version = self.version.clone();

        match operation {
            ApplyOperation::AddDirectory { path } | ApplyOperation::MakeDirTree { path } => {
                self.snapshot.folders.insert(normalize_path(path));
            },
            ApplyOperation::DeleteDirectory { path } => {
                self.snapshot.folders.remove(&normalize_path(path));
            },
            ApplyOperation::WriteHeader { path, kind, blob_offset } => {
                let file_offset = match kind {
                    HeaderKind::Version => 0,
                    _ => HEADER_SIZE as u64,
                };
                let header = ByteInterval::raw_patch(version, *blob_offset, file_offset, HEADER_SIZE);
                self.insert(path, [header])?;
            },
            ApplyOperation::AddData {
                path,
                blob_offset,
                file_offset,
                length,
                delete_length,
            } => {
                let data = (*length > 0).then(|| ByteInterval::raw_patch(version.clone(), *blob_offset, *file_offset, *length));
                let zeros = (*delete_length > 0)
                    .then(|| ByteInterval::zero_fill(version, file_offset + *length as u64, *delete_length));
                self.insert(path, data.into_iter().chain(zeros))?;
            },
            ApplyOperation::DeleteData {
                path,
                file_offset,
                length,
            }
            | ApplyOperation::ExpandData {
                path,
                file_offset,
                length,
            } => {
                let (header, zeros) = ByteInterval::empty_block(version, *file_offset, *length)
                    .map_err(|e| ClutError::ValidationError(format!("{} in {path}: {e}", operation_name(operation))))?;
                self.insert(path, std::iter::once(header).chain(zeros))?;
            },
            ApplyOperation::AddFile {
                path,
                file_offset,
                blocks,
            } => {
                if *file_offset == 0 {
                    let key = normalize_path(path);
                    if let Some(map) = self.snapshot.files.get_mut(&key) {
                        info!(path = %key, blocks = map.len(), "Clearing file");
                        map.clear();
                    }
                }

                let mut offset = *file_offset;
                let mut intervals = Vec::with_capacity(blocks.len());
                for block in blocks {
                    intervals.push(match block.compressed_size {
                        Some(compressed_size) => ByteInterval::compressed_patch(
                            version.clone(),
                            block.blob_offset,
                            offset,
                            compressed_size,
                            block.data_size,
                        ),
                        None => ByteInterval::raw_patch(version.clone(), block.blob_offset, offset, block.data_size),
                    });
                    offset += block.data_size as u64;
                }
                self.insert(path, intervals)?;
            },
            ApplyOperation::DeleteFile { path } => {
                if self.snapshot.files.remove(&normalize_path(path)).is_some() {
                    self.summary.files_removed += 1;
                }
            },
            ApplyOperation::RemoveExpansion { expansion_id } => {
                for dir in expansion_directories(*expansion_id) {
                    let prefix = format!("{dir}/");
                    let before = self.snapshot.files.len();
                    self.snapshot
                        .files
                        .retain(|path, _| !path.starts_with(&prefix) || should_keep(path));
                    let removed = before - self.snapshot.files.len();
                    debug!(%dir, removed, "Removed expansion files");
                    self.summary.files_removed += removed;
                }
            },
        }
        Ok(())
    }

    fn insert(&mut self, path: &str, intervals: impl IntoIterator<Item = ByteInterval>) -> Result<()> {
        let key = normalize_path(path);
        let map = self.snapshot.files.entry(key.clone()).or_default();
        for interval in intervals {
            map.insert(interval)
                .map_err(|e| ClutError::ValidationError(format!("Cannot overlay interval on {key}: {e}")))?;
            self.summary.intervals_inserted += 1;
        }
        self.touched.insert(key);
        Ok(())
    }

    /// Stamps the snapshot with the folded version.
    pub fn finish(self) -> FoldSummary {
        self.snapshot.version = self.version;
        FoldSummary {
            files_touched: self.touched.len(),
            ..self.summary
        }
    }
}

fn operation_name(operation: &ApplyOperation) -> &'static str {
    match operation {
        ApplyOperation::DeleteData { .. } => "Delete data",
        ApplyOperation::ExpandData { .. } => "Expand data",
        _ => "Operation",
    }
}
