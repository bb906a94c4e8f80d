use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::error::{ClutError, Result};
use crate::interval::ByteInterval;
use crate::operations::{expansion_of, should_keep};
use crate::snapshot::Snapshot;
use crate::version::ParsedVersion;

/// Everything that changed between two snapshots of the same repository.
///
/// `added_files` holds, per file, only the intervals written after `from_version`; for files that did not
/// exist before, all of them. `replaced_files` names the added files whose whole layout is new, so their old
/// contents can be discarded before writing.
///
/// `removed_expansions` names the expansions `from` had files of and `to` has none left of, keep-listed
/// files aside; their folders are cleared as a whole, which also takes files no snapshot tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub repository: String,
    pub base_patch_url: Option<String>,
    pub from_version: ParsedVersion,
    pub to_version: ParsedVersion,
    pub removed_folders: BTreeSet<String>,
    pub removed_files: BTreeSet<String>,
    pub added_folders: BTreeSet<String>,
    pub added_files: BTreeMap<String, Vec<ByteInterval>>,
    pub replaced_files: BTreeSet<String>,
    pub removed_expansions: BTreeSet<u16>,
}

impl SnapshotDiff {
    pub fn between(from: &Snapshot, to: &Snapshot) -> Result<Self> {
        if from.repository != to.repository {
            return Err(ClutError::ValidationError(format!(
                "Cannot diff snapshots of different repositories ({} and {})",
                from.repository, to.repository
            )));
        }
        if from.version >= to.version {
            return Err(ClutError::ValidationError(format!(
                "Target version {} is not newer than {}",
                to.version, from.version
            )));
        }

        let removed_folders = from.folders.difference(&to.folders).cloned().collect();
        let added_folders = to.folders.difference(&from.folders).cloned().collect();
        let removed_files = from
            .files
            .keys()
            .filter(|path| !to.files.contains_key(*path))
            .cloned()
            .collect();

        let removed_expansions = live_expansions(from)
            .difference(&live_expansions(to))
            .copied()
            .collect();

        let mut added_files = BTreeMap::new();
        let mut replaced_files = BTreeSet::new();
        for (path, map) in &to.files {
            if !from.files.contains_key(path) {
                added_files.insert(path.clone(), map.intervals().to_vec());
                replaced_files.insert(path.clone());
                continue;
            }

            let newer: Vec<_> = map.iter().filter(|i| i.version > from.version).cloned().collect();
            if newer.is_empty() {
                continue;
            }
            if newer.len() == map.len() {
                replaced_files.insert(path.clone());
            }
            added_files.insert(path.clone(), newer);
        }

        Ok(Self {
            repository: to.repository.clone(),
            base_patch_url: to.base_patch_url.clone().or_else(|| from.base_patch_url.clone()),
            from_version: from.version.clone(),
            to_version: to.version.clone(),
            removed_folders,
            removed_files,
            added_folders,
            added_files,
            replaced_files,
            removed_expansions,
        })
    }

    /// Diff against an empty snapshot of the same repository, i.e. a fresh install of `to`.
    pub fn from_empty(to: &Snapshot) -> Result<Self> {
        Self::between(&Snapshot::empty(to.repository.clone(), to.platform), to)
    }

    /// Drops added and removed files whose path the predicate rejects. Expansion removals are kept; the
    /// sink applying them decides which of their files it owns.
    pub fn retain_paths(&mut self, mut keep: impl FnMut(&str) -> bool) {
        self.added_files.retain(|path, _| keep(path));
        self.replaced_files.retain(|path| self.added_files.contains_key(path));
        self.removed_files.retain(|path| keep(path));
    }

    /// Bytes written to target files when the diff is applied.
    pub fn write_size(&self) -> u64 {
        self.added_files.values().flatten().map(|i| i.length as u64).sum()
    }

    /// Bytes fetched from patch artifacts, counting each distinct blob once.
    pub fn download_size(&self) -> u64 {
        let blobs: HashSet<_> = self
            .added_files
            .values()
            .flatten()
            .filter_map(|i| i.blob().map(|b| (&i.version, *b)))
            .collect();
        blobs.iter().map(|(_, b)| b.size as u64).sum()
    }

    pub fn interval_count(&self) -> usize {
        self.added_files.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.added_files.is_empty()
            && self.removed_files.is_empty()
            && self.added_folders.is_empty()
            && self.removed_folders.is_empty()
            && self.removed_expansions.is_empty()
    }
}

/// Expansions with at least one file an expansion removal would delete.
fn live_expansions(snapshot: &Snapshot) -> BTreeSet<u16> {
    snapshot
        .files
        .keys()
        .filter(|path| !should_keep(path))
        .filter_map(|path| expansion_of(path))
        .collect()
}
