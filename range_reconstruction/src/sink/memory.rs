use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use clut_core::operations::expansion_directories;

use super::{KeepFn, TargetFile, TargetSink};
use crate::error::Result;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// A file held in memory.
#[derive(Default)]
pub struct MemoryFile {
    data: Mutex<Vec<u8>>,
    writes: AtomicUsize,
}

impl MemoryFile {
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.data).clone()
    }

    /// Number of `write_at` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl TargetFile for MemoryFile {
    async fn write_at(&self, data: Bytes, offset: u64) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let offset = offset as usize;
        let mut contents = lock(&self.data);
        if contents.len() < offset + data.len() {
            contents.resize(offset + data.len(), 0);
        }
        contents[offset..offset + data.len()].copy_from_slice(&data);
        Ok(())
    }

    async fn truncate(&self) -> Result<()> {
        lock(&self.data).clear();
        Ok(())
    }
}

/// An in-memory file tree, mostly for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<BTreeMap<String, Arc<MemoryFile>>>,
    directories: Mutex<BTreeSet<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&self, path: &str, contents: Vec<u8>) {
        let file = MemoryFile {
            data: Mutex::new(contents),
            writes: AtomicUsize::new(0),
        };
        lock(&self.files).insert(path.to_owned(), Arc::new(file));
    }

    pub fn file(&self, path: &str) -> Option<Arc<MemoryFile>> {
        lock(&self.files).get(path).cloned()
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        self.file(path).map(|f| f.contents())
    }

    pub fn file_paths(&self) -> Vec<String> {
        lock(&self.files).keys().cloned().collect()
    }

    pub fn directories(&self) -> BTreeSet<String> {
        lock(&self.directories).clone()
    }

    /// Total `write_at` calls across all files.
    pub fn write_count(&self) -> usize {
        lock(&self.files).values().map(|f| f.write_count()).sum()
    }
}

#[async_trait::async_trait]
impl TargetSink for MemorySink {
    async fn open_file(&self, path: &str) -> Result<Arc<dyn TargetFile>> {
        let file = lock(&self.files).entry(path.to_owned()).or_default().clone();
        Ok(file)
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        lock(&self.directories).insert(path.to_owned());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        lock(&self.files).remove(path);
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        lock(&self.directories).remove(path);
        Ok(())
    }

    async fn delete_expansion(&self, expansion_id: u16, keep: &KeepFn<'_>) -> Result<()> {
        let dirs: Vec<String> = expansion_directories(expansion_id)
            .into_iter()
            .map(|dir| format!("{dir}/"))
            .collect();

        lock(&self.files).retain(|path, _| {
            let in_expansion = dirs
                .iter()
                .any(|dir| path.strip_prefix(dir.as_str()).is_some_and(|name| !name.contains('/')));
            !in_expansion || keep(path)
        });
        Ok(())
    }
}
