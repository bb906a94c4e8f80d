//! Destinations for reconstructed files.
//!
//! A [`TargetSink`] owns a tree of files addressed by relative, `/`-separated paths. Intervals of
//! one file never overlap, so writes at different offsets of the same [`TargetFile`] may run
//! concurrently.

mod file_system;
mod filtered;
mod memory;

use std::sync::Arc;

use bytes::Bytes;
pub use file_system::FileSystemSink;
pub use filtered::{BlackHoleFile, FilteredFileLedger, FilteredSink};
pub use memory::{MemoryFile, MemorySink};

use crate::error::Result;

/// Path predicate: whether a file is included, or survives an expansion removal.
pub type KeepFn<'a> = dyn Fn(&str) -> bool + Send + Sync + 'a;

#[async_trait::async_trait]
pub trait TargetFile: Send + Sync {
    /// Writes all of `data` at `offset`, growing the file when needed.
    async fn write_at(&self, data: Bytes, offset: u64) -> Result<()>;

    /// Cuts the file to zero length.
    async fn truncate(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait TargetSink: Send + Sync {
    /// Opens `path` for positioned writes, creating it and its parent directories when missing.
    /// Repeated opens of the same path may share one handle.
    async fn open_file(&self, path: &str) -> Result<Arc<dyn TargetFile>>;

    async fn create_directory(&self, path: &str) -> Result<()>;

    /// Deleting a missing file succeeds.
    async fn delete_file(&self, path: &str) -> Result<()>;

    /// Deletes an empty directory; deleting a missing one succeeds.
    async fn delete_directory(&self, path: &str) -> Result<()>;

    /// Deletes the files directly inside each folder of `expansion_id` for which `keep` is false.
    async fn delete_expansion(&self, expansion_id: u16, keep: &KeepFn<'_>) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: TargetSink + ?Sized> TargetSink for Arc<T> {
    async fn open_file(&self, path: &str) -> Result<Arc<dyn TargetFile>> {
        (**self).open_file(path).await
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        (**self).create_directory(path).await
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        (**self).delete_file(path).await
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        (**self).delete_directory(path).await
    }

    async fn delete_expansion(&self, expansion_id: u16, keep: &KeepFn<'_>) -> Result<()> {
        (**self).delete_expansion(expansion_id, keep).await
    }
}
