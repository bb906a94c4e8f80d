use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use clut_config::{SinkConfig, clut_config};
use clut_core::operations::expansion_directories;
use tokio::sync::Mutex;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, info, warn};

use super::{KeepFn, TargetFile, TargetSink};
use crate::error::{ReconstructionError, Result};

/// Open handles by path, closing the least recently used one once `capacity` is reached.
///
/// A handle leaving the cache is closed when its last in-flight writer drops it.
struct HandleCache {
    handles: HashMap<String, (Arc<FileSystemFile>, u64)>,
    tick: u64,
    capacity: usize,
}

impl HandleCache {
    fn new(capacity: usize) -> Self {
        Self {
            handles: HashMap::new(),
            tick: 0,
            capacity: capacity.max(1),
        }
    }

    fn get(&mut self, path: &str) -> Option<Arc<FileSystemFile>> {
        self.tick += 1;
        let tick = self.tick;
        self.handles.get_mut(path).map(|(handle, used)| {
            *used = tick;
            handle.clone()
        })
    }

    fn insert(&mut self, path: String, handle: Arc<FileSystemFile>) {
        if self.handles.len() >= self.capacity
            && let Some(oldest) = self.handles.iter().min_by_key(|(_, (_, used))| *used).map(|(p, _)| p.clone())
        {
            self.handles.remove(&oldest);
            debug!(path = %oldest, "Closed least recently used target file");
        }
        self.tick += 1;
        self.handles.insert(path, (handle, self.tick));
    }

    fn remove(&mut self, path: &str) {
        self.handles.remove(path);
    }

    fn len(&self) -> usize {
        self.handles.len()
    }
}

/// Writes reconstructed files below a root directory.
///
/// Open handles are cached per path up to `max_open_files`; writes go through positioned I/O on the
/// blocking pool so concurrent writers never share a cursor.
pub struct FileSystemSink {
    root: PathBuf,
    handles: Mutex<HandleCache>,
    open_attempts: usize,
    open_retry_delay: Duration,
    write_attempts: usize,
    write_retry_delay: Duration,
}

impl FileSystemSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let config = clut_config();
        Self {
            root: root.into(),
            handles: Mutex::new(HandleCache::new(config.sink.max_open_files)),
            open_attempts: config.sink.open_attempts,
            open_retry_delay: config.sink.open_retry_delay,
            write_attempts: config.sink.write_attempts,
            write_retry_delay: config.sink.write_retry_delay,
        }
    }

    pub fn with_config(self, config: impl AsRef<SinkConfig>) -> Self {
        let config = config.as_ref();
        Self {
            handles: Mutex::new(HandleCache::new(config.max_open_files)),
            open_attempts: config.open_attempts,
            open_retry_delay: config.open_retry_delay,
            write_attempts: config.write_attempts,
            write_retry_delay: config.write_retry_delay,
            ..self
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files currently held open.
    pub async fn open_handle_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Maps a sink path onto the filesystem. Absolute paths and `..` are rejected so nothing is
    /// written outside the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(ReconstructionError::sink(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path leaves the sink root"),
            ));
        }
        Ok(self.root.join(relative))
    }

    async fn open_with_retry(&self, path: &str, full_path: &Path) -> Result<File> {
        retry_io(
            path,
            "file open",
            self.open_attempts,
            self.open_retry_delay,
            |e| e.kind() != io::ErrorKind::InvalidInput,
            || async move {
                let file = tokio::fs::OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(false)
                    .open(full_path)
                    .await?;
                Ok(file.into_std().await)
            },
        )
        .await
        .map_err(|e| ReconstructionError::sink(path, e))
    }
}

/// Runs `op` until it succeeds, fails with an error `retryable` rejects, or `attempts` are used up.
async fn retry_io<T, F, Fut>(
    path: &str,
    action: &'static str,
    attempts: usize,
    delay: Duration,
    retryable: fn(&io::Error) -> bool,
    mut op: F,
) -> io::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    let mut attempt = 0usize;
    let strategy = FixedInterval::new(delay).take(attempts.saturating_sub(1));

    RetryIf::spawn(
        strategy,
        || {
            attempt += 1;
            if attempt > 1 {
                warn!(path, attempt, "Retrying {action}");
            }
            op()
        },
        retryable,
    )
    .await
}

/// Errors a positioned write may recover from.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::ResourceBusy
    )
}

#[async_trait::async_trait]
impl TargetSink for FileSystemSink {
    async fn open_file(&self, path: &str) -> Result<Arc<dyn TargetFile>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(path) {
            return Ok(handle);
        }

        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ReconstructionError::sink(path, e))?;
        }

        let file = self.open_with_retry(path, &full_path).await?;
        debug!(path, "Opened target file");

        let handle = Arc::new(FileSystemFile {
            path: path.to_owned(),
            file: Arc::new(file),
            write_attempts: self.write_attempts,
            write_retry_delay: self.write_retry_delay,
        });
        handles.insert(path.to_owned(), handle.clone());
        Ok(handle)
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path)?;
        tokio::fs::create_dir_all(&full_path)
            .await
            .map_err(|e| ReconstructionError::sink(path, e))
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path)?;
        self.handles.lock().await.remove(path);

        match tokio::fs::remove_file(&full_path).await {
            Ok(()) => {
                debug!(path, "Deleted file");
                Ok(())
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReconstructionError::sink(path, e)),
        }
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path)?;
        match tokio::fs::remove_dir(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReconstructionError::sink(path, e)),
        }
    }

    async fn delete_expansion(&self, expansion_id: u16, keep: &KeepFn<'_>) -> Result<()> {
        let mut removed = 0usize;
        let mut kept = 0usize;

        for dir in expansion_directories(expansion_id) {
            let full_path = self.resolve(&dir)?;
            let mut entries = match tokio::fs::read_dir(&full_path).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(ReconstructionError::sink(dir, e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| ReconstructionError::sink(&dir, e))? {
                let file_type = entry.file_type().await.map_err(|e| ReconstructionError::sink(&dir, e))?;
                if !file_type.is_file() {
                    continue;
                }
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    warn!(dir = %dir, name = ?entry.file_name(), "Skipping file with a non UTF-8 name");
                    continue;
                };

                let relative = format!("{dir}/{name}");
                if keep(&relative) {
                    kept += 1;
                    continue;
                }
                self.delete_file(&relative).await?;
                removed += 1;
            }
        }

        info!(expansion_id, removed, kept, "Removed expansion files");
        Ok(())
    }
}

struct FileSystemFile {
    path: String,
    file: Arc<File>,
    write_attempts: usize,
    write_retry_delay: Duration,
}

#[async_trait::async_trait]
impl TargetFile for FileSystemFile {
    async fn write_at(&self, data: Bytes, offset: u64) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        retry_io(&self.path, "write", self.write_attempts, self.write_retry_delay, is_transient, || {
            let file = self.file.clone();
            let data = data.clone();
            async move {
                tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
                    .await
                    .map_err(io::Error::other)?
            }
        })
        .await
        .map_err(|e| ReconstructionError::sink(&self.path, e))
    }

    async fn truncate(&self) -> Result<()> {
        let file = self.file.clone();
        tokio::task::spawn_blocking(move || file.set_len(0))
            .await?
            .map_err(|e| ReconstructionError::sink(&self.path, e))
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let written = file.seek_write(data, offset)?;
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        data = &data[written..];
        offset += written as u64;
    }
    Ok(())
}
