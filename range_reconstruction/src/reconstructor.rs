use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use clut_config::{ReconstructionConfig, SinkConfig, clut_config};
use clut_core::operations::should_keep;
use clut_core::{ParsedVersion, SnapshotDiff};
use patch_client::{PatchSource, RangePart};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::apply::{apply_interval, decompress_blob};
use crate::error::{ErrorState, ReconstructionError, Result};
use crate::plan::{BlobKey, FetchPlan, IntervalRef, MergedRange, PlannedBlob, RangeBlob, RangeRequest, VersionPlan};
use crate::sink::TargetSink;

const MIB: f64 = (1u64 << 20) as f64;

/// Parts buffered between a fetch and the slicing of its blobs.
const PART_CHANNEL_CAPACITY: usize = 4;

/// Counts describing a finished reconstruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstructionSummary {
    pub local_intervals: usize,
    pub fetched_intervals: usize,
    pub distinct_blobs: usize,
    pub requests: usize,
    pub bytes_written: u64,
}

/// Materializes the added intervals of a [`SnapshotDiff`] into a [`TargetSink`].
///
/// Blobs are fetched once per distinct `(version, blob)` no matter how many intervals use them;
/// neighbouring blobs of a patch are merged into larger ranges and packed into multi-range
/// requests. Fetch tasks feed a bounded queue drained by a pool of apply tasks, and intervals that
/// need no network are applied while fetches are in flight.
pub struct RangeReconstructor {
    diff: SnapshotDiff,
    source: Arc<dyn PatchSource>,
    base_url: Option<String>,
    concurrency: Option<usize>,
    config: Arc<ReconstructionConfig>,
    sink_config: Arc<SinkConfig>,
    cancellation: CancellationToken,
}

impl RangeReconstructor {
    pub fn new(diff: SnapshotDiff, source: Arc<dyn PatchSource>) -> Self {
        let config = clut_config();
        Self {
            diff,
            source,
            base_url: None,
            concurrency: None,
            config: Arc::new(config.reconstruction.clone()),
            sink_config: Arc::new(config.sink.clone()),
            cancellation: CancellationToken::new(),
        }
    }

    /// Base URL of the patch artifacts, used when the diff does not carry one.
    pub fn with_base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..self
        }
    }

    /// Number of intervals applied concurrently; overrides `apply_concurrency`.
    pub fn with_concurrency(self, concurrency: usize) -> Self {
        Self {
            concurrency: Some(concurrency),
            ..self
        }
    }

    pub fn with_config(self, config: impl AsRef<ReconstructionConfig>) -> Self {
        Self {
            config: Arc::new(config.as_ref().clone()),
            ..self
        }
    }

    pub fn with_sink_config(self, config: impl AsRef<SinkConfig>) -> Self {
        Self {
            sink_config: Arc::new(config.as_ref().clone()),
            ..self
        }
    }

    pub fn with_cancellation_token(self, cancellation: CancellationToken) -> Self {
        Self { cancellation, ..self }
    }

    #[instrument(skip_all, fields(from = %self.diff.from_version, to = %self.diff.to_version))]
    pub async fn run(self, sink: Arc<dyn TargetSink>) -> Result<ReconstructionSummary> {
        info!(
            repository = %self.diff.repository,
            files = self.diff.added_files.len(),
            intervals = self.diff.interval_count(),
            "Starting reconstruction"
        );

        let result = self.run_inner(sink).await;

        match &result {
            Ok(summary) => info!(
                local = summary.local_intervals,
                fetched = summary.fetched_intervals,
                blobs = summary.distinct_blobs,
                requests = summary.requests,
                mib_written = format_args!("{:.2}", summary.bytes_written as f64 / MIB),
                "Reconstruction completed successfully"
            ),
            Err(e) => info!(error = %e, "Reconstruction failed"),
        }

        result
    }

    async fn run_inner(self, sink: Arc<dyn TargetSink>) -> Result<ReconstructionSummary> {
        let Self {
            diff,
            source,
            base_url,
            concurrency,
            config,
            sink_config,
            cancellation,
        } = self;

        let base_url = diff.base_patch_url.clone().or(base_url);
        let plan = FetchPlan::build(&diff.added_files, base_url.as_deref(), &config)?;

        let expected = diff.interval_count();
        let requests = plan.request_count();
        let distinct_blobs = plan.blobs.len();
        info!(
            local = plan.local.len(),
            fetched = plan.fetch_interval_count(),
            blobs = distinct_blobs,
            requests,
            mib_download = format_args!("{:.2}", plan.download_size() as f64 / MIB),
            "Planned reconstruction"
        );

        for path in &diff.replaced_files {
            if cancellation.is_cancelled() {
                return Err(ReconstructionError::Cancelled);
            }
            sink.open_file(path).await?.truncate().await?;
            debug!(path, "Truncated replaced file");
        }

        let FetchPlan {
            local,
            mut blobs,
            empty_blobs,
            versions,
        } = plan;
        let local_count = local.len();

        let error_state = Arc::new(ErrorState::new());
        let mut pool = ApplyPool {
            sink,
            semaphore: Arc::new(Semaphore::new(concurrency.unwrap_or(config.apply_concurrency).max(1))),
            tasks: JoinSet::new(),
            error_state: error_state.clone(),
            zeros: Bytes::from(vec![0u8; sink_config.wipe_buffer_size.as_usize().max(1)]),
            cancellation: cancellation.clone(),
            applied: 0,
            bytes_written: 0,
        };

        // Fetches stop when this function returns, whichever way it does.
        let fetch_cancellation = cancellation.child_token();
        let _fetch_guard = fetch_cancellation.clone().drop_guard();

        let (blob_tx, mut blob_rx) = mpsc::channel::<FetchedBlob>(config.apply_queue_capacity.max(1));
        let producer = tokio::spawn(produce(source, versions, blob_tx, fetch_cancellation));

        for key in empty_blobs {
            pool.apply_blob(&mut blobs, key, Bytes::new()).await?;
        }

        let mut local = local.into_iter();
        let mut producer_open = true;
        loop {
            error_state.check()?;
            if cancellation.is_cancelled() {
                return Err(ReconstructionError::Cancelled);
            }

            if producer_open {
                match blob_rx.try_recv() {
                    Ok(fetched) => {
                        pool.apply_blob(&mut blobs, fetched.key, fetched.data).await?;
                        continue;
                    },
                    Err(TryRecvError::Empty) => {},
                    Err(TryRecvError::Disconnected) => producer_open = false,
                }
            }

            if let Some(user) = local.next() {
                pool.spawn(user, None).await?;
                continue;
            }

            if !producer_open {
                break;
            }

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(ReconstructionError::Cancelled),
                fetched = blob_rx.recv() => match fetched {
                    Some(fetched) => pool.apply_blob(&mut blobs, fetched.key, fetched.data).await?,
                    None => producer_open = false,
                },
                _ = tokio::time::sleep(config.producer_wait_timeout) => {
                    debug!(pending_blobs = blobs.len(), in_flight = pool.tasks.len(), "Waiting for patch data");
                },
            }
        }

        producer.await??;
        pool.drain().await?;
        error_state.check()?;

        if !blobs.is_empty() {
            return Err(ReconstructionError::CorruptedReconstruction(format!(
                "{} blobs were never delivered",
                blobs.len()
            )));
        }
        if pool.applied != expected {
            return Err(ReconstructionError::CorruptedReconstruction(format!(
                "Applied {} intervals, expected {expected}",
                pool.applied
            )));
        }

        Ok(ReconstructionSummary {
            local_intervals: local_count,
            fetched_intervals: pool.applied - local_count,
            distinct_blobs,
            requests,
            bytes_written: pool.bytes_written,
        })
    }
}

struct FetchedBlob {
    key: BlobKey,
    data: Bytes,
}

/// Bounded set of in-flight interval applications.
struct ApplyPool {
    sink: Arc<dyn TargetSink>,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<u64>>,
    error_state: Arc<ErrorState>,
    zeros: Bytes,
    cancellation: CancellationToken,
    applied: usize,
    bytes_written: u64,
}

impl ApplyPool {
    async fn apply_blob(&mut self, blobs: &mut BTreeMap<BlobKey, PlannedBlob>, key: BlobKey, data: Bytes) -> Result<()> {
        let Some(planned) = blobs.remove(&key) else {
            warn!(version = %key.version, offset = key.offset, "Blob delivered more than once");
            return Ok(());
        };
        for user in planned.users.into_vec() {
            self.spawn(user, Some(data.clone())).await?;
        }
        Ok(())
    }

    async fn spawn(&mut self, user: IntervalRef, blob: Option<Bytes>) -> Result<()> {
        let permit = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => return Err(ReconstructionError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map_err(|_| ReconstructionError::InternalError("Apply semaphore closed".to_owned()))?,
        };

        let sink = self.sink.clone();
        let zeros = self.zeros.clone();
        let error_state = self.error_state.clone();
        self.tasks.spawn(async move {
            let _permit = permit;
            let IntervalRef { path, interval } = user;

            let result = async {
                let file = sink.open_file(&path).await?;
                apply_interval(file.as_ref(), &interval, blob.as_ref(), &zeros).await
            }
            .await;

            match &result {
                Ok(_) => debug!(
                    path = %path,
                    offset = interval.offset,
                    length = interval.length,
                    kind = ?interval.kind(),
                    version = %interval.version,
                    "Applied interval"
                ),
                Err(e) => error_state.set(e.clone()),
            }
            result
        });

        self.reap()
    }

    fn reap(&mut self) -> Result<()> {
        while let Some(result) = self.tasks.try_join_next() {
            self.finish(result)?;
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        while let Some(result) = self.tasks.join_next().await {
            self.finish(result)?;
        }
        Ok(())
    }

    fn finish(&mut self, result: std::result::Result<Result<u64>, JoinError>) -> Result<()> {
        let written = result??;
        self.applied += 1;
        self.bytes_written += written;
        Ok(())
    }
}

/// Runs one fetch task per request and forwards every blob they deliver.
async fn produce(
    source: Arc<dyn PatchSource>,
    versions: Vec<VersionPlan>,
    blob_tx: mpsc::Sender<FetchedBlob>,
    cancellation: CancellationToken,
) -> Result<()> {
    let mut tasks = JoinSet::new();
    for VersionPlan { version, url, requests } in versions {
        for request in requests {
            tasks.spawn(fetch_request(
                source.clone(),
                version.clone(),
                url.clone(),
                request,
                blob_tx.clone(),
                cancellation.clone(),
            ));
        }
    }
    drop(blob_tx);

    // Returning drops the set, which aborts the remaining fetches.
    while let Some(result) = tasks.join_next().await {
        result??;
    }
    Ok(())
}

#[instrument(skip_all, fields(version = %version, ranges = request.ranges.len()))]
async fn fetch_request(
    source: Arc<dyn PatchSource>,
    version: ParsedVersion,
    url: String,
    request: RangeRequest,
    blob_tx: mpsc::Sender<FetchedBlob>,
    cancellation: CancellationToken,
) -> Result<()> {
    let ranges = request.byte_ranges();
    let (part_tx, mut part_rx) = mpsc::channel::<RangePart>(PART_CHANNEL_CAPACITY);

    let fetch = source.fetch_ranges(&url, &version, ranges, part_tx, cancellation);
    let deliver = {
        let version = &version;
        let mut pending = request.ranges;
        async move {
            while let Some(part) = part_rx.recv().await {
                deliver_part(version, &mut pending, part, &blob_tx).await?;
            }
            Ok::<_, ReconstructionError>(pending)
        }
    };

    let (fetched, delivered) = tokio::join!(fetch, deliver);
    let pending = delivered?;
    fetched?;

    if !pending.is_empty() {
        return Err(ReconstructionError::CorruptedReconstruction(format!(
            "{} ranges of {url} were never delivered",
            pending.len()
        )));
    }
    Ok(())
}

/// Cuts the blobs of every pending merged range covered by `part` out of it and queues them.
async fn deliver_part(
    version: &ParsedVersion,
    pending: &mut Vec<MergedRange>,
    part: RangePart,
    blob_tx: &mpsc::Sender<FetchedBlob>,
) -> Result<()> {
    if part.data.len() as u64 != part.range.len() {
        return Err(ReconstructionError::CorruptedReconstruction(format!(
            "Part {} holds {} bytes",
            part.range,
            part.data.len()
        )));
    }

    let (covered, rest): (Vec<_>, Vec<_>) = std::mem::take(pending)
        .into_iter()
        .partition(|merged| part.range.contains(&merged.byte_range()));
    *pending = rest;

    if covered.is_empty() {
        debug!(range = %part.range, "Part covers no pending range");
        return Ok(());
    }

    for merged in covered {
        for RangeBlob { blob, required_len } in merged.blobs {
            let start = (blob.offset - part.range.start) as usize;
            let data = part.data.slice(start..start + blob.size as usize);
            let data = if blob.is_compressed {
                tokio::task::spawn_blocking(move || decompress_blob(&blob, data, required_len)).await??
            } else {
                decompress_blob(&blob, data, required_len)?
            };

            let key = BlobKey::new(version.clone(), &blob);
            blob_tx
                .send(FetchedBlob { key, data })
                .await
                .map_err(|_| ReconstructionError::Cancelled)?;
        }
    }
    Ok(())
}

/// Deletes the files and folders `diff` removes, deepest folders first, then creates the folders it adds.
///
/// Each removed expansion is cleared through [`TargetSink::delete_expansion`] first, which also takes
/// files in its folders that no snapshot tracks. A removed folder that still holds files not tracked by any snapshot is left in place.
#[instrument(skip_all, fields(from = %diff.from_version, to = %diff.to_version))]
pub async fn apply_removals(diff: &SnapshotDiff, sink: &dyn TargetSink) -> Result<()> {
    for &expansion_id in &diff.removed_expansions {
        sink.delete_expansion(expansion_id, &should_keep).await?;
    }

    for path in &diff.removed_files {
        sink.delete_file(path).await?;
        debug!(path, "Removed file");
    }

    let mut folders: Vec<&String> = diff.removed_folders.iter().collect();
    folders.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| b.cmp(a)));
    for folder in folders {
        match sink.delete_directory(folder).await {
            Ok(()) => {},
            Err(e @ ReconstructionError::SinkError { .. }) => {
                warn!(folder = %folder, error = %e, "Could not remove folder");
            },
            Err(e) => return Err(e),
        }
    }

    for folder in &diff.added_folders {
        sink.create_directory(folder).await?;
    }

    info!(
        removed_expansions = diff.removed_expansions.len(),
        removed_files = diff.removed_files.len(),
        removed_folders = diff.removed_folders.len(),
        added_folders = diff.added_folders.len(),
        "Applied removals"
    );
    Ok(())
}

fn depth(path: &str) -> usize {
    path.split('/').count()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    use clut_config::ClutConfig;
    use clut_core::{ApplyOperation, ByteInterval, PatchBlobRef, PlatformId, Snapshot, empty_block_header_bytes};
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use patch_client::{ByteRange, PatchClientError};

    use super::*;
    use crate::sink::MemorySink;

    /// Serves ranges from an in-memory patch per version and records every request.
    #[derive(Default)]
    struct MockSource {
        patches: BTreeMap<String, Vec<u8>>,
        requests: Mutex<Vec<(String, Vec<ByteRange>)>>,
        fail_with: Option<PatchClientError>,
        stall: bool,
    }

    impl MockSource {
        fn with_patch(mut self, url: &str, data: Vec<u8>) -> Self {
            self.patches.insert(url.to_owned(), data);
            self
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait::async_trait]
    impl PatchSource for MockSource {
        async fn fetch_ranges(
            &self,
            url: &str,
            _version: &ParsedVersion,
            ranges: Vec<ByteRange>,
            parts: mpsc::Sender<RangePart>,
            cancellation: CancellationToken,
        ) -> patch_client::Result<()> {
            self.requests.lock().unwrap().push((url.to_owned(), ranges.clone()));
            if self.stall {
                cancellation.cancelled().await;
                return Err(PatchClientError::Cancelled);
            }
            if let Some(e) = &self.fail_with {
                return Err(e.clone());
            }
            let data = &self.patches[url];
            for range in ranges {
                let part = RangePart {
                    range,
                    data: Bytes::copy_from_slice(&data[range.start as usize..range.end() as usize]),
                };
                parts.send(part).await.map_err(|_| PatchClientError::Cancelled)?;
            }
            Ok(())
        }
    }

    const BASE: &str = "http://patches/game";

    fn v1() -> ParsedVersion {
        ParsedVersion::new(2024, 1, 1, 0, 0)
    }

    fn v2() -> ParsedVersion {
        ParsedVersion::new(2024, 2, 1, 0, 0)
    }

    fn patch_bytes(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    fn diff_with(files: Vec<(&str, Vec<ByteInterval>)>) -> SnapshotDiff {
        SnapshotDiff {
            repository: "ffxiv".to_owned(),
            base_patch_url: Some(BASE.to_owned()),
            from_version: ParsedVersion::EPOCH,
            to_version: v2(),
            removed_folders: BTreeSet::new(),
            removed_files: BTreeSet::new(),
            removed_expansions: BTreeSet::new(),
            added_folders: BTreeSet::new(),
            added_files: files.into_iter().map(|(p, i)| (p.to_owned(), i)).collect(),
            replaced_files: BTreeSet::new(),
        }
    }

    fn reconstructor(diff: SnapshotDiff, source: Arc<MockSource>) -> RangeReconstructor {
        let config = ClutConfig::default();
        RangeReconstructor::new(diff, source)
            .with_config(&config.reconstruction)
            .with_sink_config(&config.sink)
            .with_concurrency(4)
    }

    // ==================== Reconstruction Tests ====================

    #[tokio::test]
    async fn test_shared_blob_fetched_once() {
        let url = format!("{BASE}/D2024.01.01.0000.0000.patch");
        let patch = patch_bytes(4096, 1);
        let source = Arc::new(MockSource::default().with_patch(&url, patch.clone()));

        let blob = PatchBlobRef {
            offset: 1000,
            size: 100,
            is_compressed: false,
        };
        let diff = diff_with(vec![
            ("a", vec![ByteInterval::split_patch(v1(), blob, 0, 0, 60)]),
            ("b", vec![ByteInterval::split_patch(v1(), blob, 10, 60, 40)]),
        ]);

        let sink = Arc::new(MemorySink::new());
        let summary = reconstructor(diff, source.clone()).run(sink.clone()).await.unwrap();

        assert_eq!(source.request_count(), 1);
        assert_eq!(summary.distinct_blobs, 1);
        assert_eq!(summary.fetched_intervals, 2);
        assert_eq!(summary.bytes_written, 100);
        assert_eq!(sink.file_contents("a").unwrap(), &patch[1000..1060]);
        assert_eq!(&sink.file_contents("b").unwrap()[10..], &patch[1060..1100]);
    }

    #[tokio::test]
    async fn test_compressed_blob_shared_by_split_intervals() {
        let plain = patch_bytes(300, 9);
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&plain).unwrap();
        let compressed = encoder.finish().unwrap();
        let mut patch = vec![0u8; 100];
        patch.extend_from_slice(&compressed);

        let whole = ByteInterval::compressed_patch(v1(), 100, 0, compressed.len() as u32, 300);
        let blob = *whole.blob().unwrap();
        let diff = diff_with(vec![
            ("a", vec![ByteInterval::split_patch(v1(), blob, 0, 0, 120)]),
            ("b", vec![ByteInterval::split_patch(v1(), blob, 0, 120, 80)]),
        ]);

        let url = format!("{BASE}/D2024.01.01.0000.0000.patch");
        let source = Arc::new(MockSource::default().with_patch(&url, patch));
        let sink = Arc::new(MemorySink::new());
        let summary = reconstructor(diff, source.clone()).run(sink.clone()).await.unwrap();

        assert_eq!(summary.distinct_blobs, 1);
        assert_eq!(source.request_count(), 1);
        assert_eq!(sink.file_contents("a").unwrap(), plain[..120]);
        assert_eq!(sink.file_contents("b").unwrap(), plain[120..200]);
    }

    #[tokio::test]
    async fn test_local_and_fetched_intervals() {
        let url1 = format!("{BASE}/D2024.01.01.0000.0000.patch");
        let url2 = format!("{BASE}/D2024.02.01.0000.0000.patch");
        let patch1 = patch_bytes(2048, 3);
        let patch2 = patch_bytes(2048, 7);
        let source = Arc::new(
            MockSource::default()
                .with_patch(&url1, patch1.clone())
                .with_patch(&url2, patch2.clone()),
        );

        let (header, zeros) = ByteInterval::empty_block(v2(), 300, 128).unwrap();
        let diff = diff_with(vec![(
            "sqpack/ffxiv/000000.win32.dat0",
            vec![
                ByteInterval::raw_patch(v1(), 0, 0, 100),
                ByteInterval::raw_patch(v2(), 500, 100, 100),
                ByteInterval::zero_fill(v1(), 200, 100),
                header,
                zeros.unwrap(),
            ],
        )]);

        let sink = Arc::new(MemorySink::new());
        let summary = reconstructor(diff, source.clone()).run(sink.clone()).await.unwrap();

        assert_eq!(summary.local_intervals, 3);
        assert_eq!(summary.fetched_intervals, 2);
        assert_eq!(summary.requests, 2);
        assert_eq!(summary.bytes_written, 428);

        let contents = sink.file_contents("sqpack/ffxiv/000000.win32.dat0").unwrap();
        assert_eq!(contents.len(), 428);
        assert_eq!(&contents[..100], &patch1[..100]);
        assert_eq!(&contents[100..200], &patch2[500..600]);
        assert!(contents[200..300].iter().all(|&b| b == 0));
        assert_eq!(&contents[300..324], &empty_block_header_bytes(1));
        assert!(contents[324..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn test_replaced_files_truncated() {
        let diff = {
            let mut diff = diff_with(vec![("a", vec![ByteInterval::zero_fill(v1(), 0, 4)])]);
            diff.replaced_files.insert("a".to_owned());
            diff
        };
        let sink = Arc::new(MemorySink::new());
        sink.insert_file("a", vec![9u8; 64]);

        reconstructor(diff, Arc::new(MockSource::default()))
            .run(sink.clone())
            .await
            .unwrap();

        assert_eq!(sink.file_contents("a").unwrap(), vec![0u8; 4]);
    }

    #[tokio::test]
    async fn test_missing_base_url() {
        let mut diff = diff_with(vec![("a", vec![ByteInterval::raw_patch(v1(), 0, 0, 10)])]);
        diff.base_patch_url = None;

        let result = reconstructor(diff.clone(), Arc::new(MockSource::default()))
            .run(Arc::new(MemorySink::new()))
            .await;
        assert!(matches!(result, Err(ReconstructionError::MissingBaseUrl)));

        let url = format!("{BASE}/D2024.01.01.0000.0000.patch");
        let source = Arc::new(MockSource::default().with_patch(&url, patch_bytes(64, 0)));
        let summary = reconstructor(diff, source)
            .with_base_url(format!("{BASE}/"))
            .run(Arc::new(MemorySink::new()))
            .await
            .unwrap();
        assert_eq!(summary.fetched_intervals, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let source = Arc::new(MockSource {
            fail_with: Some(PatchClientError::RangeFetchFailed {
                url: "u".to_owned(),
                ranges: "bytes=0-9".to_owned(),
                reason: "503".to_owned(),
            }),
            ..Default::default()
        });
        let diff = diff_with(vec![("a", vec![ByteInterval::raw_patch(v1(), 0, 0, 10)])]);

        let result = reconstructor(diff, source).run(Arc::new(MemorySink::new())).await;
        assert!(matches!(
            result,
            Err(ReconstructionError::PatchClientError(PatchClientError::RangeFetchFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_split_offset_detected() {
        let url = format!("{BASE}/D2024.01.01.0000.0000.patch");
        let source = Arc::new(MockSource::default().with_patch(&url, patch_bytes(256, 0)));
        let blob = PatchBlobRef {
            offset: 0,
            size: 10,
            is_compressed: false,
        };
        let diff = diff_with(vec![("a", vec![ByteInterval::split_patch(v1(), blob, 0, 8, 5)])]);

        let result = reconstructor(diff, source).run(Arc::new(MemorySink::new())).await;
        assert!(matches!(result, Err(ReconstructionError::CorruptedReconstruction(_))));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let source = Arc::new(MockSource {
            stall: true,
            ..Default::default()
        });
        let diff = diff_with(vec![("a", vec![ByteInterval::raw_patch(v1(), 0, 0, 10)])]);
        let token = CancellationToken::new();

        let run = tokio::spawn(
            reconstructor(diff, source)
                .with_cancellation_token(token.clone())
                .run(Arc::new(MemorySink::new())),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let result = run.await.unwrap();
        assert!(result.unwrap_err().is_cancellation());
    }

    // ==================== Removal Tests ====================

    #[tokio::test]
    async fn test_apply_removals() {
        let sink = MemorySink::new();
        sink.insert_file("old/a.dat", vec![1]);
        sink.insert_file("keep/b.dat", vec![1]);
        for dir in ["old", "old/deeper", "keep"] {
            sink.create_directory(dir).await.unwrap();
        }

        let mut diff = diff_with(Vec::new());
        diff.removed_files.insert("old/a.dat".to_owned());
        diff.removed_folders.extend(["old".to_owned(), "old/deeper".to_owned()]);
        diff.added_folders.insert("new/nested".to_owned());

        apply_removals(&diff, &sink).await.unwrap();

        assert_eq!(sink.file_paths(), vec!["keep/b.dat".to_owned()]);
        assert_eq!(
            sink.directories(),
            BTreeSet::from(["keep".to_owned(), "new/nested".to_owned()])
        );
    }

    #[tokio::test]
    async fn test_expansion_removal_deletes_through_sink() {
        let add = |path: &str| ApplyOperation::AddData {
            path: path.into(),
            blob_offset: 0,
            file_offset: 0,
            length: 10,
            delete_length: 0,
        };
        let mut snapshot = Snapshot::empty("ffxiv", PlatformId::Win32);
        let mut fold = snapshot.begin_fold(v1()).unwrap();
        fold.apply(&add("sqpack/ex1/020000.win32.dat0")).unwrap();
        fold.apply(&add("sqpack/ex1/ex1.ver.var")).unwrap();
        fold.finish();
        let before = snapshot.clone();

        let mut fold = snapshot.begin_fold(v2()).unwrap();
        fold.apply(&ApplyOperation::RemoveExpansion { expansion_id: 1 }).unwrap();
        fold.finish();
        let diff = SnapshotDiff::between(&before, &snapshot).unwrap();

        let sink = MemorySink::new();
        sink.insert_file("sqpack/ex1/020000.win32.dat0", vec![1; 10]);
        sink.insert_file("sqpack/ex1/ex1.ver.var", vec![2; 10]);
        sink.insert_file("sqpack/ex1/020000.win32.index", vec![3; 10]);
        sink.insert_file("sqpack/ex2/030000.win32.dat0", vec![4; 10]);
        assert_eq!(diff.removed_expansions, BTreeSet::from([1]));
        apply_removals(&diff, &sink).await.unwrap();

        // The untracked index goes with the expansion; other expansions are untouched.
        assert_eq!(sink.file_paths(), vec![
            "sqpack/ex1/ex1.ver.var".to_owned(),
            "sqpack/ex2/030000.win32.dat0".to_owned(),
        ]);
    }

    #[test]
    fn test_folder_depth_order() {
        let mut folders = vec!["a", "a/b/c", "a/b", "z"];
        folders.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| b.cmp(a)));
        assert_eq!(folders, vec!["a/b/c", "a/b", "z", "a"]);
    }
}
