use std::collections::VecDeque;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clut_config::ClientConfig;
use clut_core::ParsedVersion;
use http::StatusCode;
use http::header::{CONTENT_RANGE, CONTENT_TYPE, RANGE};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::body_reader::BodyReader;
use crate::error::{PatchClientError, Result};
use crate::interface::{PatchSource, RangePart};
use crate::multipart::{MultipartReader, multipart_boundary};
use crate::range::{ByteRange, ContentRange, format_range_header, total_len};
use crate::retry::{RangeAttemptError, on_body_failure, on_request_failure};

const MIB: f64 = (1u64 << 20) as f64;

/// Fetches byte ranges of patch artifacts over HTTP, or from local copies when present.
///
/// A failed multi-range request is split in half and both halves are retried in order after
/// the next delay of the backoff table. A single range that still fails, or a failure once the
/// table is exhausted, is fatal.
pub struct PatchClient {
    client: ClientWithMiddleware,
    connection_semaphore: Arc<Semaphore>,
    backoff_delays: Vec<Duration>,
    override_dir: Option<PathBuf>,
}

impl PatchClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self::from_client(ClientBuilder::new(client).build(), config))
    }

    /// Uses a preconfigured client; the rest of the settings come from `config`.
    pub fn from_client(client: ClientWithMiddleware, config: &ClientConfig) -> Self {
        Self {
            client,
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections.max(1))),
            backoff_delays: config.backoff_delays.clone(),
            override_dir: config.override_dir.clone(),
        }
    }

    pub fn with_backoff_delays(mut self, delays: Vec<Duration>) -> Self {
        self.backoff_delays = delays;
        self
    }

    pub fn with_override_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.override_dir = Some(dir.into());
        self
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.connection_semaphore = Arc::new(Semaphore::new(max_connections.max(1)));
        self
    }

    /// A local file to read instead of `url`: the override directory copy first, then `url` itself
    /// when it names an existing path.
    async fn local_source(&self, url: &str, version: &ParsedVersion) -> Option<PathBuf> {
        if let Some(dir) = &self.override_dir {
            let candidate = dir.join(format!("{}.patch", version.patch_name()));
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                info!(version = %version, path = %candidate.display(), "Using local override");
                return Some(candidate);
            }
        }

        let path = Path::new(url);
        tokio::fs::try_exists(path)
            .await
            .unwrap_or(false)
            .then(|| path.to_path_buf())
    }

    #[instrument(skip_all, fields(version = %version, ranges = ranges.len()))]
    async fn fetch_http(
        &self,
        url: &Url,
        version: &ParsedVersion,
        ranges: Vec<ByteRange>,
        parts: &mpsc::Sender<RangePart>,
        cancellation: &CancellationToken,
    ) -> Result<()> {
        info!(
            version = %version,
            mib = format_args!("{:.2}", total_len(&ranges) as f64 / MIB),
            ranges = ranges.len(),
            "Downloading"
        );

        // Depth-first over split halves so the first half is always fetched before the second.
        let mut work = VecDeque::from([(ranges, 0usize)]);

        while let Some((ranges, depth)) = work.pop_front() {
            let mut pending = ranges;

            let attempt = tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(PatchClientError::Cancelled),
                r = self.fetch_once(url, &mut pending, parts) => r,
            };

            let err = match attempt {
                Ok(()) => continue,
                Err(RangeAttemptError::FatalError(e)) => return Err(e),
                Err(RangeAttemptError::RetryableError(e)) => e,
            };

            if pending.is_empty() {
                debug!(version = %version, error = %err, "Response failed after delivering every range");
                continue;
            }

            error!(version = %version, depth, ranges = pending.len(), error = %err, "Range request failed");

            if pending.len() == 1 || depth >= self.backoff_delays.len() {
                return Err(PatchClientError::RangeFetchFailed {
                    url: url.to_string(),
                    ranges: format_range_header(&pending),
                    reason: err.to_string(),
                });
            }

            warn!(
                version = %version,
                mib = format_args!("{:.2}", total_len(&pending) as f64 / MIB),
                ranges = pending.len(),
                "Retrying"
            );

            let second_half = pending.split_off(pending.len() / 2);
            tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(PatchClientError::Cancelled),
                _ = tokio::time::sleep(self.backoff_delays[depth]) => {},
            }
            work.push_front((second_half, depth + 1));
            work.push_front((pending, depth + 1));
        }

        Ok(())
    }

    /// One request for `pending`. Ranges are removed from `pending` as parts covering them are
    /// delivered, so on failure it holds exactly what still needs fetching.
    async fn fetch_once(
        &self,
        url: &Url,
        pending: &mut Vec<ByteRange>,
        parts: &mpsc::Sender<RangePart>,
    ) -> std::result::Result<(), RangeAttemptError> {
        // The semaphore is never closed.
        let _permit = self
            .connection_semaphore
            .acquire()
            .await
            .map_err(|_| RangeAttemptError::FatalError(PatchClientError::Cancelled))?;

        let response = self
            .client
            .get(url.clone())
            .header(RANGE, format_range_header(pending))
            .send()
            .await
            .map_err(on_request_failure)?
            .error_for_status()
            .map_err(RangeAttemptError::retryable)?;

        let status = response.status();
        if status != StatusCode::PARTIAL_CONTENT && status != StatusCode::OK {
            return Err(RangeAttemptError::retryable(PatchClientError::protocol(format!(
                "Invalid status {status} for a range request"
            ))));
        }

        let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let boundary = multipart_boundary(content_type).map_err(RangeAttemptError::retryable)?;

        match boundary {
            None => {
                let content_range = response
                    .headers()
                    .get(CONTENT_RANGE)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| PatchClientError::protocol("Missing Content-Range header"))
                    .and_then(ContentRange::parse)
                    .map_err(RangeAttemptError::retryable)?;

                let data = response.bytes().await.map_err(RangeAttemptError::retryable)?;
                if data.len() as u64 != content_range.range.len() {
                    return Err(RangeAttemptError::retryable(PatchClientError::protocol(format!(
                        "Body of {} bytes does not match Content-Range {}",
                        data.len(),
                        content_range.range
                    ))));
                }

                deliver(
                    pending,
                    parts,
                    RangePart {
                        range: content_range.range,
                        data,
                    },
                )
                .await?;
            },
            Some(boundary) => {
                if status == StatusCode::OK {
                    return Err(RangeAttemptError::retryable(PatchClientError::protocol(
                        "Received 200 OK for a multi-range request",
                    )));
                }
                if response.content_length() == Some(0) {
                    return Err(RangeAttemptError::retryable(PatchClientError::protocol("Empty multipart response")));
                }

                let mut reader = MultipartReader::new(BodyReader::new(response.bytes_stream()), &boundary);
                while let Some(part) = reader.next_part().await.map_err(on_body_failure)? {
                    deliver(pending, parts, part).await?;
                }
            },
        }

        if !pending.is_empty() {
            return Err(RangeAttemptError::retryable(PatchClientError::protocol(format!(
                "Response is missing {} requested ranges",
                pending.len()
            ))));
        }
        Ok(())
    }
}

async fn deliver(
    pending: &mut Vec<ByteRange>,
    parts: &mpsc::Sender<RangePart>,
    part: RangePart,
) -> std::result::Result<(), RangeAttemptError> {
    let range = part.range;
    parts
        .send(part)
        .await
        .map_err(|_| RangeAttemptError::FatalError(PatchClientError::Cancelled))?;
    pending.retain(|r| !range.contains(r));
    Ok(())
}

async fn read_local_ranges(
    path: &Path,
    ranges: &[ByteRange],
    parts: &mpsc::Sender<RangePart>,
    cancellation: &CancellationToken,
) -> Result<()> {
    let mut file = tokio::fs::File::open(path).await?;
    for range in ranges {
        if cancellation.is_cancelled() {
            return Err(PatchClientError::Cancelled);
        }

        let len = usize::try_from(range.len()).map_err(|_| PatchClientError::protocol("Range too large"))?;
        let mut data = vec![0u8; len];
        file.seek(SeekFrom::Start(range.start)).await?;
        file.read_exact(&mut data).await?;

        parts
            .send(RangePart {
                range: *range,
                data: data.into(),
            })
            .await
            .map_err(|_| PatchClientError::Cancelled)?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl PatchSource for PatchClient {
    async fn fetch_ranges(
        &self,
        url: &str,
        version: &ParsedVersion,
        ranges: Vec<ByteRange>,
        parts: mpsc::Sender<RangePart>,
        cancellation: CancellationToken,
    ) -> Result<()> {
        if ranges.is_empty() {
            return Ok(());
        }

        if let Some(path) = self.local_source(url, version).await {
            debug!(version = %version, path = %path.display(), ranges = ranges.len(), "Reading ranges from local file");
            return read_local_ranges(&path, &ranges, &parts, &cancellation).await;
        }

        let url = Url::parse(url)?;
        self.fetch_http(&url, version, ranges, &parts, &cancellation).await
    }
}
