use bytes::Bytes;
use clut_core::ParsedVersion;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::range::ByteRange;

/// One span of a patch artifact as delivered by the server or read from a local copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePart {
    pub range: ByteRange,
    pub data: Bytes,
}

/// Source of patch artifact byte ranges.
///
/// A part may cover more than one requested range when the server coalesces
/// neighbouring ranges; every requested range is covered by some delivered part
/// when `fetch_ranges` returns `Ok`.
#[async_trait::async_trait]
pub trait PatchSource: Send + Sync {
    /// Fetches `ranges` of `version`'s patch at `url`, sending each part on `parts`
    /// as soon as it has been read in full.
    ///
    /// Fails with [`crate::PatchClientError::Cancelled`] when `cancellation` fires
    /// or the receiving side of `parts` has gone away.
    async fn fetch_ranges(
        &self,
        url: &str,
        version: &ParsedVersion,
        ranges: Vec<ByteRange>,
        parts: mpsc::Sender<RangePart>,
        cancellation: CancellationToken,
    ) -> Result<()>;
}
