use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;

use clut_config::ReconstructionConfig;
use clut_core::{ByteInterval, ParsedVersion, PatchBlobRef};
use patch_client::{ByteRange, range_header_len};

use crate::error::{ReconstructionError, Result};

/// Identity of one fetchable blob: the same bytes of the same version's patch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobKey {
    pub version: ParsedVersion,
    pub offset: u64,
    pub size: u32,
}

impl BlobKey {
    pub fn new(version: ParsedVersion, blob: &PatchBlobRef) -> Self {
        Self {
            version,
            offset: blob.offset,
            size: blob.size,
        }
    }
}

/// An interval together with the file it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalRef {
    pub path: Arc<str>,
    pub interval: ByteInterval,
}

/// The intervals materialized from one blob. Most blobs have a single user.
#[derive(Debug, Clone)]
pub enum BlobUsers {
    Single(IntervalRef),
    Shared(Vec<IntervalRef>),
}

impl BlobUsers {
    pub fn push(&mut self, user: IntervalRef) {
        match self {
            BlobUsers::Shared(users) => users.push(user),
            BlobUsers::Single(first) => {
                let first = first.clone();
                *self = BlobUsers::Shared(vec![first, user]);
            },
        }
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        match self {
            BlobUsers::Single(_) => 1,
            BlobUsers::Shared(users) => users.len(),
        }
    }

    pub fn into_vec(self) -> Vec<IntervalRef> {
        match self {
            BlobUsers::Single(user) => vec![user],
            BlobUsers::Shared(users) => users,
        }
    }
}

/// A blob to fetch and the intervals it materializes.
#[derive(Debug, Clone)]
pub struct PlannedBlob {
    pub is_compressed: bool,
    /// Decompressed bytes the users read, up to the furthest end of any user's slice.
    pub required_len: u64,
    pub users: BlobUsers,
}

impl PlannedBlob {
    fn range_blob(&self, key: &BlobKey) -> RangeBlob {
        RangeBlob {
            blob: PatchBlobRef {
                offset: key.offset,
                size: key.size,
                is_compressed: self.is_compressed,
            },
            required_len: self.required_len,
        }
    }
}

/// A blob as carried by a merged range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeBlob {
    pub blob: PatchBlobRef,
    pub required_len: u64,
}

/// A contiguous span of one patch covering one or more blobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedRange {
    pub offset: u64,
    /// Exclusive.
    pub end: u64,
    /// Sorted by offset; may overlap each other.
    pub blobs: Vec<RangeBlob>,
}

impl MergedRange {
    fn new(blob: RangeBlob) -> Self {
        Self {
            offset: blob.blob.offset,
            end: blob.blob.end(),
            blobs: vec![blob],
        }
    }

    /// Extends this range with `blob` (which must not start before it) when the gap is at most
    /// `min_distance` and the result stays within `max_size`.
    fn try_add(&mut self, blob: RangeBlob, min_distance: u64, max_size: u64) -> bool {
        let end = self.end.max(blob.blob.end());
        if blob.blob.offset > self.end.saturating_add(min_distance) || end - self.offset > max_size {
            return false;
        }
        self.end = end;
        self.blobs.push(blob);
        true
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.offset
    }

    pub fn byte_range(&self) -> ByteRange {
        ByteRange::new(self.offset, self.end - 1)
    }
}

/// Merged ranges sent in one HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    pub ranges: Vec<MergedRange>,
}

impl RangeRequest {
    pub fn byte_ranges(&self) -> Vec<ByteRange> {
        self.ranges.iter().map(MergedRange::byte_range).collect()
    }

    pub fn header_len(&self) -> usize {
        range_header_len(&self.byte_ranges())
    }
}

#[derive(Debug, Clone)]
pub struct VersionPlan {
    pub version: ParsedVersion,
    pub url: String,
    pub requests: Vec<RangeRequest>,
}

/// Everything a reconstruction has to do, split into work that needs no network and the requests
/// that fetch the rest.
#[derive(Debug, Default)]
pub struct FetchPlan {
    pub local: Vec<IntervalRef>,
    pub blobs: BTreeMap<BlobKey, PlannedBlob>,
    /// Zero sized blobs; applied without a fetch.
    pub empty_blobs: Vec<BlobKey>,
    pub versions: Vec<VersionPlan>,
}

/// The URL of `version`'s patch artifact below `base_url`.
pub fn patch_url(base_url: &str, version: &ParsedVersion) -> String {
    format!("{}/{}.patch", base_url.trim_end_matches('/'), version.patch_name())
}

impl FetchPlan {
    /// Plans the reconstruction of `files`. `base_url` is only needed when some interval has to be fetched.
    pub fn build(
        files: &BTreeMap<String, Vec<ByteInterval>>,
        base_url: Option<&str>,
        config: &ReconstructionConfig,
    ) -> Result<Self> {
        let mut plan = FetchPlan::default();

        for (path, intervals) in files {
            let path: Arc<str> = Arc::from(path.as_str());
            for interval in intervals {
                let user = IntervalRef {
                    path: path.clone(),
                    interval: interval.clone(),
                };
                let Some(blob) = interval.blob() else {
                    plan.local.push(user);
                    continue;
                };

                let required_len = interval.sub_offset() as u64 + interval.length as u64;
                match plan.blobs.entry(BlobKey::new(interval.version.clone(), blob)) {
                    Entry::Vacant(e) => {
                        e.insert(PlannedBlob {
                            is_compressed: blob.is_compressed,
                            required_len,
                            users: BlobUsers::Single(user),
                        });
                    },
                    Entry::Occupied(mut e) => {
                        let planned = e.get_mut();
                        if planned.is_compressed != blob.is_compressed {
                            return Err(ReconstructionError::CorruptedReconstruction(format!(
                                "Blob at {} of version {} is referenced both compressed and uncompressed",
                                blob.offset, interval.version
                            )));
                        }
                        planned.required_len = planned.required_len.max(required_len);
                        planned.users.push(user);
                    },
                }
            }
        }

        // Keys iterate by version, then blob offset.
        let mut by_version: BTreeMap<&ParsedVersion, Vec<RangeBlob>> = BTreeMap::new();
        for (key, planned) in &plan.blobs {
            if key.size == 0 {
                plan.empty_blobs.push(key.clone());
            } else {
                by_version.entry(&key.version).or_default().push(planned.range_blob(key));
            }
        }

        if by_version.is_empty() {
            return Ok(plan);
        }
        let base_url = base_url.ok_or(ReconstructionError::MissingBaseUrl)?;

        let max_size = config.max_merged_range_size.as_u64().max(1);
        plan.versions = by_version
            .into_iter()
            .map(|(version, blobs)| {
                let merged = merge_blobs(blobs, config.min_range_distance, max_size);
                VersionPlan {
                    version: version.clone(),
                    url: patch_url(base_url, version),
                    requests: pack_requests(merged, config.max_range_header_size),
                }
            })
            .collect();

        Ok(plan)
    }

    pub fn fetch_interval_count(&self) -> usize {
        self.blobs.values().map(|planned| planned.users.len()).sum()
    }

    pub fn request_count(&self) -> usize {
        self.versions.iter().map(|v| v.requests.len()).sum()
    }

    /// Bytes requested over the network, gaps between merged blobs included.
    pub fn download_size(&self) -> u64 {
        self.versions
            .iter()
            .flat_map(|v| &v.requests)
            .flat_map(|r| &r.ranges)
            .map(MergedRange::len)
            .sum()
    }
}

/// Greedily merges offset-sorted blobs of one patch.
fn merge_blobs(blobs: Vec<RangeBlob>, min_distance: u64, max_size: u64) -> Vec<MergedRange> {
    let mut merged: Vec<MergedRange> = Vec::new();
    for blob in blobs {
        if let Some(last) = merged.last_mut()
            && last.try_add(blob, min_distance, max_size)
        {
            continue;
        }
        merged.push(MergedRange::new(blob));
    }
    merged
}

/// Packs merged ranges into requests whose `Range` header stays within `max_header_size`.
/// A range too long for the limit on its own still gets a request.
fn pack_requests(merged: Vec<MergedRange>, max_header_size: usize) -> Vec<RangeRequest> {
    let mut requests = Vec::new();
    let mut current: Vec<MergedRange> = Vec::new();
    let mut current_len = 0;

    for range in merged {
        let fragment_len = range.byte_range().header_len();
        if !current.is_empty() && current_len + 1 + fragment_len > max_header_size {
            requests.push(RangeRequest {
                ranges: std::mem::take(&mut current),
            });
        }

        if current.is_empty() {
            current_len = range_header_len(&[range.byte_range()]);
        } else {
            current_len += 1 + fragment_len;
        }
        current.push(range);
    }

    if !current.is_empty() {
        requests.push(RangeRequest { ranges: current });
    }
    requests
}
