//! The chain lookup table data model: which version and which patch bytes produced every byte of a
//! versioned file tree, how new operations overlay it, and how two versions differ.

pub mod diff;
pub mod error;
pub mod extent_map;
pub mod interval;
pub mod operations;
pub mod overrides;
pub mod serialization;
pub mod snapshot;
pub mod version;

pub use diff::SnapshotDiff;
pub use error::{ClutError, Result};
pub use extent_map::FileExtentMap;
pub use interval::{
    BLOCK_GRANULARITY, ByteInterval, EMPTY_BLOCK_HEADER_SIZE, IntervalKind, IntervalSource, PatchBlobRef,
    empty_block_header_bytes,
};
pub use operations::{ApplyOperation, FileBlock, HeaderKind};
pub use overrides::{OverrideLookup, VersionOverrides};
pub use serialization::{ClutHeader, CompressionType, PlatformId};
pub use snapshot::{FoldSummary, Snapshot, VersionFold};
pub use version::ParsedVersion;
