mod apply;
mod error;
mod plan;
mod reconstructor;
pub mod sink;

pub use apply::{apply_interval, decompress_blob};
pub use error::{ErrorState, ReconstructionError, Result};
pub use plan::{
    BlobKey, BlobUsers, FetchPlan, IntervalRef, MergedRange, PlannedBlob, RangeBlob, RangeRequest, VersionPlan, patch_url,
};
pub use reconstructor::{RangeReconstructor, ReconstructionSummary, apply_removals};
pub use sink::{
    BlackHoleFile, FileSystemSink, FilteredFileLedger, FilteredSink, KeepFn, MemoryFile, MemorySink, TargetFile, TargetSink,
};
