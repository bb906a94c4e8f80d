//! Workflows on top of the chain lookup table engine: building a chain of persisted snapshots from
//! per-version operation streams, and installing a snapshot's version into a directory.

mod chain;
pub mod errors;
mod install;
pub mod snapshot_io;

pub use chain::{ChainSummary, ChainVersion, VersionGraph, VersionNode, build_chain};
pub use errors::{ClutToolError, Result};
pub use install::{IncludeFilter, InstallSession, InstallSummary, installed_version};
