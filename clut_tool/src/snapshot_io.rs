use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use clut_core::{ApplyOperation, CompressionType, ParsedVersion, Snapshot};
use tracing::debug;

use crate::errors::{ClutToolError, Result};

/// Name of the persisted snapshot of `version` inside a chain directory.
pub fn clut_file_name(version: &ParsedVersion) -> String {
    format!("{}.clut", version.patch_name())
}

pub fn read_snapshot(path: &Path) -> Result<Snapshot> {
    let mut reader = BufReader::new(File::open(path)?);
    let snapshot = Snapshot::read_from(&mut reader)?;
    debug!(path = %path.display(), version = %snapshot.version, files = snapshot.files.len(), "Loaded snapshot");
    Ok(snapshot)
}

/// Writes `snapshot` to `path` and returns the size of the written file.
pub fn write_snapshot(path: &Path, snapshot: &Snapshot, compression: CompressionType) -> Result<u64> {
    let mut writer = BufWriter::new(File::create(path)?);
    snapshot.write_to(&mut writer, compression)?;
    writer.flush()?;
    Ok(writer.get_ref().metadata()?.len())
}

/// Loads the snapshot of `version` from a chain directory written by [`crate::build_chain`].
pub fn read_chain_snapshot(dir: &Path, version: &ParsedVersion) -> Result<Snapshot> {
    let snapshot = read_snapshot(&dir.join(clut_file_name(version)))?;
    if &snapshot.version != version {
        return Err(ClutToolError::ChainError(format!(
            "{} holds version {}",
            clut_file_name(version),
            snapshot.version
        )));
    }
    Ok(snapshot)
}

/// Reads a JSON array of operations.
pub fn read_operations(path: &Path) -> Result<Vec<ApplyOperation>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// The version an operations file belongs to, taken from its file stem (`D2024.01.01.0000.0000.json`).
pub fn operations_version(path: &Path) -> Result<ParsedVersion> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ClutToolError::ParameterError(format!("No version in file name {}", path.display())))?;
    Ok(stem.parse()?)
}

/// Operation files of a directory or explicit list, keyed by version.
pub fn collect_operation_files(paths: &[PathBuf]) -> Result<Vec<(ParsedVersion, PathBuf)>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?.path();
                if entry.extension().is_some_and(|e| e == "json") {
                    files.push((operations_version(&entry)?, entry));
                }
            }
        } else {
            files.push((operations_version(path)?, path.clone()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    if let Some(w) = files.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(ClutToolError::ParameterError(format!("Version {} given twice", w[0].0)));
    }
    Ok(files)
}
