use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Cursor;

use super::binary::{BinaryRead, BinaryWrite};
use crate::error::{ClutError, Result};
use crate::extent_map::FileExtentMap;
use crate::interval::{ByteInterval, IntervalKind, IntervalSource, PatchBlobRef};
use crate::snapshot::Snapshot;
use crate::version::ParsedVersion;

/// Folders and files decoded from a payload.
pub(crate) struct PayloadContents {
    pub folders: BTreeSet<String>,
    pub files: BTreeMap<String, FileExtentMap>,
}

/// Assigns each distinct interval version an index in first-use order.
struct VersionTable {
    versions: Vec<ParsedVersion>,
    index: HashMap<ParsedVersion, u32>,
}

impl VersionTable {
    fn build(snapshot: &Snapshot) -> Self {
        let mut table = Self {
            versions: Vec::new(),
            index: HashMap::new(),
        };
        for interval in snapshot.files.values().flat_map(|m| m.iter()) {
            if !table.index.contains_key(&interval.version) {
                table.index.insert(interval.version.clone(), table.versions.len() as u32);
                table.versions.push(interval.version.clone());
            }
        }
        table
    }
}

pub(crate) fn encode_payload(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let table = VersionTable::build(snapshot);

    out.write_count(table.versions.len())?;
    for version in &table.versions {
        out.write_string(&version.patch_name())?;
    }

    out.write_count(snapshot.folders.len())?;
    for folder in &snapshot.folders {
        out.write_string(folder)?;
    }

    out.write_count(snapshot.files.len())?;
    for path in snapshot.files.keys() {
        out.write_string(path)?;
    }

    for map in snapshot.files.values() {
        encode_file(&mut out, map, &table)?;
    }

    Ok(out)
}

fn encode_file(out: &mut Vec<u8>, map: &FileExtentMap, table: &VersionTable) -> Result<()> {
    out.write_count(map.len())?;

    let mut last_blob_offset = 0u64;
    for interval in map {
        out.write_u8(interval.kind() as u8)?;
        out.write_7bit_u32(table.index[&interval.version])?;

        match interval.source {
            IntervalSource::EmptyBlockHeader { block_count } => {
                let block_count = i32::try_from(block_count)
                    .map_err(|_| ClutError::validation(format!("Block count {block_count} does not fit in 32 bits")))?;
                out.write_i32_le(block_count)?;
            },
            IntervalSource::RawPatch { blob } | IntervalSource::SplitPatch { blob, .. } => {
                out.write_7bit_i64(blob.offset.wrapping_sub(last_blob_offset) as i64)?;
                out.write_7bit_u32(blob.size)?;
                out.write_u8(blob.is_compressed as u8)?;
                last_blob_offset = blob.offset;
            },
            IntervalSource::ZeroFill => {},
        }

        if let IntervalSource::SplitPatch { sub_offset, .. } = interval.source {
            out.write_7bit_u32(sub_offset)?;
        }
    }

    let mut last_offset = 0u64;
    for interval in map {
        out.write_7bit_i64(interval.offset.wrapping_sub(last_offset) as i64)?;
        last_offset = interval.offset;
    }

    for interval in map {
        out.write_7bit_u32(interval.length)?;
    }

    Ok(())
}

pub(crate) fn decode_payload(data: &[u8]) -> Result<PayloadContents> {
    let mut reader = Cursor::new(data);

    let version_count = reader.read_count()?;
    let versions = (0..version_count)
        .map(|_| {
            let s = reader.read_string()?;
            s.parse::<ParsedVersion>()
                .map_err(|e| ClutError::format(format!("Bad version table entry: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let folder_count = reader.read_count()?;
    let folders = (0..folder_count).map(|_| reader.read_string()).collect::<Result<BTreeSet<_>>>()?;

    let file_count = reader.read_count()?;
    let names = (0..file_count).map(|_| reader.read_string()).collect::<Result<Vec<_>>>()?;

    let mut files = BTreeMap::new();
    for name in names {
        let map = decode_file(&mut reader, &versions)
            .map_err(|e| ClutError::format(format!("Failed to read intervals of {name}: {e}")))?;
        files.insert(name, map);
    }

    if reader.position() as usize != data.len() {
        return Err(ClutError::format(format!(
            "{} trailing bytes after payload",
            data.len() - reader.position() as usize
        )));
    }

    Ok(PayloadContents { folders, files })
}

fn decode_file(reader: &mut Cursor<&[u8]>, versions: &[ParsedVersion]) -> Result<FileExtentMap> {
    let count = reader.read_count()?;

    let mut pending = Vec::with_capacity(count.min(1 << 16));
    let mut last_blob_offset = 0u64;
    for _ in 0..count {
        let kind = IntervalKind::try_from(reader.read_u8()?)?;
        let version_idx = reader.read_7bit_u32()? as usize;
        let version = versions
            .get(version_idx)
            .ok_or_else(|| ClutError::format(format!("Version index {version_idx} out of range")))?
            .clone();

        let source = match kind {
            IntervalKind::ZeroFill => IntervalSource::ZeroFill,
            IntervalKind::EmptyBlockHeader => {
                let block_count = reader.read_i32_le()?;
                let block_count = u32::try_from(block_count)
                    .map_err(|_| ClutError::format(format!("Negative block count {block_count}")))?;
                IntervalSource::EmptyBlockHeader { block_count }
            },
            IntervalKind::RawPatch | IntervalKind::SplitPatch => {
                let offset = last_blob_offset.wrapping_add(reader.read_7bit_i64()? as u64);
                let size = reader.read_7bit_u32()?;
                let is_compressed = reader.read_u8()? != 0;
                last_blob_offset = offset;

                let blob = PatchBlobRef {
                    offset,
                    size,
                    is_compressed,
                };
                if kind == IntervalKind::RawPatch {
                    IntervalSource::RawPatch { blob }
                } else {
                    IntervalSource::SplitPatch {
                        blob,
                        sub_offset: reader.read_7bit_u32()?,
                    }
                }
            },
        };
        pending.push((version, source));
    }

    let mut offsets = Vec::with_capacity(pending.len());
    let mut last_offset = 0u64;
    for _ in 0..count {
        last_offset = last_offset.wrapping_add(reader.read_7bit_i64()? as u64);
        offsets.push(last_offset);
    }

    let mut intervals = Vec::with_capacity(pending.len());
    for ((version, source), offset) in pending.into_iter().zip(offsets) {
        intervals.push(ByteInterval {
            version,
            offset,
            length: reader.read_7bit_u32()?,
            source,
        });
    }

    FileExtentMap::rebuild(intervals)
}
