use crate::error::{ClutError, Result};
use crate::version::ParsedVersion;

/// Size of the header written for a deleted or expanded region.
pub const EMPTY_BLOCK_HEADER_SIZE: u32 = 24;

/// Deleted and expanded regions are measured in blocks of this many bytes.
pub const BLOCK_GRANULARITY: u32 = 128;

/// A byte range inside a version's patch artifact.
///
/// `size` is the number of bytes to fetch; for compressed blobs that is the compressed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchBlobRef {
    pub offset: u64,
    pub size: u32,
    pub is_compressed: bool,
}

impl PatchBlobRef {
    pub fn end(&self) -> u64 {
        self.offset + self.size as u64
    }
}

/// The persisted tag of an interval's source. The discriminants are part of the file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IntervalKind {
    RawPatch = 0,
    ZeroFill = 1,
    EmptyBlockHeader = 2,
    SplitPatch = 3,
}

impl TryFrom<u8> for IntervalKind {
    type Error = ClutError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(IntervalKind::RawPatch),
            1 => Ok(IntervalKind::ZeroFill),
            2 => Ok(IntervalKind::EmptyBlockHeader),
            3 => Ok(IntervalKind::SplitPatch),
            _ => Err(ClutError::format(format!("Unknown interval kind {value}"))),
        }
    }
}

/// How the bytes of an interval are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalSource {
    /// The interval is the whole (decompressed) blob.
    RawPatch { blob: PatchBlobRef },
    ZeroFill,
    /// A fixed 24-byte header describing `block_count` empty blocks.
    EmptyBlockHeader { block_count: u32 },
    /// The interval starts `sub_offset` bytes into the (decompressed) blob.
    SplitPatch { blob: PatchBlobRef, sub_offset: u32 },
}

/// A half-open byte range `[offset, offset + length)` of one virtual file, tagged with the version that
/// wrote it and where its bytes come from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ByteInterval {
    pub version: ParsedVersion,
    pub offset: u64,
    pub length: u32,
    pub source: IntervalSource,
}

impl ByteInterval {
    pub fn raw_patch(version: ParsedVersion, blob_offset: u64, file_offset: u64, length: u32) -> Self {
        Self {
            version,
            offset: file_offset,
            length,
            source: IntervalSource::RawPatch {
                blob: PatchBlobRef {
                    offset: blob_offset,
                    size: length,
                    is_compressed: false,
                },
            },
        }
    }

    /// A raw-deflate blob of `compressed_size` bytes that inflates to `length` bytes.
    pub fn compressed_patch(
        version: ParsedVersion,
        blob_offset: u64,
        file_offset: u64,
        compressed_size: u32,
        length: u32,
    ) -> Self {
        Self {
            version,
            offset: file_offset,
            length,
            source: IntervalSource::RawPatch {
                blob: PatchBlobRef {
                    offset: blob_offset,
                    size: compressed_size,
                    is_compressed: true,
                },
            },
        }
    }

    pub fn zero_fill(version: ParsedVersion, file_offset: u64, length: u32) -> Self {
        Self {
            version,
            offset: file_offset,
            length,
            source: IntervalSource::ZeroFill,
        }
    }

    pub fn split_patch(
        version: ParsedVersion,
        blob: PatchBlobRef,
        file_offset: u64,
        sub_offset: u32,
        length: u32,
    ) -> Self {
        Self {
            version,
            offset: file_offset,
            length,
            source: IntervalSource::SplitPatch { blob, sub_offset },
        }
    }

    pub fn empty_block_header(version: ParsedVersion, file_offset: u64, block_count: u32) -> Self {
        Self {
            version,
            offset: file_offset,
            length: EMPTY_BLOCK_HEADER_SIZE,
            source: IntervalSource::EmptyBlockHeader { block_count },
        }
    }

    /// The representation of a deleted or expanded region of `length` bytes: an empty block header followed
    /// by zeros up to the end of the region.
    pub fn empty_block(version: ParsedVersion, file_offset: u64, length: u32) -> Result<(Self, Option<Self>)> {
        if length % BLOCK_GRANULARITY != 0 {
            return Err(ClutError::validation(format!(
                "Empty region length {length} at offset {file_offset} is not a multiple of {BLOCK_GRANULARITY}"
            )));
        }

        let header = Self::empty_block_header(version.clone(), file_offset, length / BLOCK_GRANULARITY);
        let zeros = (length != 0).then(|| {
            Self::zero_fill(
                version,
                file_offset + EMPTY_BLOCK_HEADER_SIZE as u64,
                length - EMPTY_BLOCK_HEADER_SIZE,
            )
        });
        Ok((header, zeros))
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length as u64
    }

    pub fn kind(&self) -> IntervalKind {
        match self.source {
            IntervalSource::RawPatch { .. } => IntervalKind::RawPatch,
            IntervalSource::ZeroFill => IntervalKind::ZeroFill,
            IntervalSource::EmptyBlockHeader { .. } => IntervalKind::EmptyBlockHeader,
            IntervalSource::SplitPatch { .. } => IntervalKind::SplitPatch,
        }
    }

    pub fn blob(&self) -> Option<&PatchBlobRef> {
        match &self.source {
            IntervalSource::RawPatch { blob } | IntervalSource::SplitPatch { blob, .. } => Some(blob),
            _ => None,
        }
    }

    /// Offset of this interval's first byte within its (decompressed) blob.
    pub fn sub_offset(&self) -> u32 {
        match self.source {
            IntervalSource::SplitPatch { sub_offset, .. } => sub_offset,
            _ => 0,
        }
    }

    /// Whether the bytes can be produced without fetching anything.
    pub fn is_local(&self) -> bool {
        self.blob().is_none()
    }

    /// The part of this interval covering `[start, end)`, with the blob displacement recomputed so the
    /// remaining bytes keep their provenance.
    pub fn slice(&self, start: u64, end: u64) -> Result<Self> {
        if start < self.offset || end > self.end() || start >= end {
            return Err(ClutError::validation(format!(
                "Cannot slice [{start}, {end}) out of interval [{}, {})",
                self.offset,
                self.end()
            )));
        }

        let length = (end - start) as u32;
        let shift = (start - self.offset) as u32;

        match self.source {
            IntervalSource::ZeroFill => Ok(Self::zero_fill(self.version.clone(), start, length)),
            IntervalSource::EmptyBlockHeader { .. } => Err(ClutError::validation(format!(
                "Cannot slice the empty block header at offset {} (version {})",
                self.offset, self.version
            ))),
            IntervalSource::RawPatch { blob } => Ok(Self::split_patch(self.version.clone(), blob, start, shift, length)),
            IntervalSource::SplitPatch { blob, sub_offset } => {
                let sub_offset = sub_offset
                    .checked_add(shift)
                    .ok_or_else(|| ClutError::validation("Split patch sub offset overflows"))?;
                Ok(Self::split_patch(self.version.clone(), blob, start, sub_offset, length))
            },
        }
    }
}

/// The payload written for an `EmptyBlockHeader` interval.
pub fn empty_block_header_bytes(block_count: u32) -> [u8; EMPTY_BLOCK_HEADER_SIZE as usize] {
    let mut header = [0u8; EMPTY_BLOCK_HEADER_SIZE as usize];
    header[0..4].copy_from_slice(&BLOCK_GRANULARITY.to_le_bytes());
    // Bytes 4..12 hold two zero fields.
    header[12..20].copy_from_slice(&(block_count as u64).wrapping_sub(1).to_le_bytes());
    header
}
