//! The persisted CLUT file: a small uncompressed header followed by an optionally compressed payload.

mod binary;
mod header;
mod payload;

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
pub use header::{CLUT_MAGIC, ClutHeader, CompressionType, FormatVersion, PlatformId};
use tracing::debug;

use self::binary::{MAX_PREALLOCATION, read_len_prefixed};

use crate::error::{ClutError, Result};
use crate::snapshot::Snapshot;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 11;
const BROTLI_WINDOW: u32 = 22;

impl Snapshot {
    /// Reads a snapshot and rebuilds every file map, checking it for overlaps.
    pub fn read_from(reader: &mut impl Read) -> Result<Snapshot> {
        let header = ClutHeader::read(reader)?;

        let stored = read_len_prefixed(reader, header.stored_size())?;

        // One byte past the stated size is enough to detect an oversized payload.
        let limit = header.decompressed_size as u64 + 1;
        let payload = match header.compression {
            CompressionType::None => stored,
            CompressionType::Zlib => inflate(ZlibDecoder::new(&stored[..]).take(limit), header.decompressed_size)?,
            CompressionType::Brotli => inflate(
                brotli::Decompressor::new(&stored[..], BROTLI_BUFFER_SIZE).take(limit),
                header.decompressed_size,
            )?,
        };

        if payload.len() != header.decompressed_size {
            return Err(ClutError::FormatError(format!(
                "Payload decompressed to {} bytes, header says {}",
                payload.len(),
                header.decompressed_size
            )));
        }

        let contents = payload::decode_payload(&payload)?;

        debug!(
            repository = %header.repository,
            version = %header.version,
            files = contents.files.len(),
            folders = contents.folders.len(),
            "Read snapshot"
        );

        Ok(Snapshot {
            repository: header.repository,
            version: header.version,
            base_patch_url: header.base_patch_url,
            platform: header.platform,
            folders: contents.folders,
            files: contents.files,
        })
    }

    pub fn write_to(&self, writer: &mut impl Write, compression: CompressionType) -> Result<()> {
        let payload = payload::encode_payload(self)?;

        let stored = match compression {
            CompressionType::None => None,
            CompressionType::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
                encoder.write_all(&payload)?;
                Some(encoder.finish()?)
            },
            CompressionType::Brotli => {
                let mut encoder =
                    brotli::CompressorWriter::new(Vec::new(), BROTLI_BUFFER_SIZE, BROTLI_QUALITY, BROTLI_WINDOW);
                encoder.write_all(&payload)?;
                Some(encoder.into_inner())
            },
        };

        let header = ClutHeader {
            format_version: FormatVersion::Initial,
            compression,
            platform: self.platform,
            repository: self.repository.clone(),
            version: self.version.clone(),
            base_patch_url: self.base_patch_url.clone(),
            decompressed_size: payload.len(),
            compressed_size: stored.as_ref().map(|s| s.len()).unwrap_or(payload.len()),
        };
        header.write(writer)?;
        writer.write_all(stored.as_deref().unwrap_or(&payload))?;

        debug!(
            repository = %self.repository,
            version = %self.version,
            %compression,
            payload_size = payload.len(),
            stored_size = header.stored_size(),
            "Wrote snapshot"
        );
        Ok(())
    }
}

fn inflate(mut decoder: impl Read, expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected.min(MAX_PREALLOCATION));
    decoder
        .read_to_end(&mut out)
        .map_err(|e| ClutError::FormatError(format!("Failed to decompress payload: {e}")))?;
    Ok(out)
}
