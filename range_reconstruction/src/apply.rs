use std::io::Read;

use bytes::Bytes;
use clut_core::{ByteInterval, EMPTY_BLOCK_HEADER_SIZE, IntervalSource, PatchBlobRef, empty_block_header_bytes};
use flate2::read::DeflateDecoder;

use crate::error::{ReconstructionError, Result};
use crate::sink::TargetFile;

/// Writes one interval into `file` and returns the number of bytes written.
///
/// `blob` is the decompressed blob for patch intervals and is ignored for local ones. `zeros` is the
/// buffer zero fills are written from, in chunks of its length.
pub async fn apply_interval(
    file: &dyn TargetFile,
    interval: &ByteInterval,
    blob: Option<&Bytes>,
    zeros: &Bytes,
) -> Result<u64> {
    match interval.source {
        IntervalSource::RawPatch { .. } | IntervalSource::SplitPatch { .. } => {
            let blob = blob.ok_or_else(|| {
                ReconstructionError::InternalError(format!(
                    "No blob data for patch interval at offset {} (version {})",
                    interval.offset, interval.version
                ))
            })?;

            let start = interval.sub_offset() as usize;
            let end = start + interval.length as usize;
            if end > blob.len() {
                return Err(ReconstructionError::CorruptedReconstruction(format!(
                    "Interval at offset {} (version {}) needs blob bytes [{start}, {end}) but the blob holds {}",
                    interval.offset,
                    interval.version,
                    blob.len()
                )));
            }

            file.write_at(blob.slice(start..end), interval.offset).await?;
            Ok(interval.length as u64)
        },
        IntervalSource::ZeroFill => {
            if zeros.is_empty() {
                return Err(ReconstructionError::InternalError("Zero buffer is empty".to_owned()));
            }
            let mut offset = interval.offset;
            let end = interval.end();
            while offset < end {
                let len = (end - offset).min(zeros.len() as u64) as usize;
                file.write_at(zeros.slice(..len), offset).await?;
                offset += len as u64;
            }
            Ok(interval.length as u64)
        },
        IntervalSource::EmptyBlockHeader { block_count } => {
            if interval.length != EMPTY_BLOCK_HEADER_SIZE {
                return Err(ReconstructionError::CorruptedReconstruction(format!(
                    "Empty block header at offset {} has length {}, expected {EMPTY_BLOCK_HEADER_SIZE}",
                    interval.offset, interval.length
                )));
            }
            let header = empty_block_header_bytes(block_count);
            file.write_at(Bytes::copy_from_slice(&header), interval.offset).await?;
            Ok(interval.length as u64)
        },
    }
}

/// Returns the usable bytes of a fetched blob: inflated for raw-deflate blobs, as is otherwise.
///
/// Inflation stops after `required_len` bytes, the furthest any interval reads into the blob.
pub fn decompress_blob(blob: &PatchBlobRef, data: Bytes, required_len: u64) -> Result<Bytes> {
    if data.len() as u64 != blob.size as u64 {
        return Err(ReconstructionError::CorruptedReconstruction(format!(
            "Blob at {} should be {} bytes, got {}",
            blob.offset,
            blob.size,
            data.len()
        )));
    }
    if !blob.is_compressed {
        return Ok(data);
    }

    let mut decoder = DeflateDecoder::new(&data[..]).take(required_len);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ReconstructionError::DecompressionError(format!("Blob at {}: {e}", blob.offset)))?;
    Ok(Bytes::from(decompressed))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clut_core::ParsedVersion;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;

    use super::*;
    use crate::sink::{MemorySink, TargetSink};

    fn v1() -> ParsedVersion {
        ParsedVersion::new(2024, 1, 1, 0, 0)
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    async fn apply_to_memory(interval: &ByteInterval, blob: Option<&Bytes>, zeros: usize) -> Result<Vec<u8>> {
        let sink = MemorySink::new();
        let file = sink.open_file("f").await?;
        apply_interval(file.as_ref(), interval, blob, &Bytes::from(vec![0u8; zeros])).await?;
        Ok(sink.file_contents("f").unwrap_or_default())
    }

    // ==================== Apply Tests ====================

    #[tokio::test]
    async fn test_apply_raw_patch() {
        let interval = ByteInterval::raw_patch(v1(), 1000, 4, 3);
        let blob = Bytes::from_static(b"abc");
        let contents = apply_to_memory(&interval, Some(&blob), 16).await.unwrap();
        assert_eq!(contents, b"\0\0\0\0abc");
    }

    #[tokio::test]
    async fn test_apply_split_patch() {
        let blob_ref = PatchBlobRef {
            offset: 1000,
            size: 10,
            is_compressed: false,
        };
        let interval = ByteInterval::split_patch(v1(), blob_ref, 2, 6, 3);
        let blob = Bytes::from_static(b"0123456789");
        let contents = apply_to_memory(&interval, Some(&blob), 16).await.unwrap();
        assert_eq!(contents, b"\0\0678");
    }

    #[tokio::test]
    async fn test_split_patch_past_blob_end() {
        let blob_ref = PatchBlobRef {
            offset: 0,
            size: 4,
            is_compressed: false,
        };
        let interval = ByteInterval::split_patch(v1(), blob_ref, 0, 3, 2);
        let blob = Bytes::from_static(b"0123");
        assert!(matches!(
            apply_to_memory(&interval, Some(&blob), 16).await,
            Err(ReconstructionError::CorruptedReconstruction(_))
        ));
    }

    #[tokio::test]
    async fn test_patch_without_blob() {
        let interval = ByteInterval::raw_patch(v1(), 0, 0, 3);
        assert!(matches!(
            apply_to_memory(&interval, None, 16).await,
            Err(ReconstructionError::InternalError(_))
        ));
    }

    #[tokio::test]
    async fn test_apply_zero_fill_in_chunks() {
        let sink = MemorySink::new();
        sink.insert_file("f", vec![0xFF; 100]);
        let file = sink.open_file("f").await.unwrap();

        let interval = ByteInterval::zero_fill(v1(), 10, 50);
        let written = apply_interval(file.as_ref(), &interval, None, &Bytes::from(vec![0u8; 16]))
            .await
            .unwrap();

        assert_eq!(written, 50);
        let contents = sink.file_contents("f").unwrap();
        assert!(contents[..10].iter().all(|&b| b == 0xFF));
        assert!(contents[10..60].iter().all(|&b| b == 0));
        assert!(contents[60..].iter().all(|&b| b == 0xFF));
        // 16 + 16 + 16 + 2
        assert_eq!(sink.write_count(), 4);
    }

    #[tokio::test]
    async fn test_apply_empty_block_header() {
        let interval = ByteInterval::empty_block_header(v1(), 128, 4);
        let contents = apply_to_memory(&interval, None, 16).await.unwrap();
        assert_eq!(&contents[128..], &empty_block_header_bytes(4));
    }

    #[tokio::test]
    async fn test_empty_block_header_wrong_length() {
        let mut interval = ByteInterval::empty_block_header(v1(), 0, 1);
        interval.length = 20;
        assert!(matches!(
            apply_to_memory(&interval, None, 16).await,
            Err(ReconstructionError::CorruptedReconstruction(_))
        ));
    }

    // ==================== Decompression Tests ====================

    #[test]
    fn test_decompress_blob() {
        let plain: Vec<u8> = (0..5000u32).map(|i| (i % 7) as u8).collect();
        let compressed = deflate(&plain);
        let blob = PatchBlobRef {
            offset: 64,
            size: compressed.len() as u32,
            is_compressed: true,
        };
        assert_eq!(&decompress_blob(&blob, Bytes::from(compressed), plain.len() as u64).unwrap()[..], &plain[..]);
    }

    #[test]
    fn test_decompression_stops_at_required_len() {
        // A few hundred bytes that inflate to 16 MiB.
        let bomb = deflate(&vec![0u8; 16 << 20]);
        let blob = PatchBlobRef {
            offset: 0,
            size: bomb.len() as u32,
            is_compressed: true,
        };
        let inflated = decompress_blob(&blob, Bytes::from(bomb), 4096).unwrap();
        assert_eq!(inflated.len(), 4096);
        assert!(inflated.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_uncompressed_blob_passes_through() {
        let blob = PatchBlobRef {
            offset: 0,
            size: 3,
            is_compressed: false,
        };
        assert_eq!(&decompress_blob(&blob, Bytes::from_static(b"abc"), 3).unwrap()[..], b"abc");
    }

    #[test]
    fn test_decompress_errors() {
        let blob = PatchBlobRef {
            offset: 0,
            size: 4,
            is_compressed: true,
        };
        assert!(matches!(
            decompress_blob(&blob, Bytes::from_static(b"\xff\xff\xff\xff"), 16),
            Err(ReconstructionError::DecompressionError(_))
        ));
        assert!(matches!(
            decompress_blob(&blob, Bytes::from_static(b"abc"), 16),
            Err(ReconstructionError::CorruptedReconstruction(_))
        ));
    }
}
