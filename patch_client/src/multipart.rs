use bytes::Bytes;
use futures::Stream;

use crate::body_reader::BodyReader;
use crate::error::{PatchClientError, Result};
use crate::interface::RangePart;
use crate::range::ContentRange;

/// Extracts the boundary of a `multipart/byteranges` content type.
/// `Ok(None)` means the response is not multipart.
pub(crate) fn multipart_boundary(content_type: Option<&str>) -> Result<Option<String>> {
    let Some(content_type) = content_type else {
        return Ok(None);
    };

    let mut params = content_type.split(';');
    let media_type = params.next().unwrap_or_default().trim();
    if !media_type.eq_ignore_ascii_case("multipart/byteranges") {
        return Ok(None);
    }

    params
        .filter_map(|p| p.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_owned())
        .filter(|b| !b.is_empty())
        .map(Some)
        .ok_or_else(|| PatchClientError::protocol(format!("Missing boundary in content type {content_type:?}")))
}

/// Incremental `multipart/byteranges` parser; each part is returned as soon as its data is read.
pub(crate) struct MultipartReader<S> {
    body: BodyReader<S>,
    delimiter: String,
    close_delimiter: String,
    done: bool,
}

impl<S, E> MultipartReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Into<PatchClientError>,
{
    pub fn new(body: BodyReader<S>, boundary: &str) -> Self {
        Self {
            body,
            delimiter: format!("--{boundary}"),
            close_delimiter: format!("--{boundary}--"),
            done: false,
        }
    }

    pub async fn next_part(&mut self) -> Result<Option<RangePart>> {
        if self.done {
            return Ok(None);
        }

        let line = loop {
            match self.body.read_line().await? {
                None => return Err(PatchClientError::protocol("Multipart body ended before the closing boundary")),
                Some(line) if line.is_empty() => continue,
                Some(line) => break line,
            }
        };
        if line == self.close_delimiter {
            self.done = true;
            return Ok(None);
        }
        if line != self.delimiter {
            return Err(PatchClientError::protocol(format!("Invalid boundary line {line:?}")));
        }

        // First Content-Range wins; other part headers are ignored.
        let mut content_range = None;
        loop {
            let Some(line) = self.body.read_line().await? else {
                return Err(PatchClientError::protocol("Multipart body ended inside part headers"));
            };
            if line.is_empty() {
                break;
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(PatchClientError::protocol(format!("Invalid part header {line:?}")));
            };
            if content_range.is_none() && name.trim().eq_ignore_ascii_case("content-range") {
                content_range = Some(ContentRange::parse(value)?);
            }
        }

        let content_range =
            content_range.ok_or_else(|| PatchClientError::protocol("Multipart part is missing Content-Range"))?;
        let len = usize::try_from(content_range.range.len())
            .map_err(|_| PatchClientError::protocol("Multipart part too large"))?;
        let data = self.body.read_exact(len).await?;

        match self.body.read_line().await? {
            Some(line) if line.is_empty() => {},
            _ => return Err(PatchClientError::protocol("Missing line break after part data")),
        }

        Ok(Some(RangePart {
            range: content_range.range,
            data,
        }))
    }
}

/// Builds a `multipart/byteranges` body the way a CDN frames one.
#[cfg(test)]
pub(crate) fn multipart_body(boundary: &str, parts: &[(crate::range::ByteRange, &[u8])], total: u64) -> Vec<u8> {
    let mut body = Vec::new();
    for (range, data) in parts {
        body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n");
        body.extend_from_slice(format!("Content-Range: bytes {range}/{total}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
    }
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;
    use crate::range::ByteRange;

    fn reader_over(body: Vec<u8>, chunk: usize) -> MultipartReader<impl Stream<Item = Result<Bytes>> + Send> {
        let chunks: Vec<Result<Bytes>> = body.chunks(chunk).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
        MultipartReader::new(BodyReader::new(stream::iter(chunks)), "SEP")
    }

    // ==================== Boundary Tests ====================

    #[test]
    fn test_multipart_boundary() {
        assert_eq!(
            multipart_boundary(Some("multipart/byteranges; boundary=3d6b6a416f9b5")).unwrap(),
            Some("3d6b6a416f9b5".to_owned())
        );
        assert_eq!(
            multipart_boundary(Some("Multipart/ByteRanges; charset=x; Boundary=\"quoted\"")).unwrap(),
            Some("quoted".to_owned())
        );
        assert_eq!(multipart_boundary(Some("application/octet-stream")).unwrap(), None);
        assert_eq!(multipart_boundary(None).unwrap(), None);
        assert!(multipart_boundary(Some("multipart/byteranges")).is_err());
    }

    // ==================== Parser Tests ====================

    #[tokio::test]
    async fn test_parse_parts() {
        let data_a: Vec<u8> = (0..10).collect();
        let data_b = b"line\nbreaks\r\ninside".to_vec();
        let parts = [(ByteRange::new(0, 9), &data_a[..]), (ByteRange::new(100, 118), &data_b[..])];
        let body = multipart_body("SEP", &parts, 1000);

        // Tiny chunks exercise reads split across chunk boundaries.
        for chunk in [1, 3, 7, body.len()] {
            let mut reader = reader_over(body.clone(), chunk);
            let first = reader.next_part().await.unwrap().unwrap();
            assert_eq!(first.range, ByteRange::new(0, 9));
            assert_eq!(&first.data[..], &data_a[..]);

            let second = reader.next_part().await.unwrap().unwrap();
            assert_eq!(second.range, ByteRange::new(100, 118));
            assert_eq!(&second.data[..], &data_b[..]);

            assert!(reader.next_part().await.unwrap().is_none());
            assert!(reader.next_part().await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_lf_only_framing() {
        let body = b"--SEP\nContent-Range: bytes 5-7/*\n\nabc\n--SEP--\n".to_vec();
        let mut reader = reader_over(body, 4);
        let part = reader.next_part().await.unwrap().unwrap();
        assert_eq!(part.range, ByteRange::new(5, 7));
        assert_eq!(&part.data[..], b"abc");
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_range() {
        let body = b"--SEP\r\nContent-Type: text/plain\r\n\r\nabc\r\n--SEP--\r\n".to_vec();
        let mut reader = reader_over(body, 16);
        assert!(matches!(reader.next_part().await, Err(PatchClientError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_wrong_boundary() {
        let body = b"--OTHER\r\nContent-Range: bytes 0-0/1\r\n\r\na\r\n--OTHER--\r\n".to_vec();
        let mut reader = reader_over(body, 16);
        assert!(matches!(reader.next_part().await, Err(PatchClientError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let mut body = multipart_body("SEP", &[(ByteRange::new(0, 99), &[7u8; 100][..])], 100);
        body.truncate(body.len() - 40);
        let mut reader = reader_over(body, 16);
        assert!(matches!(reader.next_part().await, Err(PatchClientError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_missing_close_delimiter() {
        let body = b"--SEP\r\nContent-Range: bytes 0-0/1\r\n\r\na\r\n".to_vec();
        let mut reader = reader_over(body, 16);
        assert!(reader.next_part().await.unwrap().is_some());
        assert!(matches!(reader.next_part().await, Err(PatchClientError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_malformed_header_line() {
        let body = b"--SEP\r\nnot a header\r\n\r\na\r\n--SEP--\r\n".to_vec();
        let mut reader = reader_over(body, 16);
        assert!(matches!(reader.next_part().await, Err(PatchClientError::ProtocolError(_))));
    }
}
