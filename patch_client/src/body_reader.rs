use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};

use crate::error::{PatchClientError, Result};

/// Longest line accepted while scanning multipart framing.
const MAX_LINE_LENGTH: usize = 8 * 1024;

/// Buffered reader over a chunked response body, offering line and exact-length reads.
pub(crate) struct BodyReader<S> {
    stream: Pin<Box<S>>,
    buffer: BytesMut,
    finished: bool,
}

impl<S, E> BodyReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Into<PatchClientError>,
{
    pub fn new(stream: S) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: BytesMut::new(),
            finished: false,
        }
    }

    /// Pulls the next chunk into the buffer; false once the body is exhausted.
    async fn fill(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }
        match self.stream.next().await {
            Some(Ok(chunk)) => {
                self.buffer.extend_from_slice(&chunk);
                Ok(true)
            },
            Some(Err(e)) => Err(e.into()),
            None => {
                self.finished = true;
                Ok(false)
            },
        }
    }

    /// Reads the next line without its `\n` or `\r\n` terminator.
    /// Returns `None` only when the body is exhausted and nothing is buffered.
    pub async fn read_line(&mut self) -> Result<Option<String>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buffer[scanned..].iter().position(|&b| b == b'\n') {
                let raw = self.buffer.split_to(scanned + pos + 1);
                return decode_line(&raw[..raw.len() - 1]).map(Some);
            }
            scanned = self.buffer.len();
            if scanned > MAX_LINE_LENGTH {
                return Err(PatchClientError::protocol("Multipart line exceeds maximum length"));
            }

            if !self.fill().await? {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let raw = self.buffer.split();
                return decode_line(&raw).map(Some);
            }
        }
    }

    /// Reads exactly `len` bytes; running out of body first is a protocol error.
    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        while self.buffer.len() < len {
            if !self.fill().await? {
                return Err(PatchClientError::protocol(format!(
                    "Body ended after {} of {len} expected bytes",
                    self.buffer.len()
                )));
            }
        }
        Ok(self.buffer.split_to(len).freeze())
    }
}

fn decode_line(raw: &[u8]) -> Result<String> {
    let line = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8(line.to_vec()).map_err(|_| PatchClientError::protocol("Multipart framing is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    fn reader(chunks: &[&'static [u8]]) -> BodyReader<impl Stream<Item = Result<Bytes>> + Send> {
        let chunks: Vec<Result<Bytes>> = chunks.iter().map(|c| Ok(Bytes::from_static(c))).collect();
        BodyReader::new(stream::iter(chunks))
    }

    #[tokio::test]
    async fn test_read_lines_across_chunks() {
        let mut reader = reader(&[b"fir", b"st\r\nsec", b"ond\n", b"\r\nlast"]);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("second"));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("last"));
        assert_eq!(reader.read_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_exact_then_line() {
        let mut reader = reader(&[b"\x00\x01", b"\x02\x03\r\n", b"tail\n"]);
        assert_eq!(&reader.read_exact(4).await.unwrap()[..], &[0, 1, 2, 3]);
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some(""));
        assert_eq!(reader.read_line().await.unwrap().as_deref(), Some("tail"));
    }

    #[tokio::test]
    async fn test_read_exact_short_body() {
        let mut reader = reader(&[b"abc"]);
        assert!(matches!(reader.read_exact(4).await, Err(PatchClientError::ProtocolError(_))));
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"ab")), Err(PatchClientError::Cancelled)];
        let mut reader = BodyReader::new(stream::iter(chunks));
        assert!(matches!(reader.read_line().await, Err(PatchClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_overlong_line() {
        let chunks: Vec<Result<Bytes>> = (0..4).map(|_| Ok(Bytes::from(vec![b'x'; 4096]))).collect();
        let mut reader = BodyReader::new(stream::iter(chunks));
        assert!(matches!(reader.read_line().await, Err(PatchClientError::ProtocolError(_))));
    }
}
