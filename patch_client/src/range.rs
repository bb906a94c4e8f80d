use std::fmt;
use std::str::FromStr;

use crate::error::{PatchClientError, Result};

/// An inclusive byte range as written in HTTP `Range` and `Content-Range` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end_inclusive: u64,
}

impl ByteRange {
    pub fn new(start: u64, end_inclusive: u64) -> Self {
        debug_assert!(start <= end_inclusive);
        Self { start, end_inclusive }
    }

    /// The range covering `len` bytes from `offset`, or `None` when `len` is zero.
    pub fn from_offset_len(offset: u64, len: u64) -> Option<Self> {
        (len > 0).then(|| Self::new(offset, offset + len - 1))
    }

    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end_inclusive - self.start + 1
    }

    /// Exclusive end.
    pub fn end(&self) -> u64 {
        self.end_inclusive + 1
    }

    pub fn contains(&self, other: &ByteRange) -> bool {
        self.start <= other.start && other.end_inclusive <= self.end_inclusive
    }

    /// Length of this range's `a-b` fragment inside a `Range` header.
    pub fn header_len(&self) -> usize {
        decimal_len(self.start) + 1 + decimal_len(self.end_inclusive)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end_inclusive)
    }
}

fn decimal_len(value: u64) -> usize {
    value.checked_ilog10().map_or(1, |digits| digits as usize + 1)
}

const RANGE_UNIT_PREFIX: &str = "bytes=";

/// Formats `ranges` as a `Range` header value, e.g. `bytes=0-99,200-299`.
pub fn format_range_header(ranges: &[ByteRange]) -> String {
    let mut header = String::with_capacity(range_header_len(ranges));
    header.push_str(RANGE_UNIT_PREFIX);
    for (i, range) in ranges.iter().enumerate() {
        if i > 0 {
            header.push(',');
        }
        header.push_str(&range.to_string());
    }
    header
}

/// The length of [`format_range_header`]'s output without building it.
pub fn range_header_len(ranges: &[ByteRange]) -> usize {
    RANGE_UNIT_PREFIX.len() + ranges.iter().map(ByteRange::header_len).sum::<usize>() + ranges.len().saturating_sub(1)
}

pub fn total_len(ranges: &[ByteRange]) -> u64 {
    ranges.iter().map(ByteRange::len).sum()
}

/// A parsed `Content-Range` header: `bytes <start>-<end>/<complete length or *>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub range: ByteRange,
    pub complete_length: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Result<Self> {
        let invalid = || PatchClientError::protocol(format!("Invalid Content-Range header {value:?}"));

        let (unit, rest) = value.trim().split_once(' ').ok_or_else(invalid)?;
        if !unit.eq_ignore_ascii_case("bytes") {
            return Err(invalid());
        }

        let (range, complete) = rest.trim().split_once('/').ok_or_else(invalid)?;
        let complete_length = match complete.trim() {
            "*" => None,
            len => Some(len.parse::<u64>().map_err(|_| invalid())?),
        };

        // `*/<len>` (unsatisfied range) has no '-' and fails here.
        let (start, end) = range.trim().split_once('-').ok_or_else(invalid)?;
        let start = start.trim().parse::<u64>().map_err(|_| invalid())?;
        let end_inclusive = end.trim().parse::<u64>().map_err(|_| invalid())?;

        if end_inclusive < start {
            return Err(invalid());
        }
        if let Some(len) = complete_length
            && end_inclusive >= len
        {
            return Err(invalid());
        }

        Ok(Self {
            range: ByteRange::new(start, end_inclusive),
            complete_length,
        })
    }
}

impl FromStr for ContentRange {
    type Err = PatchClientError;

    fn from_str(s: &str) -> Result<Self> {
        ContentRange::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_range_basics() {
        let range = ByteRange::from_offset_len(100, 50).unwrap();
        assert_eq!(range, ByteRange::new(100, 149));
        assert_eq!(range.len(), 50);
        assert_eq!(range.end(), 150);
        assert!(range.contains(&ByteRange::new(120, 149)));
        assert!(!range.contains(&ByteRange::new(120, 150)));
        assert!(ByteRange::from_offset_len(5, 0).is_none());
    }

    #[test]
    fn test_format_range_header() {
        let ranges = [ByteRange::new(0, 9), ByteRange::new(1000, 123456)];
        let header = format_range_header(&ranges);
        assert_eq!(header, "bytes=0-9,1000-123456");
        assert_eq!(range_header_len(&ranges), header.len());

        assert_eq!(format_range_header(&[]), "bytes=");
        assert_eq!(range_header_len(&[]), "bytes=".len());
    }

    #[test]
    fn test_header_len_digit_boundaries() {
        for (start, end) in [(0, 9), (9, 10), (99, 100), (999_999, 1_000_000), (0, u64::MAX - 1)] {
            let range = ByteRange::new(start, end);
            assert_eq!(range.header_len(), range.to_string().len());
        }
    }

    #[test]
    fn test_total_len() {
        assert_eq!(total_len(&[ByteRange::new(0, 9), ByteRange::new(20, 29)]), 20);
    }

    #[test]
    fn test_parse_content_range() {
        let parsed = ContentRange::parse("bytes 0-99/1000").unwrap();
        assert_eq!(parsed.range, ByteRange::new(0, 99));
        assert_eq!(parsed.complete_length, Some(1000));

        let parsed: ContentRange = " Bytes 5-5/* ".parse().unwrap();
        assert_eq!(parsed.range, ByteRange::new(5, 5));
        assert_eq!(parsed.complete_length, None);
    }

    #[test]
    fn test_parse_content_range_rejects_malformed() {
        for value in [
            "",
            "bytes",
            "bytes 0-99",
            "items 0-99/100",
            "bytes */1000",
            "bytes 10-5/100",
            "bytes 0-100/100",
            "bytes a-b/100",
            "bytes 0-9/x",
        ] {
            assert!(
                matches!(ContentRange::parse(value), Err(PatchClientError::ProtocolError(_))),
                "accepted {value:?}"
            );
        }
    }
}
