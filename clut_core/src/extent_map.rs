use crate::error::{ClutError, Result};
use crate::interval::ByteInterval;

/// The byte layout of one virtual file: intervals sorted by offset that never overlap.
///
/// Every mutation goes through [`FileExtentMap::insert`], which overlays the new interval on whatever was
/// there before.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileExtentMap {
    intervals: Vec<ByteInterval>,
}

impl FileExtentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a map by inserting every interval in order into an empty map, then checks the result.
    pub fn rebuild(intervals: impl IntoIterator<Item = ByteInterval>) -> Result<Self> {
        let mut map = Self::new();
        for interval in intervals {
            map.insert(interval)?;
        }
        map.verify()?;
        Ok(map)
    }

    /// Overlays `interval` on the map.
    ///
    /// Afterwards every byte of `[interval.offset, interval.end())` is covered by `interval` itself. Stored
    /// intervals that straddle either boundary are trimmed, keeping the provenance of their remaining bytes;
    /// an interval straddling both is split in two. If a required trim is impossible the map is unchanged.
    pub fn insert(&mut self, interval: ByteInterval) -> Result<()> {
        if interval.length == 0 {
            return Ok(());
        }

        let start = interval.offset;
        let end = interval.end();

        // Stored intervals are ordered by both offset and end, so both searches are valid.
        let first = self.intervals.partition_point(|i| i.end() <= start);
        let last = self.intervals.partition_point(|i| i.offset < end);

        let mut replacement = Vec::with_capacity(3);
        let mut right = None;

        if first < last {
            let head = &self.intervals[first];
            if head.offset < start {
                replacement.push(head.slice(head.offset, start)?);
            }

            let tail = &self.intervals[last - 1];
            if tail.end() > end {
                right = Some(tail.slice(end, tail.end())?);
            }
        }

        replacement.push(interval);
        replacement.extend(right);

        self.intervals.splice(first..last, replacement);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    pub fn intervals(&self) -> &[ByteInterval] {
        &self.intervals
    }

    pub fn into_intervals(self) -> Vec<ByteInterval> {
        self.intervals
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ByteInterval> {
        self.intervals.iter()
    }

    /// The interval that currently provides the byte at `offset`, if any.
    pub fn lookup(&self, offset: u64) -> Option<&ByteInterval> {
        let idx = self.intervals.partition_point(|i| i.end() <= offset);
        self.intervals.get(idx).filter(|i| i.offset <= offset)
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// One past the last byte covered by any interval.
    pub fn end(&self) -> u64 {
        self.intervals.last().map(|i| i.end()).unwrap_or(0)
    }

    /// Checks that intervals are ordered by offset, ordered by end, and pairwise disjoint.
    pub fn verify(&self) -> Result<()> {
        for pair in self.intervals.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if prev.offset >= cur.offset {
                return Err(ClutError::validation(format!(
                    "Intervals out of order by offset: {} then {}",
                    prev.offset, cur.offset
                )));
            }
            if prev.end() > cur.end() {
                return Err(ClutError::validation(format!(
                    "Intervals out of order by end: {} then {}",
                    prev.end(),
                    cur.end()
                )));
            }
            if prev.end() > cur.offset {
                return Err(ClutError::validation(format!(
                    "Overlapping intervals [{}, {}) and [{}, {})",
                    prev.offset,
                    prev.end(),
                    cur.offset,
                    cur.end()
                )));
            }
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a FileExtentMap {
    type Item = &'a ByteInterval;
    type IntoIter = std::slice::Iter<'a, ByteInterval>;

    fn into_iter(self) -> Self::IntoIter {
        self.intervals.iter()
    }
}
