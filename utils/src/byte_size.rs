use std::fmt;
use std::str::FromStr;

use thiserror::Error;

const KB: u64 = 1 << 10;
const MB: u64 = 1 << 20;
const GB: u64 = 1 << 30;
const TB: u64 = 1 << 40;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid byte size '{0}'")]
pub struct ByteSizeParseError(String);

/// A size in bytes that parses from and prints to human readable strings such as `64kb` or `16mb`.
///
/// Units are binary (1kb = 1024 bytes); a bare number is a count of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ByteSize(u64);

impl ByteSize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub const fn kb(n: u64) -> Self {
        Self(n * KB)
    }

    pub const fn mb(n: u64) -> Self {
        Self(n * MB)
    }

    pub const fn gb(n: u64) -> Self {
        Self(n * GB)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// The size as a usize, saturating on targets where it does not fit.
    pub fn as_usize(&self) -> usize {
        self.0.min(usize::MAX as u64) as usize
    }
}

impl FromStr for ByteSize {
    type Err = ByteSizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().to_ascii_lowercase();
        let split = trimmed.find(|c: char| !c.is_ascii_digit()).unwrap_or(trimmed.len());
        let (digits, unit) = trimmed.split_at(split);

        let value: u64 = digits.parse().map_err(|_| ByteSizeParseError(s.to_owned()))?;
        let multiplier = match unit.trim() {
            "" | "b" => 1,
            "k" | "kb" | "kib" => KB,
            "m" | "mb" | "mib" => MB,
            "g" | "gb" | "gib" => GB,
            "t" | "tb" | "tib" => TB,
            _ => return Err(ByteSizeParseError(s.to_owned())),
        };

        value
            .checked_mul(multiplier)
            .map(ByteSize)
            .ok_or_else(|| ByteSizeParseError(s.to_owned()))
    }
}

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        for (unit, name) in [(TB, "tb"), (GB, "gb"), (MB, "mb"), (KB, "kb")] {
            if v >= unit && v % unit == 0 {
                return write!(f, "{}{name}", v / unit);
            }
        }
        write!(f, "{v}")
    }
}

impl From<u64> for ByteSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}
