use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ClutError, Result};

/// A patch version identifier such as `2024.03.27.0000.0000` or `H2017.06.06.0000.0001a`.
///
/// Versions are totally ordered: by date, part and revision, then historic versions before
/// non-historic ones, then by section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ParsedVersion {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub part: u32,
    pub revision: u32,
    pub historic: bool,
    /// Trailing lowercase suffix; never `Some("")`.
    pub section: Option<Arc<str>>,
}

impl ParsedVersion {
    /// The version of an empty snapshot. Every real version orders after it.
    pub const EPOCH: ParsedVersion = ParsedVersion {
        year: 0,
        month: 0,
        day: 0,
        part: 0,
        revision: 0,
        historic: false,
        section: None,
    };

    pub fn new(year: u32, month: u32, day: u32, part: u32, revision: u32) -> Self {
        Self {
            year,
            month,
            day,
            part,
            revision,
            historic: false,
            section: None,
        }
    }

    pub fn with_historic(self, historic: bool) -> Self {
        Self { historic, ..self }
    }

    pub fn with_section(self, section: &str) -> Self {
        Self {
            section: (!section.is_empty()).then(|| Arc::from(section)),
            ..self
        }
    }

    pub fn is_epoch(&self) -> bool {
        *self == Self::EPOCH
    }

    /// The name of this version's patch artifact; non-historic versions carry an explicit `D` prefix.
    pub fn patch_name(&self) -> String {
        if self.historic {
            self.to_string()
        } else {
            format!("D{self}")
        }
    }

    fn section_str(&self) -> &str {
        self.section.as_deref().unwrap_or("")
    }
}

impl Ord for ParsedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.year, self.month, self.day, self.part, self.revision)
            .cmp(&(other.year, other.month, other.day, other.part, other.revision))
            // historic first
            .then_with(|| other.historic.cmp(&self.historic))
            .then_with(|| self.section_str().cmp(other.section_str()))
    }
}

impl PartialOrd for ParsedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ParsedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.historic {
            f.write_str("H")?;
        }
        write!(
            f,
            "{:04}.{:02}.{:02}.{:04}.{:04}{}",
            self.year,
            self.month,
            self.day,
            self.part,
            self.revision,
            self.section_str()
        )
    }
}

impl FromStr for ParsedVersion {
    type Err = ClutError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ClutError::validation(format!("Invalid version string {s:?}"));

        let (historic, rest) = if let Some(rest) = s.strip_prefix('H') {
            (true, rest)
        } else if let Some(rest) = s.strip_prefix('D') {
            (false, rest)
        } else {
            (false, s)
        };

        let numeric = rest.trim_end_matches(|c: char| c.is_ascii_lowercase());
        let section = &rest[numeric.len()..];

        let fields = numeric
            .split('.')
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>>>()?;
        let [year, month, day, part, revision] = fields[..] else {
            return Err(invalid());
        };

        Ok(ParsedVersion::new(year, month, day, part, revision)
            .with_historic(historic)
            .with_section(section))
    }
}

impl Serialize for ParsedVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ParsedVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use more_asserts::assert_lt;

    use super::*;

    fn v(s: &str) -> ParsedVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let version = v("H2017.06.06.0000.0001a");
        assert!(version.historic);
        assert_eq!(version.section.as_deref(), Some("a"));
        assert_eq!((version.year, version.month, version.day, version.part, version.revision), (2017, 6, 6, 0, 1));
        assert_eq!(version.to_string(), "H2017.06.06.0000.0001a");
        assert_eq!(version.patch_name(), "H2017.06.06.0000.0001a");

        let version = v("D2024.03.27.0000.0000");
        assert!(!version.historic);
        assert_eq!(version.to_string(), "2024.03.27.0000.0000");
        assert_eq!(version.patch_name(), "D2024.03.27.0000.0000");
        assert_eq!(v("2024.03.27.0000.0000"), version);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("2024.03.27.0000".parse::<ParsedVersion>().is_err());
        assert!("2024.03.27.0000.0000.1".parse::<ParsedVersion>().is_err());
        assert!("2024.0x.27.0000.0000".parse::<ParsedVersion>().is_err());
        assert!("".parse::<ParsedVersion>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert_lt!(v("2023.01.01.0000.0000"), v("2023.01.02.0000.0000"));
        assert_lt!(v("2023.01.01.0000.0000"), v("2023.01.01.0000.0001"));
        assert_lt!(v("H2023.01.01.0000.0000"), v("D2023.01.01.0000.0000"));
        assert_lt!(v("2023.01.01.0000.0000"), v("2023.01.01.0000.0000a"));
        assert_lt!(v("2023.01.01.0000.0000a"), v("2023.01.01.0000.0000b"));
        assert_lt!(ParsedVersion::EPOCH, v("H2010.01.01.0000.0000"));
    }

    #[test]
    fn test_serde_as_string() {
        let version = v("H2017.06.06.0000.0001a");
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"H2017.06.06.0000.0001a\"");
        assert_eq!(serde_json::from_str::<ParsedVersion>(&json).unwrap(), version);
    }
}
