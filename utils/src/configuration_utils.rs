use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::ByteSize;

/// A value that can be read from a configuration environment variable.
///
/// Implementors provide `parse_user_value`; `parse` handles the fallback to the default and the logging.
pub trait ParsableConfigValue: std::fmt::Debug + Sized {
    fn parse_user_value(value: &str) -> Option<Self>;

    /// Parse the value, returning the default if it can't be parsed or is absent.
    fn parse(variable_name: &str, value: Option<String>, default: Self) -> Self {
        let Some(v) = value else {
            return default;
        };

        match Self::parse_user_value(&v) {
            Some(parsed) => {
                info!("Config: {variable_name} = {parsed:?} (user set)");
                parsed
            },
            None => {
                warn!(
                    "Configuration value {v} for {variable_name} cannot be parsed into correct type; reverting to default."
                );
                default
            },
        }
    }
}

macro_rules! impl_parsable_from_str {
    ($($t:ty),+) => {
        $(
            impl ParsableConfigValue for $t {
                fn parse_user_value(value: &str) -> Option<Self> {
                    value.trim().parse::<$t>().ok()
                }
            }
        )+
    };
}

impl_parsable_from_str!(u16, u32, u64, usize, i32, i64, f64);

impl ParsableConfigValue for bool {
    fn parse_user_value(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "y" | "on" => Some(true),
            "0" | "false" | "no" | "n" | "off" | "" => Some(false),
            _ => None,
        }
    }
}

impl ParsableConfigValue for String {
    fn parse_user_value(value: &str) -> Option<Self> {
        Some(value.to_owned())
    }
}

impl ParsableConfigValue for ByteSize {
    fn parse_user_value(value: &str) -> Option<Self> {
        ByteSize::from_str(value).ok()
    }
}

impl ParsableConfigValue for Duration {
    fn parse_user_value(value: &str) -> Option<Self> {
        parse_duration(value)
    }
}

/// Comma separated list of durations, e.g. `500ms,1s,2s`.
impl ParsableConfigValue for Vec<Duration> {
    fn parse_user_value(value: &str) -> Option<Self> {
        value
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(parse_duration)
            .collect()
    }
}

/// An unset or empty value maps to `None`.
impl ParsableConfigValue for Option<PathBuf> {
    fn parse_user_value(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            Some(None)
        } else {
            Some(Some(PathBuf::from(value)))
        }
    }
}

/// Parses durations written as `<number><unit>` with unit one of `ms`, `s`, `m`, `h`.
/// A bare number is a count of seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim().to_ascii_lowercase();
    let split = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    let (digits, unit) = value.split_at(split);
    let n: u64 = digits.parse().ok()?;

    match unit.trim() {
        "ms" => Some(Duration::from_millis(n)),
        "" | "s" | "sec" | "secs" => Some(Duration::from_secs(n)),
        "m" | "min" | "mins" => n.checked_mul(60).map(Duration::from_secs),
        "h" | "hr" | "hrs" => n.checked_mul(3600).map(Duration::from_secs),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_falls_back_to_default() {
        assert_eq!(usize::parse("X", Some("12".to_owned()), 3), 12);
        assert_eq!(usize::parse("X", Some("twelve".to_owned()), 3), 3);
        assert_eq!(usize::parse("X", None, 3), 3);
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(bool::parse_user_value("TRUE"), Some(true));
        assert_eq!(bool::parse_user_value("off"), Some(false));
        assert_eq!(bool::parse_user_value("maybe"), None);
    }

    #[test]
    fn test_parse_durations() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("3 days"), None);

        let list = Vec::<Duration>::parse_user_value("500ms, 1s,2s").unwrap();
        assert_eq!(list, vec![Duration::from_millis(500), Duration::from_secs(1), Duration::from_secs(2)]);
        assert!(Vec::<Duration>::parse_user_value("1s,abc").is_none());
    }

    #[test]
    fn test_parse_optional_path() {
        assert_eq!(Option::<PathBuf>::parse_user_value(""), Some(None));
        assert_eq!(Option::<PathBuf>::parse_user_value("/tmp/patches"), Some(Some(PathBuf::from("/tmp/patches"))));
    }
}
