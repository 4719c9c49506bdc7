//! Chart interval definitions.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Candle bucket width selectable on a chart.
///
/// The set is closed: only the resolutions the chart widget offers exist,
/// from one minute up to four hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Interval {
    /// 1-minute candles.
    #[default]
    #[serde(rename = "1")]
    M1,
    /// 3-minute candles.
    #[serde(rename = "3")]
    M3,
    /// 5-minute candles.
    #[serde(rename = "5")]
    M5,
    /// 10-minute candles.
    #[serde(rename = "10")]
    M10,
    /// 15-minute candles.
    #[serde(rename = "15")]
    M15,
    /// 30-minute candles.
    #[serde(rename = "30")]
    M30,
    /// 60-minute candles.
    #[serde(rename = "60")]
    M60,
    /// 120-minute candles.
    #[serde(rename = "120")]
    M120,
    /// 240-minute candles.
    #[serde(rename = "240")]
    M240,
}

impl Interval {
    /// Bucket width in minutes.
    #[must_use]
    pub const fn minutes(&self) -> u32 {
        match self {
            Self::M1 => 1,
            Self::M3 => 3,
            Self::M5 => 5,
            Self::M10 => 10,
            Self::M15 => 15,
            Self::M30 => 30,
            Self::M60 => 60,
            Self::M120 => 120,
            Self::M240 => 240,
        }
    }

    /// Bucket width in seconds.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        self.minutes() as i64 * 60
    }

    /// Start of the bucket a unix-seconds timestamp falls into.
    #[must_use]
    pub const fn bucket_start(&self, time: i64) -> i64 {
        let width = self.seconds();
        time.div_euclid(width) * width
    }

    /// Returns the interval as a string identifier (minutes).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1",
            Self::M3 => "3",
            Self::M5 => "5",
            Self::M10 => "10",
            Self::M15 => "15",
            Self::M30 => "30",
            Self::M60 => "60",
            Self::M120 => "120",
            Self::M240 => "240",
        }
    }

    /// Returns all selectable intervals.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::M1,
            Self::M3,
            Self::M5,
            Self::M10,
            Self::M15,
            Self::M30,
            Self::M60,
            Self::M120,
            Self::M240,
        ]
    }

    /// Parse a user-supplied interval, falling back to one minute when the
    /// input is not one of the selectable values.
    #[must_use]
    pub fn parse_lenient(input: &str) -> Self {
        input.parse().unwrap_or_else(|_| {
            tracing::warn!(%input, "unrecognised interval, falling back to 1m");
            Self::M1
        })
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}m", self.as_str())
    }
}

impl FromStr for Interval {
    type Err = IntervalParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches(['m', 'M']) {
            "1" => Ok(Self::M1),
            "3" => Ok(Self::M3),
            "5" => Ok(Self::M5),
            "10" => Ok(Self::M10),
            "15" => Ok(Self::M15),
            "30" => Ok(Self::M30),
            "60" => Ok(Self::M60),
            "120" => Ok(Self::M120),
            "240" => Ok(Self::M240),
            _ => Err(IntervalParseError(s.to_string())),
        }
    }
}

/// Error returned when parsing an invalid interval string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntervalParseError(String);

impl std::fmt::Display for IntervalParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid interval '{}', expected one of: 1, 3, 5, 10, 15, 30, 60, 120, 240 minutes",
            self.0
        )
    }
}

impl std::error::Error for IntervalParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_seconds() {
        assert_eq!(Interval::M1.seconds(), 60);
        assert_eq!(Interval::M30.seconds(), 1800);
        assert_eq!(Interval::M240.seconds(), 14_400);
    }

    #[test]
    fn test_bucket_start_alignment() {
        assert_eq!(Interval::M1.bucket_start(0), 0);
        assert_eq!(Interval::M1.bucket_start(59), 0);
        assert_eq!(Interval::M1.bucket_start(61), 60);
        assert_eq!(Interval::M5.bucket_start(1_700_000_123), 1_700_000_100);
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!("1".parse::<Interval>().unwrap(), Interval::M1);
        assert_eq!("240".parse::<Interval>().unwrap(), Interval::M240);
        assert_eq!("15m".parse::<Interval>().unwrap(), Interval::M15);
        assert!("7".parse::<Interval>().is_err());
        assert!("abc".parse::<Interval>().is_err());
    }

    #[test]
    fn test_parse_lenient_falls_back() {
        assert_eq!(Interval::parse_lenient("5"), Interval::M5);
        assert_eq!(Interval::parse_lenient("7"), Interval::M1);
        assert_eq!(Interval::parse_lenient(""), Interval::M1);
    }
}
