/*!
Temperature readings and the text format both sources share.

A source produces text whose first line starts (after optional whitespace)
with a decimal number in degrees Celsius, e.g. `"23.4 C"` or `"-2.3"`. The
value is stored as a signed fixed-point count of tenths of a degree.
*/

use std::sync::OnceLock;
use std::time::Instant;

use regex::Regex;

use crate::error::{Result, SharedError};
use crate::protocol::MAX_ABS_TENTHS;

/// One successful measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Temperature in units of 0.1 °C
    pub tenths: i16,
    /// When the value was acquired
    pub at: Instant,
}

impl Reading {
    pub fn new(tenths: i16, at: Instant) -> Self {
        Self { tenths, at }
    }

    /// Temperature in °C
    pub fn celsius(&self) -> f64 {
        f64::from(self.tenths) / 10.0
    }
}

fn number_prefix() -> &'static Regex {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    NUMBER.get_or_init(|| {
        Regex::new(r"^\s*([+-]?(?:\d+(?:\.\d*)?|\.\d+)(?:[eE][+-]?\d+)?)")
            .expect("number pattern is valid")
    })
}

/// Leading decimal number of the first line, in °C
pub fn parse_celsius(text: &str) -> Result<f64> {
    let line = text.lines().next().unwrap_or("");
    let captures = number_prefix()
        .captures(line)
        .ok_or_else(|| SharedError::Parse(line.trim_end().to_string()))?;

    captures[1]
        .parse::<f64>()
        .map_err(|_| SharedError::Parse(line.trim_end().to_string()))
}

/// Convert °C to tenths, rejecting values the display cannot hold
pub fn to_tenths(celsius: f64) -> Result<i16> {
    // Checked before rounding so 999.94 cannot round into range
    if !celsius.is_finite() || celsius.abs() > f64::from(MAX_ABS_TENTHS) / 10.0 {
        return Err(SharedError::OutOfRange(celsius));
    }
    Ok((celsius * 10.0).round() as i16)
}

/// Parse source output straight to tenths of a degree
pub fn parse_tenths(text: &str) -> Result<i16> {
    to_tenths(parse_celsius(text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_unit_suffix() {
        assert_eq!(parse_tenths("23.4 C").unwrap(), 234);
        assert_eq!(parse_tenths("23.4C\n").unwrap(), 234);
        assert_eq!(parse_tenths("  -2.3").unwrap(), -23);
        assert_eq!(parse_tenths("+5").unwrap(), 50);
        assert_eq!(parse_tenths(".5").unwrap(), 5);
        assert_eq!(parse_tenths("1e1").unwrap(), 100);
    }

    #[test]
    fn test_only_first_line_counts() {
        assert_eq!(parse_tenths("21.0\n99.9\n").unwrap(), 210);
        assert!(matches!(parse_tenths("Error: timeout\n21.0"), Err(SharedError::Parse(_))));
    }

    #[test]
    fn test_rejects_non_numbers() {
        assert!(matches!(parse_tenths(""), Err(SharedError::Parse(_))));
        assert!(matches!(parse_tenths("abc"), Err(SharedError::Parse(_))));
        assert!(matches!(parse_tenths("-"), Err(SharedError::Parse(_))));
        assert!(matches!(parse_tenths("nan"), Err(SharedError::Parse(_))));
    }

    #[test]
    fn test_range_guard() {
        assert_eq!(parse_tenths("999.9").unwrap(), 9999);
        assert_eq!(parse_tenths("-999.9").unwrap(), -9999);
        assert!(matches!(parse_tenths("1000"), Err(SharedError::OutOfRange(_))));
        assert!(matches!(parse_tenths("999.94"), Err(SharedError::OutOfRange(_))));
        assert!(matches!(parse_tenths("-999.94"), Err(SharedError::OutOfRange(_))));
        assert!(matches!(parse_tenths("-1234.5"), Err(SharedError::OutOfRange(_))));
        assert!(matches!(parse_tenths("1e400"), Err(SharedError::OutOfRange(_))));
    }

    #[test]
    fn test_reading_celsius() {
        let reading = Reading::new(-23, Instant::now());
        assert!((reading.celsius() + 2.3).abs() < 1e-9);
    }
}
