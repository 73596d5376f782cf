/*!
GPIO line abstraction for open-drain signaling.

A line is never driven HIGH. Logical HIGH is produced by releasing the line
(input / high impedance) and letting the external pull-up win; logical LOW is
produced by switching the line to output and driving it low.
*/

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sampled logic level of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Convert a raw GPIO value (0 / non-zero)
    pub fn from_raw(value: u8) -> Self {
        if value == 0 {
            Self::Low
        } else {
            Self::High
        }
    }

    pub fn is_high(self) -> bool {
        self == Self::High
    }

    pub fn is_low(self) -> bool {
        self == Self::Low
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("LOW"),
            Self::High => f.write_str("HIGH"),
        }
    }
}

/// Current electrical mode of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMode {
    /// Input / high impedance, pulled up externally
    Released,
    /// Output, forced LOW
    DrivenLow,
}

/// One open-drain signal line.
///
/// `release` must be idempotent: releasing an already released line has no
/// side effect. `sample` is only meaningful while released.
pub trait Line {
    /// Identity of the physical pin, used in log and error messages
    fn name(&self) -> String;

    /// Current mode as last set by this side
    fn mode(&self) -> LineMode;

    /// Let the pull-up take the line HIGH
    fn release(&mut self) -> Result<()>;

    /// Force the line LOW
    fn drive_low(&mut self) -> Result<()>;

    /// Read the instantaneous level of a released line
    fn sample(&mut self) -> Result<Level>;

    /// Drive the line to represent one data bit (1 = released)
    fn set_bit(&mut self, bit: bool) -> Result<()> {
        if bit {
            self.release()
        } else {
            self.drive_low()
        }
    }
}

impl<L: Line + ?Sized> Line for Box<L> {
    fn name(&self) -> String {
        (**self).name()
    }

    fn mode(&self) -> LineMode {
        (**self).mode()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }

    fn drive_low(&mut self) -> Result<()> {
        (**self).drive_low()
    }

    fn sample(&mut self) -> Result<Level> {
        (**self).sample()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_raw() {
        assert_eq!(Level::from_raw(0), Level::Low);
        assert_eq!(Level::from_raw(1), Level::High);
        assert!(Level::from_raw(7).is_high());
    }

    #[test]
    fn test_level_display() {
        assert_eq!(Level::High.to_string(), "HIGH");
        assert_eq!(Level::Low.to_string(), "LOW");
    }
}
