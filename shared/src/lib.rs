/*!
# Shared Types and Utilities

This crate contains the hardware-independent core of the thermodisplay
components: the TM1637 protocol driver, the temperature classification state
machine and the reconnect policy for remote temperature sources.

## Core Types

- [`Tm1637`] - Open-drain protocol driver over two [`Line`]s
- [`SegmentDisplay`] - Rendering capability implemented by the driver
- [`Frame`] - One display update (address byte + payload)
- [`Classifier`] - Turns reading events into a [`Classification`]
- [`ReconnectPolicy`] - Exponential backoff for remote sources
- [`ControlLoop`] - Acquire, classify, render, wait

## Modules

- [`line`] - GPIO line abstraction
- [`glyph`] - 7-segment patterns
- [`frame`] - Display payload construction
- [`driver`] - Start/stop/byte/ACK signaling
- [`reading`] - Temperature text parsing
- [`classifier`] - Reading classification
- [`backoff`] - Reconnect scheduling
- [`source`] - Temperature sources and the transport boundary
- [`control`] - The control loop
- [`sim`] - Simulated bus with an emulated display
- [`error`] - Common error types
*/

pub mod error;
pub mod line;
pub mod glyph;
pub mod frame;
pub mod driver;
pub mod reading;
pub mod classifier;
pub mod backoff;
pub mod source;
pub mod control;
pub mod sim;

// Re-export commonly used types
pub use error::{SharedError, Result};
pub use line::{Line, Level, LineMode};
pub use frame::Frame;
pub use driver::{DriverSettings, SegmentDisplay, Tm1637};
pub use reading::{parse_tenths, Reading};
pub use classifier::{Classification, Classifier};
pub use backoff::{BackoffSettings, ConnectionState, ReconnectPolicy};
pub use source::{RemoteSource, TemperatureSource, Transport, TransportEvent};
pub use control::ControlLoop;

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    use std::time::Duration;

    /// Address of the first display position
    pub const ADDRESS: u8 = 0xC0;

    /// Data command, auto-increment address mode
    pub const DATA_COMMAND: u8 = 0x40;

    /// Display on, lowest brightness (0x88..=0x8F)
    pub const DISPLAY_COMMAND: u8 = 0x88;

    /// Display off
    pub const DISPLAY_OFF: u8 = 0x80;

    /// Highest brightness level that fits in the display command
    pub const MAX_BRIGHTNESS: u8 = 7;

    /// Maximum number of payload bytes after the address byte
    pub const MAX_PAYLOAD: usize = 4;

    /// Half period of the bit clock (~10 kHz)
    pub const BIT_DELAY_US: u64 = 50;

    /// Settle time before the pull-up check
    pub const SETTLE_DELAY: Duration = Duration::from_millis(1);

    /// Largest magnitude (in tenths of a degree) accepted from a source
    pub const MAX_ABS_TENTHS: i16 = 9999;
}
