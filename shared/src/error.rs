/*!
Common error types for the thermodisplay components.
*/

use thiserror::Error;

use crate::line::Level;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// Comprehensive error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// A GPIO line could not be configured or read
    #[error("GPIO line {line}: {reason}")]
    Line { line: String, reason: String },

    /// Both lines must read HIGH while released
    #[error("Missing pull-up resistors (DIO: {dio}, CLK: {clk})")]
    MissingPullUp { dio: Level, clk: Level },

    /// A line was sampled while this side drives it low
    #[error("GPIO line {0} sampled while driven low")]
    SampledWhileDriven(String),

    /// Rendering requested before a successful init
    #[error("Display not initialized")]
    NotInitialized,

    /// The display did not acknowledge a byte
    #[error("NACK when sending byte {position} (0x{byte:02X})")]
    Nack { position: usize, byte: u8 },

    /// Payload does not fit a single frame
    #[error("Payload too long: {0} bytes")]
    PayloadTooLong(usize),

    /// No temperature could be obtained from the source
    #[error("Measurement unavailable: {0}")]
    MeasurementUnavailable(String),

    /// Source output did not start with a number
    #[error("Cannot parse temperature from {0:?}")]
    Parse(String),

    /// Parsed value does not fit the display range
    #[error("Temperature {0} out of range")]
    OutOfRange(f64),

    /// Messaging transport errors
    #[error("Transport error: {0}")]
    Transport(String),

    /// I/O errors (process spawning, pipes, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SharedError {
    /// Create a new line configuration error
    pub fn line(line: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Line {
            line: line.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new measurement unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::MeasurementUnavailable(msg.into())
    }

    /// Create a new transport error
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
