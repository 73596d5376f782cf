/*!
TM1637 protocol driver.

Open-drain emulation on two lines: a line is released (pull-up gives HIGH) or
driven LOW, never driven HIGH. Every step of the protocol is separated by the
same fixed bit delay so the timing does not depend on the data.

Wiring:
- CLK -> GPIO + 4.7k pull-up to 3.3V
- DIO -> GPIO + 4.7k pull-up to 3.3V
*/

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::classifier::Classification;
use crate::error::{Result, SharedError};
use crate::frame::Frame;
use crate::line::Line;
use crate::protocol::{
    BIT_DELAY_US, DATA_COMMAND, DISPLAY_COMMAND, MAX_BRIGHTNESS, SETTLE_DELAY,
};

/// Timing and brightness settings for the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Delay between protocol steps in microseconds
    pub bit_delay_us: u64,

    /// Brightness 0 (lowest) ..= 7 (highest)
    pub brightness: u8,
}

impl DriverSettings {
    /// Reject settings the display command cannot encode
    pub fn validate(&self) -> Result<()> {
        if self.brightness > MAX_BRIGHTNESS {
            return Err(SharedError::config(format!(
                "brightness must be 0..={}, got {}",
                MAX_BRIGHTNESS, self.brightness
            )));
        }
        Ok(())
    }
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            bit_delay_us: BIT_DELAY_US,
            brightness: 0,
        }
    }
}

/// Rendering capability shared by every display backend.
///
/// Rendering calls report failure through their result and never panic; a
/// failed call leaves nothing to retry, the next cycle starts from scratch.
pub trait SegmentDisplay {
    /// Prepare the hardware; the display must not be used if this fails
    fn init(&mut self) -> Result<()>;

    /// Release the hardware. Idempotent.
    fn cleanup(&mut self);

    /// Show a signed value in tenths of a degree
    fn write_number(&mut self, tenths: i16) -> Result<()>;

    /// Show "Err"
    fn write_error(&mut self) -> Result<()>;

    /// Show the no-data-yet symbol
    fn write_waiting(&mut self) -> Result<()>;

    /// Show the stale-data symbol
    fn write_stale(&mut self) -> Result<()>;

    /// Show whatever matches the classification
    fn render(&mut self, classification: Classification) -> Result<()> {
        match classification {
            Classification::Valid(tenths) => self.write_number(tenths),
            Classification::NotYetAvailable => self.write_waiting(),
            Classification::Stale => self.write_stale(),
            Classification::ParseError => self.write_error(),
        }
    }
}

impl<D: SegmentDisplay + ?Sized> SegmentDisplay for Box<D> {
    fn init(&mut self) -> Result<()> {
        (**self).init()
    }

    fn cleanup(&mut self) {
        (**self).cleanup()
    }

    fn write_number(&mut self, tenths: i16) -> Result<()> {
        (**self).write_number(tenths)
    }

    fn write_error(&mut self) -> Result<()> {
        (**self).write_error()
    }

    fn write_waiting(&mut self) -> Result<()> {
        (**self).write_waiting()
    }

    fn write_stale(&mut self) -> Result<()> {
        (**self).write_stale()
    }
}

/// TM1637 driver over a DIO and a CLK line.
///
/// The driver owns both lines exclusively, so there is only ever one writer.
pub struct Tm1637<L: Line> {
    dio: L,
    clk: L,
    bit_delay: Duration,
    display_command: u8,
    ready: bool,
}

impl<L: Line> Tm1637<L> {
    /// Create a driver; call [`SegmentDisplay::init`] before rendering
    pub fn new(dio: L, clk: L, settings: &DriverSettings) -> Self {
        let brightness = settings.brightness.min(MAX_BRIGHTNESS);
        Self {
            dio,
            clk,
            bit_delay: Duration::from_micros(settings.bit_delay_us),
            display_command: DISPLAY_COMMAND | brightness,
            ready: false,
        }
    }

    /// Whether init succeeded and cleanup has not run yet
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    fn delay(&self) {
        if !self.bit_delay.is_zero() {
            thread::sleep(self.bit_delay);
        }
    }

    /// START: DIO goes LOW while CLK is HIGH
    fn start(&mut self) -> Result<()> {
        self.dio.release()?;
        self.clk.release()?;
        self.delay();
        self.dio.drive_low()?;
        self.delay();
        self.clk.drive_low()
    }

    /// STOP: DIO goes HIGH while CLK is HIGH
    fn stop(&mut self) -> Result<()> {
        self.dio.drive_low()?;
        self.clk.release()?;
        self.delay();
        self.dio.release()?;
        self.delay();
        Ok(())
    }

    /// Send one byte LSB first, returns true on ACK
    fn write_byte(&mut self, byte: u8) -> Result<bool> {
        let mut b = byte;
        for _ in 0..8 {
            self.dio.set_bit(b & 0x01 != 0)?;
            self.delay();
            self.clk.release()?;
            self.delay();
            self.clk.drive_low()?;
            b >>= 1;
        }

        // Ninth clock: the display pulls DIO low to acknowledge
        self.dio.release()?;
        self.delay();
        self.clk.release()?;
        self.delay();
        let ack = self.dio.sample()?.is_low();
        self.clk.drive_low()?;

        Ok(ack)
    }

    /// Send a single command byte in its own transaction
    fn command(&mut self, cmd: u8) -> Result<()> {
        self.start()?;
        let ack = self.write_byte(cmd)?;
        self.stop()?;
        if !ack {
            debug!("No ACK for command 0x{:02X}", cmd);
        }
        Ok(())
    }

    /// Data command, address + payload, display-on command.
    ///
    /// A NACK aborts the remaining bytes; STOP is still sent and the
    /// display-on command is skipped.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        if !self.ready {
            return Err(SharedError::NotInitialized);
        }
        debug!("Sending frame {}", hex::encode(frame.bytes()));

        self.command(DATA_COMMAND)?;

        self.start()?;
        for (position, &byte) in frame.bytes().iter().enumerate() {
            if !self.write_byte(byte)? {
                self.stop()?;
                warn!("NACK when sending data at position {}", position);
                return Err(SharedError::Nack { position, byte });
            }
        }
        self.stop()?;

        self.command(self.display_command)
    }
}

impl<L: Line> SegmentDisplay for Tm1637<L> {
    fn init(&mut self) -> Result<()> {
        self.dio.release()?;
        self.clk.release()?;

        // Short pause for stabilization
        thread::sleep(SETTLE_DELAY);

        // With pull-up resistors both lines must be HIGH
        let dio = self.dio.sample()?;
        let clk = self.clk.sample()?;
        if dio.is_low() || clk.is_low() {
            error!(
                "Missing pull-up resistors: {} (DIO) is {}, {} (CLK) is {}",
                self.dio.name(),
                dio,
                self.clk.name(),
                clk
            );
            error!("Check wiring of 4.7k pull-up resistors to 3.3V");
            return Err(SharedError::MissingPullUp { dio, clk });
        }

        self.ready = true;
        info!(
            "✅ TM1637 initialized (DIO={}, CLK={})",
            self.dio.name(),
            self.clk.name()
        );
        Ok(())
    }

    fn cleanup(&mut self) {
        self.ready = false;
        if let Err(e) = self.dio.release() {
            warn!("Failed to release DIO: {}", e);
        }
        if let Err(e) = self.clk.release() {
            warn!("Failed to release CLK: {}", e);
        }
    }

    fn write_number(&mut self, tenths: i16) -> Result<()> {
        self.write_frame(&Frame::number(tenths)).map_err(|e| {
            error!("Error displaying number {}: {}", tenths, e);
            e
        })
    }

    fn write_error(&mut self) -> Result<()> {
        self.write_frame(&Frame::error()).map_err(|e| {
            error!("Error displaying Err: {}", e);
            e
        })
    }

    fn write_waiting(&mut self) -> Result<()> {
        self.write_frame(&Frame::waiting()).map_err(|e| {
            error!("Error displaying waiting symbol: {}", e);
            e
        })
    }

    fn write_stale(&mut self) -> Result<()> {
        self.write_frame(&Frame::stale()).map_err(|e| {
            error!("Error displaying stale symbol: {}", e);
            e
        })
    }
}
