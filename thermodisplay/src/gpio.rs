/*!
Hardware line backends.

Both backends emulate an open-drain output: releasing a line turns it into an
input so the external pull-up takes it HIGH, driving it LOW turns it into an
output at level 0. Nothing here ever drives a line HIGH.
*/

use anyhow::Result;
use tracing::info;

use shared::sim::SimDisplay;
use shared::SegmentDisplay;

use crate::config::{Backend, DisplayConfig};

/// Consumer label shown by the kernel for requested lines
#[cfg(any(feature = "cdev", test))]
const CONSUMER: &str = "tm1637";

/// Build the display for the configured backend; `simulate` forces the emulated one
pub fn open_display(config: &DisplayConfig, simulate: bool) -> Result<Box<dyn SegmentDisplay>> {
    let backend = if simulate { Backend::Simulated } else { config.backend };

    match backend {
        Backend::Simulated => {
            info!("🧪 Using simulated display (no GPIO access)");
            Ok(Box::new(SimDisplay::new(&config.driver)))
        }
        Backend::Cdev => open_cdev(config),
        Backend::Rppal => open_rppal(config),
    }
}

#[cfg(feature = "cdev")]
fn open_cdev(config: &DisplayConfig) -> Result<Box<dyn SegmentDisplay>> {
    use anyhow::Context;
    use shared::Tm1637;

    let mut chip = gpio_cdev::Chip::new(&config.chip)
        .with_context(|| format!("Failed to open GPIO chip {}", config.chip))?;
    let dio = cdev::CdevLine::open(&mut chip, config.dio_pin)?;
    let clk = cdev::CdevLine::open(&mut chip, config.clk_pin)?;

    info!(
        "🔌 GPIO chip {} (DIO: {}, CLK: {})",
        config.chip, config.dio_pin, config.clk_pin
    );
    Ok(Box::new(Tm1637::new(dio, clk, &config.driver)))
}

#[cfg(not(feature = "cdev"))]
fn open_cdev(_config: &DisplayConfig) -> Result<Box<dyn SegmentDisplay>> {
    anyhow::bail!("Built without GPIO character device support (enable the `cdev` feature)")
}

#[cfg(feature = "rppal")]
fn open_rppal(config: &DisplayConfig) -> Result<Box<dyn SegmentDisplay>> {
    use anyhow::Context;
    use shared::Tm1637;

    let gpio = rppal::gpio::Gpio::new().context("Failed to access Raspberry Pi GPIO")?;
    let dio = pi::RppalLine::open(&gpio, config.dio_pin)?;
    let clk = pi::RppalLine::open(&gpio, config.clk_pin)?;

    info!("🔌 Raspberry Pi GPIO (DIO: {}, CLK: {})", config.dio_pin, config.clk_pin);
    Ok(Box::new(Tm1637::new(dio, clk, &config.driver)))
}

#[cfg(not(feature = "rppal"))]
fn open_rppal(_config: &DisplayConfig) -> Result<Box<dyn SegmentDisplay>> {
    anyhow::bail!("Built without Raspberry Pi GPIO support (enable the `rppal` feature)")
}

/// Display name for a line offset
fn line_name(offset: u32) -> String {
    format!("GPIO{}", offset)
}

#[cfg(feature = "cdev")]
mod cdev {
    use gpio_cdev::{Chip, LineHandle, LineRequestFlags};
    use shared::{Level, Line, LineMode, Result, SharedError};

    use super::{line_name, CONSUMER};

    /// A line on a GPIO character device.
    ///
    /// The kernel fixes the direction per request, so switching mode drops the
    /// current request and makes a new one.
    pub struct CdevLine {
        offset: u32,
        line: gpio_cdev::Line,
        handle: Option<LineHandle>,
        mode: LineMode,
    }

    impl CdevLine {
        /// Request the line as an input (released)
        pub fn open(chip: &mut Chip, offset: u32) -> Result<Self> {
            let line = chip
                .get_line(offset)
                .map_err(|e| SharedError::line(line_name(offset), e))?;

            let mut this = Self {
                offset,
                line,
                handle: None,
                mode: LineMode::Released,
            };
            this.request(LineRequestFlags::INPUT)?;
            Ok(this)
        }

        fn request(&mut self, flags: LineRequestFlags) -> Result<()> {
            // One request per line at a time
            self.handle = None;
            let handle = self
                .line
                .request(flags, 0, CONSUMER)
                .map_err(|e| SharedError::line(line_name(self.offset), e))?;
            self.handle = Some(handle);
            Ok(())
        }
    }

    impl Line for CdevLine {
        fn name(&self) -> String {
            line_name(self.offset)
        }

        fn mode(&self) -> LineMode {
            self.mode
        }

        fn release(&mut self) -> Result<()> {
            if self.mode == LineMode::Released && self.handle.is_some() {
                return Ok(());
            }
            self.request(LineRequestFlags::INPUT)?;
            self.mode = LineMode::Released;
            Ok(())
        }

        fn drive_low(&mut self) -> Result<()> {
            if self.mode == LineMode::DrivenLow && self.handle.is_some() {
                return Ok(());
            }
            self.request(LineRequestFlags::OUTPUT)?;
            self.mode = LineMode::DrivenLow;
            Ok(())
        }

        fn sample(&mut self) -> Result<Level> {
            if self.mode == LineMode::DrivenLow {
                return Err(SharedError::SampledWhileDriven(self.name()));
            }
            let handle = self
                .handle
                .as_ref()
                .ok_or_else(|| SharedError::line(self.name(), "not requested"))?;
            let value = handle
                .get_value()
                .map_err(|e| SharedError::line(line_name(self.offset), e))?;
            Ok(Level::from_raw(value))
        }
    }
}

#[cfg(feature = "rppal")]
mod pi {
    use rppal::gpio::{Gpio, IoPin, Mode};
    use shared::{Level, Line, LineMode, Result, SharedError};

    use super::line_name;

    /// A Raspberry Pi pin switched between input and output-low
    pub struct RppalLine {
        number: u8,
        pin: IoPin,
        mode: LineMode,
    }

    impl RppalLine {
        pub fn open(gpio: &Gpio, number: u32) -> Result<Self> {
            let name = line_name(number);
            let number = u8::try_from(number).map_err(|_| SharedError::line(name.clone(), "pin number out of range"))?;
            let pin = gpio.get(number).map_err(|e| SharedError::line(name, e))?;

            Ok(Self {
                number,
                pin: pin.into_io(Mode::Input),
                mode: LineMode::Released,
            })
        }
    }

    impl Line for RppalLine {
        fn name(&self) -> String {
            line_name(u32::from(self.number))
        }

        fn mode(&self) -> LineMode {
            self.mode
        }

        fn release(&mut self) -> Result<()> {
            if self.mode != LineMode::Released {
                self.pin.set_mode(Mode::Input);
                self.mode = LineMode::Released;
            }
            Ok(())
        }

        fn drive_low(&mut self) -> Result<()> {
            if self.mode != LineMode::DrivenLow {
                // Latch LOW before switching so the pin never drives HIGH
                self.pin.set_low();
                self.pin.set_mode(Mode::Output);
                self.mode = LineMode::DrivenLow;
            }
            Ok(())
        }

        fn sample(&mut self) -> Result<Level> {
            if self.mode == LineMode::DrivenLow {
                return Err(SharedError::SampledWhileDriven(self.name()));
            }
            Ok(match self.pin.read() {
                rppal::gpio::Level::High => Level::High,
                rppal::gpio::Level::Low => Level::Low,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Classification;

    #[test]
    fn test_simulate_overrides_backend() {
        let config = DisplayConfig::default();
        assert_eq!(config.backend, Backend::Cdev);

        let mut display = open_display(&config, true).unwrap();
        display.init().unwrap();
        display.render(Classification::Valid(-55)).unwrap();
        display.cleanup();
    }

    #[test]
    fn test_line_names() {
        assert_eq!(line_name(24), "GPIO24");
        assert_eq!(CONSUMER, "tm1637");
    }

    #[cfg(not(feature = "rppal"))]
    #[test]
    fn test_missing_backend_is_reported() {
        let config = DisplayConfig {
            backend: Backend::Rppal,
            ..DisplayConfig::default()
        };
        let err = open_display(&config, false).err().unwrap();
        assert!(err.to_string().contains("rppal"));
    }
}
