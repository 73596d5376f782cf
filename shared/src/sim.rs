/*!
Simulated open-drain bus with an emulated TM1637 receiver.

The receiver watches the two line levels the same way the chip does: START and
STOP are DIO edges while CLK is HIGH, data bits are latched on the rising CLK
edge (LSB first), and after the eighth bit the receiver pulls DIO LOW for the
ninth clock to acknowledge. Completed transactions update a small display RAM
so a caller can see what the module would show.
*/

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::info;

use crate::driver::{DriverSettings, SegmentDisplay, Tm1637};
use crate::error::{Result, SharedError};
use crate::glyph;
use crate::line::{Level, Line, LineMode};
use crate::protocol::{ADDRESS, DISPLAY_OFF};

/// Number of digit positions on the emulated module
pub const DISPLAY_POSITIONS: usize = 4;

/// Transactions kept for inspection
const TRANSACTION_LOG: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pin {
    Dio,
    Clk,
}

#[derive(Debug, Default)]
struct Receiver {
    in_transaction: bool,
    shift: u8,
    bit_count: u8,
    acking: bool,
    pulls_dio: bool,
    current: Vec<u8>,
    transactions: VecDeque<Vec<u8>>,
    /// Bytes still acknowledged; None = acknowledge everything
    ack_budget: Option<usize>,
    ram: [u8; DISPLAY_POSITIONS],
    display_on: bool,
    brightness: u8,
}

impl Receiver {
    fn on_start(&mut self) {
        self.in_transaction = true;
        self.current.clear();
        self.shift = 0;
        self.bit_count = 0;
        self.acking = false;
    }

    fn on_stop(&mut self) {
        if self.in_transaction {
            self.in_transaction = false;
            let transaction = std::mem::take(&mut self.current);
            self.apply(&transaction);
            if self.transactions.len() == TRANSACTION_LOG {
                self.transactions.pop_front();
            }
            self.transactions.push_back(transaction);
        }
    }

    fn on_clock_rise(&mut self, dio: Level) {
        if self.in_transaction && !self.acking && self.bit_count < 8 {
            if dio.is_high() {
                self.shift |= 1 << self.bit_count;
            }
            self.bit_count += 1;
        }
    }

    fn on_clock_fall(&mut self) {
        if !self.in_transaction {
            return;
        }
        if self.acking {
            // End of the ninth clock
            self.acking = false;
            self.pulls_dio = false;
            self.shift = 0;
            self.bit_count = 0;
        } else if self.bit_count == 8 {
            self.current.push(self.shift);
            self.acking = true;
            self.pulls_dio = match self.ack_budget.as_mut() {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            };
        }
    }

    fn apply(&mut self, transaction: &[u8]) {
        let Some(&first) = transaction.first() else {
            return;
        };
        match first & 0xC0 {
            // Address command followed by display data
            ADDRESS => {
                let start = (first & 0x0F) as usize;
                for (i, &b) in transaction[1..].iter().enumerate() {
                    if let Some(slot) = self.ram.get_mut(start + i) {
                        *slot = b;
                    }
                }
            }
            // Display control
            DISPLAY_OFF => {
                self.display_on = first & 0x08 != 0;
                self.brightness = first & 0x07;
            }
            _ => {}
        }
    }
}

#[derive(Debug)]
struct BusState {
    dio_low: bool,
    clk_low: bool,
    dio_pull_up: bool,
    clk_pull_up: bool,
    mode_changes: usize,
    receiver: Receiver,
}

impl BusState {
    fn dio_level(&self) -> Level {
        if self.dio_low || self.receiver.pulls_dio || !self.dio_pull_up {
            Level::Low
        } else {
            Level::High
        }
    }

    fn clk_level(&self) -> Level {
        if self.clk_low || !self.clk_pull_up {
            Level::Low
        } else {
            Level::High
        }
    }

    fn set(&mut self, pin: Pin, low: bool) {
        let current = match pin {
            Pin::Dio => self.dio_low,
            Pin::Clk => self.clk_low,
        };
        if current == low {
            return;
        }

        let (old_dio, old_clk) = (self.dio_level(), self.clk_level());
        match pin {
            Pin::Dio => self.dio_low = low,
            Pin::Clk => self.clk_low = low,
        }
        self.mode_changes += 1;
        let (dio, clk) = (self.dio_level(), self.clk_level());

        if old_clk.is_high() && clk.is_high() {
            if old_dio.is_high() && dio.is_low() {
                self.receiver.on_start();
            } else if old_dio.is_low() && dio.is_high() {
                self.receiver.on_stop();
            }
        } else if old_clk.is_low() && clk.is_high() {
            self.receiver.on_clock_rise(dio);
        } else if old_clk.is_high() && clk.is_low() {
            self.receiver.on_clock_fall();
        }
    }
}

/// A simulated bus: hand its two lines to a driver, inspect the result here
#[derive(Clone)]
pub struct SimBus {
    state: Rc<RefCell<BusState>>,
}

impl SimBus {
    /// Bus with both pull-ups fitted and a receiver that acknowledges everything
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(BusState {
                dio_low: false,
                clk_low: false,
                dio_pull_up: true,
                clk_pull_up: true,
                mode_changes: 0,
                receiver: Receiver::default(),
            })),
        }
    }

    /// (DIO, CLK) handles onto this bus
    pub fn lines(&self) -> (SimLine, SimLine) {
        (
            SimLine {
                pin: Pin::Dio,
                state: Rc::clone(&self.state),
            },
            SimLine {
                pin: Pin::Clk,
                state: Rc::clone(&self.state),
            },
        )
    }

    /// Fit or remove the pull-up resistors
    pub fn set_pull_up(&self, dio: bool, clk: bool) {
        let mut state = self.state.borrow_mut();
        state.dio_pull_up = dio;
        state.clk_pull_up = clk;
    }

    /// Acknowledge the next `bytes` bytes, then stop acknowledging
    pub fn nack_after(&self, bytes: usize) {
        self.state.borrow_mut().receiver.ack_budget = Some(bytes);
    }

    /// Acknowledge every byte again
    pub fn ack_all(&self) {
        self.state.borrow_mut().receiver.ack_budget = None;
    }

    /// Completed transactions (START..STOP), oldest first
    pub fn transactions(&self) -> Vec<Vec<u8>> {
        self.state.borrow().receiver.transactions.iter().cloned().collect()
    }

    /// Most recent address + data transaction
    pub fn last_payload(&self) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .receiver
            .transactions
            .iter()
            .rev()
            .find(|t| t.first().is_some_and(|b| b & 0xC0 == 0xC0))
            .cloned()
    }

    /// Segment patterns currently held by the display
    pub fn display_ram(&self) -> [u8; DISPLAY_POSITIONS] {
        self.state.borrow().receiver.ram
    }

    /// What the display shows, as text
    pub fn text(&self) -> String {
        glyph::to_text(&self.display_ram())
    }

    pub fn display_on(&self) -> bool {
        self.state.borrow().receiver.display_on
    }

    pub fn brightness(&self) -> u8 {
        self.state.borrow().receiver.brightness
    }

    /// Number of actual line mode switches so far
    pub fn mode_changes(&self) -> usize {
        self.state.borrow().mode_changes
    }

    pub fn dio_mode(&self) -> LineMode {
        mode_of(self.state.borrow().dio_low)
    }

    pub fn clk_mode(&self) -> LineMode {
        mode_of(self.state.borrow().clk_low)
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

fn mode_of(low: bool) -> LineMode {
    if low {
        LineMode::DrivenLow
    } else {
        LineMode::Released
    }
}

/// One line of a [`SimBus`]
pub struct SimLine {
    pin: Pin,
    state: Rc<RefCell<BusState>>,
}

impl SimLine {
    fn driven_low(&self) -> bool {
        let state = self.state.borrow();
        match self.pin {
            Pin::Dio => state.dio_low,
            Pin::Clk => state.clk_low,
        }
    }
}

impl Line for SimLine {
    fn name(&self) -> String {
        match self.pin {
            Pin::Dio => "SIM-DIO".to_string(),
            Pin::Clk => "SIM-CLK".to_string(),
        }
    }

    fn mode(&self) -> LineMode {
        mode_of(self.driven_low())
    }

    fn release(&mut self) -> Result<()> {
        self.state.borrow_mut().set(self.pin, false);
        Ok(())
    }

    fn drive_low(&mut self) -> Result<()> {
        self.state.borrow_mut().set(self.pin, true);
        Ok(())
    }

    fn sample(&mut self) -> Result<Level> {
        if self.driven_low() {
            return Err(SharedError::SampledWhileDriven(self.name()));
        }
        let state = self.state.borrow();
        Ok(match self.pin {
            Pin::Dio => state.dio_level(),
            Pin::Clk => state.clk_level(),
        })
    }
}

/// TM1637 driver on a simulated bus, logging what the module shows
pub struct SimDisplay {
    bus: SimBus,
    driver: Tm1637<SimLine>,
}

impl SimDisplay {
    pub fn new(settings: &DriverSettings) -> Self {
        let bus = SimBus::new();
        let (dio, clk) = bus.lines();
        Self {
            driver: Tm1637::new(dio, clk, settings),
            bus,
        }
    }

    pub fn bus(&self) -> &SimBus {
        &self.bus
    }

    fn shown(&self, result: Result<()>) -> Result<()> {
        if result.is_ok() {
            info!("🖥️ Display shows [{}]", self.bus.text());
        }
        result
    }
}

impl SegmentDisplay for SimDisplay {
    fn init(&mut self) -> Result<()> {
        self.driver.init()
    }

    fn cleanup(&mut self) {
        self.driver.cleanup()
    }

    fn write_number(&mut self, tenths: i16) -> Result<()> {
        let result = self.driver.write_number(tenths);
        self.shown(result)
    }

    fn write_error(&mut self) -> Result<()> {
        let result = self.driver.write_error();
        self.shown(result)
    }

    fn write_waiting(&mut self) -> Result<()> {
        let result = self.driver.write_waiting();
        self.shown(result)
    }

    fn write_stale(&mut self) -> Result<()> {
        let result = self.driver.write_stale();
        self.shown(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_is_idempotent() {
        let bus = SimBus::new();
        let (mut dio, _clk) = bus.lines();

        dio.release().unwrap();
        assert_eq!(bus.mode_changes(), 0);

        dio.drive_low().unwrap();
        dio.release().unwrap();
        dio.release().unwrap();
        dio.release().unwrap();
        assert_eq!(bus.mode_changes(), 2);
        assert_eq!(dio.mode(), LineMode::Released);
    }

    #[test]
    fn test_sample_while_driven_is_rejected() {
        let bus = SimBus::new();
        let (mut dio, _clk) = bus.lines();

        dio.drive_low().unwrap();
        assert!(matches!(dio.sample(), Err(SharedError::SampledWhileDriven(_))));
        dio.release().unwrap();
        assert_eq!(dio.sample().unwrap(), Level::High);
    }

    #[test]
    fn test_missing_pull_up_reads_low() {
        let bus = SimBus::new();
        bus.set_pull_up(true, false);
        let (mut dio, mut clk) = bus.lines();

        assert_eq!(dio.sample().unwrap(), Level::High);
        assert_eq!(clk.sample().unwrap(), Level::Low);
    }

    #[test]
    fn test_receiver_latches_lsb_first() {
        let bus = SimBus::new();
        let (mut dio, mut clk) = bus.lines();

        // START
        dio.drive_low().unwrap();
        clk.drive_low().unwrap();

        // 0x01: first bit high, the rest low
        for i in 0..8 {
            dio.set_bit(i == 0).unwrap();
            clk.release().unwrap();
            clk.drive_low().unwrap();
        }
        dio.release().unwrap();
        clk.release().unwrap();
        assert_eq!(dio.sample().unwrap(), Level::Low, "receiver acknowledges");
        clk.drive_low().unwrap();
        assert_eq!(dio.sample().unwrap(), Level::High, "receiver lets go");

        // STOP
        dio.drive_low().unwrap();
        clk.release().unwrap();
        dio.release().unwrap();

        assert_eq!(bus.transactions(), vec![vec![0x01]]);
    }

    #[test]
    fn test_sim_display_through_box() {
        let settings = DriverSettings {
            bit_delay_us: 0,
            brightness: 3,
        };
        let sim = SimDisplay::new(&settings);
        let bus = sim.bus().clone();
        let mut display: Box<dyn SegmentDisplay> = Box::new(sim);

        assert!(display.write_number(1).is_err(), "not initialized yet");
        display.init().unwrap();
        display.write_number(-999).unwrap();

        assert_eq!(bus.text(), "-99.9");
        assert_eq!(bus.brightness(), 3);
        assert!(bus.display_on());
    }
}
