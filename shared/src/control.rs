/*!
The control loop: acquire, classify, render, wait.

Single thread of control. Each cycle lets the source make progress, renders
exactly one classification and then waits out the rest of the interval in
small steps, re-checking the shutdown flag on every step.
*/

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::classifier::{Classification, Classifier};
use crate::driver::SegmentDisplay;
use crate::source::TemperatureSource;

/// Owns the display, the source and the classifier for the process lifetime
pub struct ControlLoop<D: SegmentDisplay, S: TemperatureSource> {
    display: D,
    source: S,
    classifier: Classifier,
    interval: Duration,
    step: Duration,
    cycles: u64,
    render_failures: u64,
}

impl<D: SegmentDisplay, S: TemperatureSource> ControlLoop<D, S> {
    /// `display` must already be initialized
    pub fn new(display: D, source: S, classifier: Classifier, interval: Duration, step: Duration) -> Self {
        Self {
            display,
            source,
            classifier,
            interval,
            // A zero step would spin; one millisecond is the floor
            step: step.max(Duration::from_millis(1)),
            cycles: 0,
            render_failures: 0,
        }
    }

    /// One cycle without the wait: acquire, classify, render
    pub fn run_cycle(&mut self) -> Classification {
        self.source.acquire(&mut self.classifier, self.step);

        let classification = self.classifier.take_for_render(Instant::now());
        debug!("Cycle {}: {:?}", self.cycles, classification);

        // Transmission faults only affect this cycle
        if let Err(e) = self.display.render(classification) {
            warn!("Render failed: {}", e);
            self.render_failures += 1;
        }

        self.cycles += 1;
        classification
    }

    /// Wait until `started + interval`, giving each step to the source
    pub fn wait(&mut self, started: Instant, running: &AtomicBool) {
        let deadline = started + self.interval;
        while running.load(Ordering::SeqCst) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.source.idle(&mut self.classifier, remaining.min(self.step));
        }
    }

    /// Run until `running` is cleared, then release source and display
    pub fn run(&mut self, running: &AtomicBool) {
        info!("🔁 Control loop started (interval {:?})", self.interval);

        while running.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.run_cycle();
            self.wait(started, running);
        }

        info!("📊 Control loop final stats:");
        info!("   Cycles: {}", self.cycles);
        info!("   Render failures: {}", self.render_failures);

        self.source.shutdown();
        self.display.cleanup();
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn render_failures(&self) -> u64 {
        self.render_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverSettings, Tm1637};
    use crate::error::{Result, SharedError};
    use crate::frame::Frame;
    use crate::glyph::decode_digit;
    use crate::sim::{SimBus, SimLine};
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::thread;

    /// Source that hands out pre-scripted acquisition outcomes
    struct ScriptedSource {
        outcomes: VecDeque<Result<i16>>,
        idle_calls: usize,
        shut_down: bool,
    }

    impl ScriptedSource {
        fn new(outcomes: Vec<Result<i16>>) -> Self {
            Self {
                outcomes: outcomes.into(),
                idle_calls: 0,
                shut_down: false,
            }
        }
    }

    impl TemperatureSource for ScriptedSource {
        fn acquire(&mut self, classifier: &mut Classifier, _budget: Duration) {
            if let Some(outcome) = self.outcomes.pop_front() {
                classifier.record(outcome, Instant::now());
            }
        }

        fn idle(&mut self, _classifier: &mut Classifier, step: Duration) {
            self.idle_calls += 1;
            thread::sleep(step);
        }

        fn shutdown(&mut self) {
            self.shut_down = true;
        }
    }

    fn display(bus: &SimBus) -> Tm1637<SimLine> {
        let (dio, clk) = bus.lines();
        let settings = DriverSettings {
            bit_delay_us: 0,
            brightness: 0,
        };
        let mut driver = Tm1637::new(dio, clk, &settings);
        driver.init().unwrap();
        driver
    }

    fn control(bus: &SimBus, source: ScriptedSource, watchdog: Duration) -> ControlLoop<Tm1637<SimLine>, ScriptedSource> {
        ControlLoop::new(
            display(bus),
            source,
            Classifier::new(watchdog),
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
    }

    #[test]
    fn test_scenario_local_reading_displayed() {
        let bus = SimBus::new();
        let source = ScriptedSource::new(vec![crate::reading::parse_tenths("23.4 C")]);
        let mut control = control(&bus, source, Duration::ZERO);

        assert_eq!(control.run_cycle(), Classification::Valid(234));

        let ram = bus.display_ram();
        assert_eq!(ram[0], 0x00);
        let digits: Vec<u8> = ram[1..].iter().map(|&p| decode_digit(p).unwrap()).collect();
        assert_eq!(digits, vec![2, 3, 4]);
        assert_eq!(bus.text(), " 23.4");
    }

    #[test]
    fn test_scenario_local_failure_shows_error() {
        let bus = SimBus::new();
        let source = ScriptedSource::new(vec![Err(SharedError::unavailable("exit status 1"))]);
        let mut control = control(&bus, source, Duration::ZERO);

        assert_eq!(control.run_cycle(), Classification::ParseError);
        assert_eq!(bus.last_payload(), Some(Frame::error().bytes().to_vec()));
    }

    #[test]
    fn test_scenario_waiting_every_cycle() {
        let bus = SimBus::new();
        let mut control = control(&bus, ScriptedSource::new(vec![]), Duration::from_secs(120));

        for _ in 0..3 {
            assert_eq!(control.run_cycle(), Classification::NotYetAvailable);
            assert_eq!(bus.last_payload(), Some(Frame::waiting().bytes().to_vec()));
        }
        assert_eq!(bus.transactions().len(), 9);
    }

    #[test]
    fn test_scenario_stale_after_watchdog() {
        let bus = SimBus::new();
        let source = ScriptedSource::new(vec![Ok(215)]);
        let mut control = control(&bus, source, Duration::from_millis(20));

        assert_eq!(control.run_cycle(), Classification::Valid(215));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(control.run_cycle(), Classification::Stale);
        assert_eq!(bus.last_payload(), Some(Frame::stale().bytes().to_vec()));
        assert_eq!(control.classifier().last_reading().unwrap().tenths, 215);
    }

    #[test]
    fn test_render_failure_is_local_to_cycle() {
        let bus = SimBus::new();
        let source = ScriptedSource::new(vec![Ok(100), Ok(101)]);
        let mut control = control(&bus, source, Duration::ZERO);

        bus.nack_after(0);
        assert_eq!(control.run_cycle(), Classification::Valid(100));
        assert_eq!(control.render_failures(), 1);

        bus.ack_all();
        assert_eq!(control.run_cycle(), Classification::Valid(101));
        assert_eq!(control.render_failures(), 1);
        assert_eq!(bus.text(), " 10.1");
    }

    #[test]
    fn test_wait_uses_steps() {
        let bus = SimBus::new();
        let mut control = control(&bus, ScriptedSource::new(vec![]), Duration::ZERO);
        let running = AtomicBool::new(true);

        let started = Instant::now();
        control.wait(started, &running);

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(control.source().idle_calls >= 2);
    }

    #[test]
    fn test_run_stops_promptly_on_shutdown() {
        let bus = SimBus::new();
        let mut control = ControlLoop::new(
            display(&bus),
            ScriptedSource::new(vec![Ok(1)]),
            Classifier::new(Duration::ZERO),
            Duration::from_secs(60),
            Duration::from_millis(10),
        );
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            flag.store(false, Ordering::SeqCst);
        });

        let started = Instant::now();
        control.run(&running);
        stopper.join().unwrap();

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(control.cycles(), 1);
        assert!(control.source().shut_down);
        assert!(!control.display().is_ready());
    }
}
