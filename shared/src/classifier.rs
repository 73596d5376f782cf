/*!
Temperature classification state machine.

Turns the stream of reading events from a source into what the display should
show. Staleness is measured from the last *successful* reading only; a parse
failure is reported for one render cycle and never erases the stored value.
*/

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::Result;
use crate::reading::Reading;

/// What the display should show this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// A current value in tenths of a degree
    Valid(i16),
    /// Nothing has been received yet
    NotYetAvailable,
    /// The last good value is older than the watchdog window
    Stale,
    /// The most recent attempt produced no usable value
    ParseError,
}

/// Durable reading state plus the transient parse-failure flag
#[derive(Debug, Clone)]
pub struct Classifier {
    last_reading: Option<Reading>,
    last_attempt: Option<Instant>,
    pending_error: bool,
    watchdog: Duration,
}

impl Classifier {
    /// Create a classifier; a zero watchdog window disables staleness
    pub fn new(watchdog: Duration) -> Self {
        Self {
            last_reading: None,
            last_attempt: None,
            pending_error: false,
            watchdog,
        }
    }

    /// Record a successfully parsed value
    pub fn on_reading_parsed(&mut self, tenths: i16, now: Instant) {
        self.last_reading = Some(Reading::new(tenths, now));
        self.last_attempt = Some(now);
        self.pending_error = false;
    }

    /// Record a failed attempt; the stored value is kept
    pub fn on_parse_failed(&mut self, now: Instant) {
        self.last_attempt = Some(now);
        self.pending_error = true;
    }

    /// Record the outcome of one acquisition attempt
    pub fn record(&mut self, outcome: Result<i16>, now: Instant) {
        match outcome {
            Ok(tenths) => {
                debug!("🌡️ Reading {} (0.1 °C)", tenths);
                self.on_reading_parsed(tenths, now);
            }
            Err(e) => {
                warn!("Measurement failed: {}", e);
                self.on_parse_failed(now);
            }
        }
    }

    /// Durable classification, ignoring any pending parse failure
    pub fn classify(&self, now: Instant) -> Classification {
        let Some(reading) = self.last_reading else {
            return Classification::NotYetAvailable;
        };

        if !self.watchdog.is_zero() && now.saturating_duration_since(reading.at) > self.watchdog {
            return Classification::Stale;
        }

        Classification::Valid(reading.tenths)
    }

    /// Classification to render this cycle.
    ///
    /// A parse failure since the last render wins for exactly one cycle,
    /// afterwards the durable state applies again.
    pub fn take_for_render(&mut self, now: Instant) -> Classification {
        if std::mem::take(&mut self.pending_error) {
            debug!("Pending parse failure, rendering error");
            return Classification::ParseError;
        }
        self.classify(now)
    }

    /// Last successful reading, if any
    pub fn last_reading(&self) -> Option<Reading> {
        self.last_reading
    }

    /// Time of the last attempt, successful or not
    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    pub fn watchdog(&self) -> Duration {
        self.watchdog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: Duration = Duration::from_millis(10);

    #[test]
    fn test_not_yet_available_regardless_of_time() {
        let t0 = Instant::now();
        let classifier = Classifier::new(Duration::from_secs(5));

        assert_eq!(classifier.classify(t0), Classification::NotYetAvailable);
        assert_eq!(
            classifier.classify(t0 + Duration::from_secs(3600)),
            Classification::NotYetAvailable
        );
    }

    #[test]
    fn test_watchdog_boundary() {
        let t0 = Instant::now();
        let window = Duration::from_secs(120);
        let mut classifier = Classifier::new(window);

        classifier.on_reading_parsed(234, t0);

        assert_eq!(classifier.classify(t0 + window - EPS), Classification::Valid(234));
        assert_eq!(classifier.classify(t0 + window), Classification::Valid(234));
        assert_eq!(classifier.classify(t0 + window + EPS), Classification::Stale);
    }

    #[test]
    fn test_scenario_stale_after_silence() {
        let t0 = Instant::now();
        let mut classifier = Classifier::new(Duration::from_secs(120));

        classifier.on_reading_parsed(-23, t0);

        assert_eq!(
            classifier.take_for_render(t0 + Duration::from_secs(121)),
            Classification::Stale
        );
    }

    #[test]
    fn test_zero_window_never_stale() {
        let t0 = Instant::now();
        let mut classifier = Classifier::new(Duration::ZERO);

        classifier.on_reading_parsed(100, t0);

        assert_eq!(
            classifier.classify(t0 + Duration::from_secs(86_400)),
            Classification::Valid(100)
        );
    }

    #[test]
    fn test_parse_failure_lasts_one_cycle() {
        let t0 = Instant::now();
        let mut classifier = Classifier::new(Duration::ZERO);

        classifier.on_reading_parsed(215, t0);
        classifier.on_parse_failed(t0 + EPS);

        assert_eq!(classifier.classify(t0 + EPS), Classification::Valid(215));
        assert_eq!(classifier.take_for_render(t0 + EPS), Classification::ParseError);
        assert_eq!(classifier.take_for_render(t0 + EPS), Classification::Valid(215));
        assert_eq!(classifier.last_reading().unwrap().tenths, 215);
        assert_eq!(classifier.last_reading().unwrap().at, t0);
        assert_eq!(classifier.last_attempt(), Some(t0 + EPS));
    }

    #[test]
    fn test_failure_does_not_refresh_watchdog() {
        let t0 = Instant::now();
        let window = Duration::from_secs(60);
        let mut classifier = Classifier::new(window);

        classifier.on_reading_parsed(215, t0);
        classifier.on_parse_failed(t0 + window);

        assert_eq!(classifier.classify(t0 + window + EPS), Classification::Stale);
    }

    #[test]
    fn test_first_event_is_error() {
        let t0 = Instant::now();
        let mut classifier = Classifier::new(Duration::ZERO);

        classifier.on_parse_failed(t0);

        assert_eq!(classifier.classify(t0), Classification::NotYetAvailable);
        assert_eq!(classifier.take_for_render(t0), Classification::ParseError);
    }

    #[test]
    fn test_record_outcomes() {
        let t0 = Instant::now();
        let mut classifier = Classifier::new(Duration::ZERO);

        classifier.record(Ok(234), t0);
        assert_eq!(classifier.take_for_render(t0), Classification::Valid(234));

        classifier.record(Err(crate::error::SharedError::unavailable("exit status 1")), t0);
        assert_eq!(classifier.take_for_render(t0), Classification::ParseError);
    }

    #[test]
    fn test_success_clears_pending_failure() {
        let t0 = Instant::now();
        let mut classifier = Classifier::new(Duration::ZERO);

        classifier.on_parse_failed(t0);
        classifier.on_reading_parsed(50, t0 + EPS);

        assert_eq!(classifier.take_for_render(t0 + EPS), Classification::Valid(50));
    }
}
