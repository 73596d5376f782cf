/*!
Reconnect scheduling for remote temperature sources.

Every failed transport poll while not connected may trigger a reconnect
attempt, but only once the current backoff interval has elapsed since the
previous attempt. An attempt that cannot even be initiated doubles the interval
up to the ceiling; a successful connection resets it to the floor.
*/

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, SharedError};

/// Floor and ceiling of the reconnect interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// Interval after a successful connection, in seconds
    pub floor_secs: u64,

    /// Upper bound for the doubling, in seconds
    pub ceiling_secs: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            floor_secs: 1,
            ceiling_secs: 60,
        }
    }
}

impl BackoffSettings {
    /// The floor must be non-zero and the ceiling not below it
    pub fn validate(&self) -> Result<()> {
        if self.floor_secs == 0 {
            return Err(SharedError::config("backoff floor must be at least 1 second"));
        }
        if self.ceiling_secs < self.floor_secs {
            return Err(SharedError::config(format!(
                "backoff ceiling {}s is below the floor {}s",
                self.ceiling_secs, self.floor_secs
            )));
        }
        Ok(())
    }
}

/// Connection state of a remote source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// A reconnect was initiated and its outcome is not known yet
    Connecting,
    Connected,
}

/// Exponential reconnect backoff
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    state: ConnectionState,
    floor: Duration,
    ceiling: Duration,
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl ReconnectPolicy {
    /// Create a policy in the `Disconnected` state
    pub fn new(settings: &BackoffSettings) -> Self {
        Self::with_bounds(
            Duration::from_secs(settings.floor_secs),
            Duration::from_secs(settings.ceiling_secs),
        )
    }

    /// Create a policy from explicit bounds; the ceiling is never below the floor
    pub fn with_bounds(floor: Duration, ceiling: Duration) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            floor,
            ceiling: ceiling.max(floor),
            interval: floor,
            last_attempt: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Current wait between reconnect attempts
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Whether a reconnect attempt is allowed at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        if self.state == ConnectionState::Connected {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.interval,
        }
    }

    /// Handle an unsuccessful transport poll.
    ///
    /// Calls `reconnect` if an attempt is due and returns whether it did.
    pub fn on_poll_failed<F>(&mut self, now: Instant, reconnect: F) -> bool
    where
        F: FnOnce() -> Result<()>,
    {
        if !self.is_due(now) {
            return false;
        }

        info!("🔄 Reconnecting (backoff {:?})...", self.interval);
        self.last_attempt = Some(now);

        match reconnect() {
            Ok(()) => {
                self.state = ConnectionState::Connecting;
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.interval = self
                    .interval
                    .checked_mul(2)
                    .unwrap_or(self.ceiling)
                    .min(self.ceiling);
                warn!("Reconnect failed: {} (next attempt in {:?})", e, self.interval);
            }
        }
        true
    }

    /// The transport reports an established connection
    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.interval = self.floor;
    }

    /// The transport reports a lost connection; backoff is kept
    pub fn on_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> Result<()> {
        Err(SharedError::transport("connection refused"))
    }

    #[test]
    fn test_first_failure_attempts_immediately() {
        let mut policy = ReconnectPolicy::new(&BackoffSettings::default());
        let t0 = Instant::now();

        let mut called = false;
        assert!(policy.on_poll_failed(t0, || {
            called = true;
            Ok(())
        }));
        assert!(called);
        assert_eq!(policy.state(), ConnectionState::Connecting);
        assert_eq!(policy.last_attempt(), Some(t0));
    }

    #[test]
    fn test_backoff_doubles_to_ceiling() {
        let floor = Duration::from_secs(1);
        let ceiling = Duration::from_secs(60);
        let mut policy = ReconnectPolicy::with_bounds(floor, ceiling);
        let mut now = Instant::now();

        for n in 1..=8u32 {
            assert!(policy.on_poll_failed(now, refused));
            let expected = (floor * 2u32.pow(n)).min(ceiling);
            assert_eq!(policy.interval(), expected, "after {} failures", n);
            now += policy.interval();
        }
    }

    #[test]
    fn test_not_due_before_interval() {
        let mut policy = ReconnectPolicy::with_bounds(Duration::from_secs(4), Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(policy.on_poll_failed(t0, refused));
        assert_eq!(policy.interval(), Duration::from_secs(8));

        let mut called = false;
        assert!(!policy.on_poll_failed(t0 + Duration::from_secs(7), || {
            called = true;
            Ok(())
        }));
        assert!(!called);
        assert!(policy.on_poll_failed(t0 + Duration::from_secs(8), refused));
    }

    #[test]
    fn test_connect_resets_to_floor() {
        let floor = Duration::from_secs(1);
        let mut policy = ReconnectPolicy::with_bounds(floor, Duration::from_secs(60));
        let mut now = Instant::now();
        for _ in 0..4 {
            policy.on_poll_failed(now, refused);
            now += policy.interval();
        }
        assert_eq!(policy.interval(), Duration::from_secs(16));

        policy.on_connected();

        assert_eq!(policy.interval(), floor);
        assert_eq!(policy.state(), ConnectionState::Connected);
        assert!(!policy.is_due(now + Duration::from_secs(3600)));
    }

    #[test]
    fn test_disconnect_keeps_backoff() {
        let mut policy = ReconnectPolicy::with_bounds(Duration::from_secs(1), Duration::from_secs(60));
        let t0 = Instant::now();
        policy.on_poll_failed(t0, refused);
        policy.on_poll_failed(t0 + Duration::from_secs(2), refused);
        assert_eq!(policy.interval(), Duration::from_secs(4));

        policy.on_disconnected();

        assert_eq!(policy.state(), ConnectionState::Disconnected);
        assert_eq!(policy.interval(), Duration::from_secs(4));
    }

    #[test]
    fn test_settings_validation() {
        assert!(BackoffSettings::default().validate().is_ok());
        assert!(BackoffSettings { floor_secs: 0, ceiling_secs: 60 }.validate().is_err());
        assert!(matches!(
            BackoffSettings { floor_secs: 10, ceiling_secs: 5 }.validate(),
            Err(SharedError::Config(_))
        ));
    }

    #[test]
    fn test_ceiling_never_below_floor() {
        let policy = ReconnectPolicy::with_bounds(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(policy.interval(), Duration::from_secs(10));
    }
}
