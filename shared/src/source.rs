/*!
Temperature sources and the messaging transport boundary.

A source feeds acquisition outcomes into the [`Classifier`]. The remote
source sits on top of a [`Transport`] (a publish/subscribe client) and only
reacts to three events from it: connected, disconnected and message received.
Connection handshakes and wire encoding stay inside the transport.
*/

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backoff::{ConnectionState, ReconnectPolicy};
use crate::classifier::Classifier;
use crate::error::Result;
use crate::reading::parse_tenths;

/// Longest payload accepted from the transport, in bytes
pub const MAX_MESSAGE_LEN: usize = 31;

/// Something that produces temperature readings
pub trait TemperatureSource {
    /// Acquire at the start of a render cycle, blocking for at most `budget`
    fn acquire(&mut self, classifier: &mut Classifier, budget: Duration);

    /// Make progress while the control loop waits; must return within `step`
    fn idle(&mut self, _classifier: &mut Classifier, step: Duration) {
        thread::sleep(step);
    }

    /// Release external resources
    fn shutdown(&mut self) {}
}

/// Events raised by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Disconnected,
    Message(Vec<u8>),
}

/// Publish/subscribe client as seen by the remote source
pub trait Transport {
    /// Wait up to `timeout` for the next event; `Ok(None)` on timeout.
    /// An error means the transport is not usable until reconnected.
    fn poll(&mut self, timeout: Duration) -> Result<Option<TransportEvent>>;

    /// Initiate a reconnect; `Ok` only says the attempt was started
    fn reconnect(&mut self) -> Result<()>;

    /// Subscribe to a topic on the current connection
    fn subscribe(&mut self, topic: &str) -> Result<()>;

    /// Close the connection
    fn disconnect(&mut self) {}
}

/// Temperature published on a topic, with reconnect backoff
pub struct RemoteSource<T: Transport> {
    transport: T,
    topic: String,
    policy: ReconnectPolicy,
}

impl<T: Transport> RemoteSource<T> {
    pub fn new(transport: T, topic: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            topic: topic.into(),
            policy,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Let the transport run for at most `budget`
    pub fn pump(&mut self, classifier: &mut Classifier, budget: Duration) {
        let deadline = Instant::now() + budget;

        loop {
            let now = Instant::now();
            let remaining = deadline.saturating_duration_since(now);

            match self.transport.poll(remaining) {
                Ok(Some(event)) => self.handle_event(event, classifier),
                Ok(None) => {}
                Err(e) => {
                    debug!("Transport poll failed: {}", e);
                    if self.policy.state() == ConnectionState::Connected {
                        warn!("MQTT: Connection lost");
                        self.policy.on_disconnected();
                    }

                    let transport = &mut self.transport;
                    let attempted = self.policy.on_poll_failed(now, || transport.reconnect());
                    if !attempted {
                        // Nothing to do until the next attempt is due
                        thread::sleep(deadline.saturating_duration_since(Instant::now()));
                        break;
                    }
                }
            }

            if Instant::now() >= deadline {
                break;
            }
        }
    }

    fn handle_event(&mut self, event: TransportEvent, classifier: &mut Classifier) {
        match event {
            TransportEvent::Connected => {
                info!("✅ MQTT: Connected to broker");
                self.policy.on_connected();
                match self.transport.subscribe(&self.topic) {
                    Ok(()) => info!("📡 MQTT: Subscribed to {}", self.topic),
                    Err(e) => warn!("MQTT: Subscribe to {} failed: {}", self.topic, e),
                }
            }
            TransportEvent::Disconnected => {
                warn!("MQTT: Disconnected from broker");
                self.policy.on_disconnected();
            }
            TransportEvent::Message(payload) => {
                if payload.is_empty() || payload.len() > MAX_MESSAGE_LEN {
                    warn!("MQTT: Ignoring payload of {} bytes", payload.len());
                    return;
                }
                let text = String::from_utf8_lossy(&payload);
                debug!("MQTT: Message {:?}", text);
                classifier.record(parse_tenths(&text), Instant::now());
            }
        }
    }
}

impl<T: Transport> TemperatureSource for RemoteSource<T> {
    fn acquire(&mut self, classifier: &mut Classifier, budget: Duration) {
        self.pump(classifier, budget);
    }

    fn idle(&mut self, classifier: &mut Classifier, step: Duration) {
        self.pump(classifier, step);
    }

    fn shutdown(&mut self) {
        self.transport.disconnect();
    }
}
