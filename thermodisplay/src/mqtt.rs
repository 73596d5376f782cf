/*!
Remote temperature source transport on top of `rumqttc`.

The event loop is driven from the single control thread through a
current-thread tokio runtime: every poll blocks for at most the given timeout,
or the connect timeout while a connection is being opened.
Only three things leave this module: connected, disconnected and message.
*/

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use shared::{SharedError, Transport, TransportEvent};

use crate::config::MqttConfig;

/// Requests buffered between the client handle and the event loop
const REQUEST_CAPACITY: usize = 10;

/// How long a disconnect may take to flush
const DISCONNECT_FLUSH: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    /// Next poll (re)opens the connection
    Connecting,
    Up,
    /// Unusable until `reconnect`
    Down,
}

/// MQTT v3.1.1 client seen as a [`Transport`]
pub struct MqttTransport {
    runtime: Runtime,
    client: AsyncClient,
    eventloop: EventLoop,
    connect_timeout: Duration,
    link: Link,
    pending: VecDeque<TransportEvent>,
}

impl MqttTransport {
    /// Prepare the client; the connection is opened by the first poll
    pub fn new(config: &MqttConfig) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create MQTT runtime")?;

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("thermodisplay-{}", std::process::id()));

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);

        let (client, eventloop) = {
            let _guard = runtime.enter();
            AsyncClient::new(options, REQUEST_CAPACITY)
        };

        info!(
            "📡 MQTT broker {}:{} (client id {})",
            config.host, config.port, client_id
        );

        Ok(Self {
            runtime,
            client,
            eventloop,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            link: Link::Connecting,
            pending: VecDeque::new(),
        })
    }

    fn poll_eventloop(&mut self, wait: Duration) -> Option<std::result::Result<Event, rumqttc::ConnectionError>> {
        let eventloop = &mut self.eventloop;
        // The timer must be created inside the runtime
        self.runtime
            .block_on(async { timeout(wait, eventloop.poll()).await })
            .ok()
    }
}

fn refused(code: ConnectReturnCode) -> SharedError {
    SharedError::transport(format!("connection refused by broker ({:?})", code))
}

fn connect_timed_out(after: Duration) -> SharedError {
    SharedError::transport(format!("no CONNACK within {:?}", after))
}

impl Transport for MqttTransport {
    fn poll(&mut self, wait: Duration) -> shared::Result<Option<TransportEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.link == Link::Down {
            return Err(SharedError::transport("not connected"));
        }

        // Dropping the poll future mid-handshake restarts the connect, so a
        // connect in flight always gets the full connect timeout
        let connecting = self.link == Link::Connecting;
        let budget = if connecting { wait.max(self.connect_timeout) } else { wait };

        match self.poll_eventloop(budget) {
            None if connecting => {
                self.link = Link::Down;
                Err(connect_timed_out(budget))
            }
            None => Ok(None),
            Some(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                if ack.code == ConnectReturnCode::Success {
                    self.link = Link::Up;
                    Ok(Some(TransportEvent::Connected))
                } else {
                    self.link = Link::Down;
                    Err(refused(ack.code))
                }
            }
            Some(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                debug!("MQTT: {} bytes on {}", publish.payload.len(), publish.topic);
                Ok(Some(TransportEvent::Message(publish.payload.to_vec())))
            }
            Some(Ok(Event::Incoming(Packet::Disconnect))) => {
                self.link = Link::Down;
                Ok(Some(TransportEvent::Disconnected))
            }
            Some(Ok(_)) => Ok(None),
            Some(Err(e)) => {
                let was_up = self.link == Link::Up;
                self.link = Link::Down;
                if was_up {
                    warn!("MQTT: {}", e);
                    Ok(Some(TransportEvent::Disconnected))
                } else {
                    Err(SharedError::transport(e))
                }
            }
        }
    }

    fn reconnect(&mut self) -> shared::Result<()> {
        self.link = Link::Connecting;

        match self.poll_eventloop(self.connect_timeout) {
            Some(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                if ack.code == ConnectReturnCode::Success {
                    self.link = Link::Up;
                    self.pending.push_back(TransportEvent::Connected);
                    Ok(())
                } else {
                    self.link = Link::Down;
                    Err(refused(ack.code))
                }
            }
            Some(Err(e)) => {
                self.link = Link::Down;
                Err(SharedError::transport(e))
            }
            None => {
                self.link = Link::Down;
                Err(connect_timed_out(self.connect_timeout))
            }
            // Connected; the CONNACK arrives through poll
            Some(Ok(_)) => Ok(()),
        }
    }

    fn subscribe(&mut self, topic: &str) -> shared::Result<()> {
        self.client
            .try_subscribe(topic, QoS::AtMostOnce)
            .map_err(SharedError::transport)
    }

    fn disconnect(&mut self) {
        if self.link != Link::Up {
            return;
        }
        if let Err(e) = self.client.try_disconnect() {
            debug!("MQTT: disconnect request failed: {}", e);
            return;
        }
        let _ = self.poll_eventloop(DISCONNECT_FLUSH);
        self.link = Link::Down;
        info!("🔌 MQTT: Disconnected");
    }
}
