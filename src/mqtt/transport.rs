//! Seams between the bridge and the MQTT client library
//!
//! The bridge talks to the broker through two halves:
//!
//! ```text
//! Publisher ──► BrokerClient (Arc, shared, non-blocking enqueue)
//!                    │
//!                    ▼
//! ReconnectLoop ──► NetworkDriver (owned by one task, does the I/O)
//!                    │
//!                    ▼
//!               ConnectionEventSink (connect / disconnect / message)
//! ```
//!
//! [`RumqttConnector`] builds both halves on top of `rumqttc`, whose
//! `AsyncClient` may be used from any thread while the `EventLoop` is
//! being polled elsewhere.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tracing::{debug, info, trace, warn};

use super::config::ClientConfig;
use super::error::MqttError;
use super::message_manager::MQTTMessage;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_CAPACITY: usize = 100;
const MIN_KEEPALIVE_SECS: u16 = 5;

/// Return code of a connect attempt, 0 means accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckCode(pub u8);

impl ConnAckCode {
    pub const SUCCESS: ConnAckCode = ConnAckCode(0);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl From<rumqttc::ConnectReturnCode> for ConnAckCode {
    fn from(code: rumqttc::ConnectReturnCode) -> Self {
        ConnAckCode(code as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We sent the disconnect ourselves
    Requested,
    /// The broker sent a disconnect
    Broker,
    /// The network connection broke
    ConnectionLost(String),
}

/// Receiver of broker events
///
/// Called synchronously from whichever task drives the [`NetworkDriver`].
pub trait ConnectionEventSink: Send + Sync {
    fn on_connect(&self, code: ConnAckCode);

    fn on_disconnect(&self, reason: DisconnectReason);

    fn on_message(&self, message: &MQTTMessage);

    /// A connect or reconnect attempt is about to start
    fn on_connecting(&self) {}
}

/// Publishing half of a broker connection
pub trait BrokerClient: Send + Sync {
    /// Enqueues a QoS 0 publish without waiting for the network
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError>;

    /// Enqueues a disconnect request
    fn disconnect(&self) -> Result<(), MqttError>;
}

/// I/O half of a broker connection
pub trait NetworkDriver: Send + 'static {
    /// Services network I/O and timers for at most `timeout`.
    ///
    /// An elapsed timeout without activity is a success.
    fn process(
        &mut self,
        timeout: Duration,
        sink: &dyn ConnectionEventSink,
    ) -> impl Future<Output = Result<(), MqttError>> + Send;

    /// Establishes the connection; a no-op success when already connected.
    ///
    /// A broker that answers with a refusing CONNACK is not an error: the
    /// code is reported to `sink` and returned. Errors are reserved for
    /// transport failures where no CONNACK arrived.
    fn connect(
        &mut self,
        sink: &dyn ConnectionEventSink,
    ) -> impl Future<Output = Result<ConnAckCode, MqttError>> + Send;
}

/// Factory for client library handles
pub trait Connector {
    type Client: BrokerClient + 'static;
    type Driver: NetworkDriver;

    /// Library initialisation and version check
    fn init(&self) -> Result<(), MqttError>;

    fn create(
        &self,
        client_id: &str,
        config: &ClientConfig,
    ) -> Result<(Self::Client, Self::Driver), MqttError>;
}

pub struct RumqttClient {
    client: AsyncClient,
}

impl BrokerClient for RumqttClient {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError> {
        self.client
            .try_publish(topic, QoS::AtMostOnce, retain, payload)
            .map_err(MqttError::from)
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.client.try_disconnect().map_err(MqttError::from)
    }
}

pub struct RumqttDriver {
    eventloop: EventLoop,
    connect_timeout: Duration,
    connected: bool,
}

impl RumqttDriver {
    fn dispatch(&mut self, event: Event, sink: &dyn ConnectionEventSink) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                let code = ConnAckCode::from(ack.code);
                self.connected = code.is_success();
                sink.on_connect(code);
            }
            Event::Incoming(Packet::Disconnect) => {
                self.connected = false;
                sink.on_disconnect(DisconnectReason::Broker);
            }
            Event::Incoming(Packet::Publish(publish)) => {
                sink.on_message(&MQTTMessage::from_publish(&publish));
            }
            Event::Outgoing(Outgoing::Disconnect) => {
                self.connected = false;
                sink.on_disconnect(DisconnectReason::Requested);
            }
            other => trace!("mqtt event: {:?}", other),
        }
    }

    fn dispatch_error(&mut self, error: &ConnectionError, sink: &dyn ConnectionEventSink) {
        match error {
            ConnectionError::ConnectionRefused(code) => {
                self.connected = false;
                sink.on_connect(ConnAckCode::from(*code));
            }
            _ if self.connected => {
                self.connected = false;
                sink.on_disconnect(DisconnectReason::ConnectionLost(error.to_string()));
            }
            _ => {}
        }
    }
}

impl NetworkDriver for RumqttDriver {
    async fn process(
        &mut self,
        timeout: Duration,
        sink: &dyn ConnectionEventSink,
    ) -> Result<(), MqttError> {
        match tokio::time::timeout(timeout, self.eventloop.poll()).await {
            Err(_) => Ok(()),
            Ok(Ok(event)) => {
                self.dispatch(event, sink);
                Ok(())
            }
            Ok(Err(e)) => {
                self.dispatch_error(&e, sink);
                Err(e.into())
            }
        }
    }

    async fn connect(
        &mut self,
        sink: &dyn ConnectionEventSink,
    ) -> Result<ConnAckCode, MqttError> {
        if self.connected {
            return Ok(ConnAckCode::SUCCESS);
        }

        let eventloop = &mut self.eventloop;
        let attempt = tokio::time::timeout(self.connect_timeout, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack.code),
                    Ok(other) => trace!("mqtt event before connack: {:?}", other),
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match attempt {
            Err(_) => Err(MqttError::ConnectionError(format!(
                "no connack within {:?}",
                self.connect_timeout
            ))),
            // rumqttc turns a refusing CONNACK into an error
            Ok(Ok(code)) | Ok(Err(ConnectionError::ConnectionRefused(code))) => {
                let code = ConnAckCode::from(code);
                self.connected = code.is_success();
                sink.on_connect(code);
                Ok(code)
            }
            Ok(Err(e)) => {
                self.dispatch_error(&e, sink);
                Err(e.into())
            }
        }
    }
}

static LIBRARY_INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct RumqttConnector {
    pub request_capacity: usize,
    pub connect_timeout: Duration,
}

impl Default for RumqttConnector {
    fn default() -> Self {
        Self {
            request_capacity: DEFAULT_REQUEST_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl Connector for RumqttConnector {
    type Client = RumqttClient;
    type Driver = RumqttDriver;

    fn init(&self) -> Result<(), MqttError> {
        // The event loop needs a runtime to be polled on.
        tokio::runtime::Handle::try_current().map_err(|e| {
            MqttError::InitializationError(format!("rumqttc needs a tokio runtime: {}", e))
        })?;
        LIBRARY_INIT.get_or_init(|| info!("Using rumqttc with MQTT v3.1.1"));
        Ok(())
    }

    fn create(
        &self,
        client_id: &str,
        config: &ClientConfig,
    ) -> Result<(RumqttClient, RumqttDriver), MqttError> {
        if client_id.is_empty() || client_id.starts_with(' ') {
            return Err(MqttError::InitializationError(format!(
                "invalid client id '{}'",
                client_id
            )));
        }

        let keepalive = if config.keepalive != 0 && config.keepalive < MIN_KEEPALIVE_SECS {
            warn!(
                "mqtt keepalive {}s too short, using {}s",
                config.keepalive, MIN_KEEPALIVE_SECS
            );
            MIN_KEEPALIVE_SECS
        } else {
            config.keepalive
        };

        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options
            .set_keep_alive(Duration::from_secs(u64::from(keepalive)))
            .set_clean_session(true);
        if !config.user.is_empty() || !config.password.is_empty() {
            options.set_credentials(config.user.clone(), config.password.clone());
        }

        debug!(
            "Creating mqtt client {} for {}:{}",
            client_id, config.host, config.port
        );
        let (client, eventloop) = AsyncClient::new(options, self.request_capacity);

        Ok((
            RumqttClient { client },
            RumqttDriver {
                eventloop,
                connect_timeout: self.connect_timeout,
                connected: false,
            },
        ))
    }
}
