use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::config::ClientConfig;
use super::error::MqttError;
use super::message_manager::MQTTMessage;
use super::publisher::{PublishCounters, Publisher};
use super::reconnect::{ReconnectHandle, ReconnectLoop, ReconnectSettings};
use super::transport::{
    BrokerClient, ConnAckCode, ConnectionEventSink, Connector, DisconnectReason, NetworkDriver,
    RumqttDriver,
};

const CLIENT_ID_PREFIX: &str = "vzlogger_";
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub announces_sent: usize,
    pub publish_failures: usize,
    pub last_activity: Option<chrono::DateTime<chrono::Local>>,
}

/// Tracks the connection state from broker events
///
/// Only the task driving the connection writes the state. Everyone else
/// reads it through [`ConnectionMonitor::subscribe`] and must treat it as
/// eventually consistent.
#[derive(Debug)]
pub struct ConnectionMonitor {
    state: watch::Sender<ConnectionState>,
    messages_received: AtomicUsize,
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            messages_received: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn messages_received(&self) -> usize {
        self.messages_received.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("mqtt connection {} -> {}", previous, state);
        }
    }
}

impl ConnectionEventSink for ConnectionMonitor {
    fn on_connect(&self, code: ConnAckCode) {
        trace!("connect callback called, res={:?}", code);
        if code.is_success() {
            self.set_state(ConnectionState::Connected);
        } else {
            self.set_state(ConnectionState::Failed);
        }
    }

    fn on_disconnect(&self, reason: DisconnectReason) {
        trace!("disconnect callback called, reason={:?}", reason);
        self.set_state(ConnectionState::Disconnected);
    }

    fn on_message(&self, message: &MQTTMessage) {
        // Nothing is subscribed, so there is nothing to act on.
        self.messages_received.fetch_add(1, Ordering::Relaxed);
        trace!("message callback called: {}", message);
    }

    fn on_connecting(&self) {
        self.set_state(ConnectionState::Connecting);
    }
}

/// Owns the broker connection of the bridge
///
/// Setting up the connection never aborts the host: any failure after the
/// configuration was read leaves a disabled handler whose publisher ignores
/// all readings.
///
/// # Shutdown ordering
///
/// ```text
/// stop.cancel() ──► shutdown() ──► join reconnect loop ──► disconnect ──► flush ──► release
/// ```
///
/// Calling [`MqttHandler::shutdown`] before the stop token is cancelled is a
/// programming error and panics.
pub struct MqttHandler<D: NetworkDriver = RumqttDriver> {
    config: ClientConfig,
    client_id: String,
    enabled: bool,
    monitor: Arc<ConnectionMonitor>,
    publisher: Publisher,
    stop: CancellationToken,
    reconnect: Option<ReconnectHandle<D>>,
}

impl<D: NetworkDriver> MqttHandler<D> {
    /// Builds the handler from the raw `[mqtt]` options.
    ///
    /// # Errors
    ///
    /// [`MqttError::ConfigurationError`] if `options` is missing. All later
    /// failures only disable the handler.
    pub async fn start<K>(
        options: Option<&toml::Table>,
        connector: &K,
        stop: CancellationToken,
    ) -> Result<Self, MqttError>
    where
        K: Connector<Driver = D>,
    {
        let config = ClientConfig::from_options(options)?;
        Ok(Self::start_with_config(config, connector, stop, ReconnectSettings::default()).await)
    }

    /// Initialises the library, connects and spawns the reconnect loop.
    pub async fn start_with_config<K>(
        config: ClientConfig,
        connector: &K,
        stop: CancellationToken,
        settings: ReconnectSettings,
    ) -> Self
    where
        K: Connector<Driver = D>,
    {
        let monitor = Arc::new(ConnectionMonitor::new());
        let client_id = format!("{}{}", CLIENT_ID_PREFIX, std::process::id());
        let mut enabled = config.enabled;
        let mut client: Option<Arc<dyn BrokerClient>> = None;
        let mut reconnect = None;

        if let Err(e) = connector.init() {
            error!("mqtt library init failed: {}. Stopped.", e);
            enabled = false;
        }

        if enabled && !config.is_configured() {
            warn!("mqtt enabled but not configured, publishing disabled");
            enabled = false;
        }

        if enabled {
            match connector.create(&client_id, &config) {
                Err(e) => {
                    error!("mqtt client creation failed: {}. Stopped!", e);
                    enabled = false;
                }
                Ok((new_client, mut driver)) => {
                    monitor.on_connecting();
                    match driver.connect(monitor.as_ref()).await {
                        Ok(code) => {
                            if code.is_success() {
                                info!(
                                    "mqtt client {} connected to {}:{}",
                                    client_id, config.host, config.port
                                );
                            } else {
                                warn!(
                                    "mqtt broker {}:{} refused connection ({:?}), retrying",
                                    config.host, config.port, code
                                );
                            }
                            client = Some(Arc::new(new_client) as Arc<dyn BrokerClient>);
                            reconnect = Some(
                                ReconnectLoop::new(driver, monitor.clone(), stop.clone(), settings)
                                    .spawn(),
                            );
                        }
                        Err(e) => {
                            error!(
                                "mqtt connect to {}:{} failed: {}. Stopped!",
                                config.host, config.port, e
                            );
                            enabled = false;
                        }
                    }
                }
            }
        }

        let publisher = Publisher::new(client, &config, enabled);

        Self {
            config,
            client_id,
            enabled,
            monitor,
            publisher,
            stop,
            reconnect,
        }
    }

    /// Handle for the metering pipeline
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Settled once in [`MqttHandler::start_with_config`]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.monitor.subscribe()
    }

    pub fn status(&self) -> MqttStatus {
        let PublishCounters {
            messages_sent,
            announces_sent,
            publish_failures,
            last_activity,
        } = self.publisher.counters();
        MqttStatus {
            connection_state: self.monitor.state(),
            messages_received: self.monitor.messages_received(),
            messages_sent,
            announces_sent,
            publish_failures,
            last_activity,
        }
    }

    /// Disconnects and releases the client.
    ///
    /// # Panics
    ///
    /// If the reconnect loop is running and the stop token was not cancelled.
    pub async fn shutdown(mut self) -> Result<(), MqttError> {
        trace!("mqtt shutdown called");

        let Some(reconnect) = self.reconnect.take() else {
            self.publisher.release_client();
            return Ok(());
        };

        assert!(
            self.stop.is_cancelled(),
            "mqtt client released while the reconnect loop is still running"
        );

        let mut driver = reconnect.join().await?;

        if let Some(client) = self.publisher.release_client() {
            if let Err(e) = client.disconnect() {
                warn!("mqtt disconnect returned {}", e);
            }
            // the loop is gone, so flush the disconnect packet ourselves
            if let Err(e) = driver
                .process(DISCONNECT_FLUSH_TIMEOUT, self.monitor.as_ref())
                .await
            {
                warn!("mqtt processing returned {}", e);
            }
        }

        info!("mqtt client {} shut down", self.client_id);
        Ok(())
    }
}
