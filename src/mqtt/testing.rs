//! In-memory stand-ins for the client library, used by the unit tests

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::config::ClientConfig;
use super::error::MqttError;
use super::transport::{BrokerClient, ConnAckCode, ConnectionEventSink, Connector, NetworkDriver};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Records publishes; topics marked as failing are rejected.
#[derive(Default)]
pub struct MockClient {
    pub published: Mutex<Vec<Published>>,
    pub attempts: AtomicUsize,
    pub disconnects: AtomicUsize,
    failing_topics: Mutex<HashSet<String>>,
}

impl MockClient {
    pub fn fail_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().insert(topic.to_string());
    }

    pub fn heal_topic(&self, topic: &str) {
        self.failing_topics.lock().unwrap().remove(topic);
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_to(&self, topic: &str) -> usize {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.topic == topic)
            .count()
    }
}

impl BrokerClient for MockClient {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_topics.lock().unwrap().contains(topic) {
            return Err(MqttError::PublishError("request queue full".to_string()));
        }
        self.published.lock().unwrap().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8(payload).unwrap(),
            retain,
        });
        Ok(())
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl BrokerClient for Arc<MockClient> {
    fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool) -> Result<(), MqttError> {
        self.as_ref().publish(topic, payload, retain)
    }

    fn disconnect(&self) -> Result<(), MqttError> {
        self.as_ref().disconnect()
    }
}

/// Fails the first `remaining_failures` processing calls, then idles
/// for the full timeout on every call.
///
/// Connect attempts are refused by the broker while `remaining_refusals` is
/// non-zero and fail without any broker answer when `unreachable` is set.
#[derive(Debug, Default)]
pub struct MockDriver {
    pub remaining_failures: usize,
    pub remaining_refusals: usize,
    pub unreachable: bool,
    pub process_calls: usize,
    pub failures: Vec<Instant>,
    pub connects: Vec<Instant>,
    pub timeouts: Vec<Duration>,
}

impl MockDriver {
    pub fn failing(count: usize) -> Self {
        Self {
            remaining_failures: count,
            ..Self::default()
        }
    }
}

impl NetworkDriver for MockDriver {
    async fn process(
        &mut self,
        timeout: Duration,
        _sink: &dyn ConnectionEventSink,
    ) -> Result<(), MqttError> {
        self.process_calls += 1;
        self.timeouts.push(timeout);
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            self.failures.push(Instant::now());
            return Err(MqttError::ConnectionError("connection reset".to_string()));
        }
        tokio::time::sleep(timeout).await;
        Ok(())
    }

    async fn connect(&mut self, sink: &dyn ConnectionEventSink) -> Result<ConnAckCode, MqttError> {
        self.connects.push(Instant::now());
        if self.unreachable {
            return Err(MqttError::ConnectionError("connection refused".to_string()));
        }
        let code = if self.remaining_refusals > 0 {
            self.remaining_refusals -= 1;
            // not authorized
            ConnAckCode(5)
        } else {
            ConnAckCode::SUCCESS
        };
        sink.on_connect(code);
        Ok(code)
    }
}

/// Connector whose init and create steps can each be made to fail
///
/// The remaining fields are handed to the [`MockDriver`] it creates.
pub struct MockConnector {
    pub client: Arc<MockClient>,
    pub init_ok: bool,
    pub create_ok: bool,
    pub unreachable: bool,
    pub refusals: usize,
    pub process_failures: usize,
    pub init_calls: AtomicUsize,
    pub client_ids: Mutex<Vec<String>>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self {
            client: Arc::new(MockClient::default()),
            init_ok: true,
            create_ok: true,
            unreachable: false,
            refusals: 0,
            process_failures: 0,
            init_calls: AtomicUsize::new(0),
            client_ids: Mutex::new(Vec::new()),
        }
    }
}

impl Connector for MockConnector {
    type Client = Arc<MockClient>;
    type Driver = MockDriver;

    fn init(&self) -> Result<(), MqttError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.init_ok {
            Ok(())
        } else {
            Err(MqttError::InitializationError("version mismatch".to_string()))
        }
    }

    fn create(
        &self,
        client_id: &str,
        _config: &ClientConfig,
    ) -> Result<(Arc<MockClient>, MockDriver), MqttError> {
        self.client_ids.lock().unwrap().push(client_id.to_string());
        if !self.create_ok {
            return Err(MqttError::InitializationError("out of memory".to_string()));
        }
        let driver = MockDriver {
            remaining_failures: self.process_failures,
            remaining_refusals: self.refusals,
            unreachable: self.unreachable,
            ..MockDriver::default()
        };
        Ok((self.client.clone(), driver))
    }
}
