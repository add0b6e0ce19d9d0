//! Publish path called by the metering pipeline
//!
//! [`Publisher::publish`] never blocks and never fails towards its caller:
//! publishes are only enqueued on the client, and a rejected enqueue is
//! logged and dropped. Without a usable client every call is a silent
//! no-op, which is a valid deployment without MQTT.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Local};
use tracing::trace;

use super::config::ClientConfig;
use super::topics::ChannelTopicCache;
use super::transport::BrokerClient;
use crate::meter::{MeterChannel, MeterReading};

#[derive(Debug, Default)]
struct PublishStats {
    messages_sent: AtomicUsize,
    announces_sent: AtomicUsize,
    publish_failures: AtomicUsize,
    last_activity: Mutex<Option<DateTime<Local>>>,
}

impl PublishStats {
    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Local::now());
    }
}

/// Counters of the publish path
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishCounters {
    pub messages_sent: usize,
    pub announces_sent: usize,
    pub publish_failures: usize,
    pub last_activity: Option<DateTime<Local>>,
}

struct PublisherInner {
    client: RwLock<Option<Arc<dyn BrokerClient>>>,
    enabled: bool,
    retain: bool,
    cache: Mutex<ChannelTopicCache>,
    stats: PublishStats,
}

/// Cloneable handle to the publish path
///
/// All clones share the client, the topic cache and the counters.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

impl Publisher {
    /// `enabled` is false when the configuration is incomplete or setting up
    /// the client failed; such a publisher ignores every reading.
    pub fn new(
        client: Option<Arc<dyn BrokerClient>>,
        config: &ClientConfig,
        enabled: bool,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                client: RwLock::new(client),
                enabled,
                retain: config.retain,
                cache: Mutex::new(ChannelTopicCache::new(
                    config.topic_prefix.clone(),
                    config.raw_and_agg,
                )),
                stats: PublishStats::default(),
            }),
        }
    }

    /// Publishes one reading of `channel`.
    ///
    /// On the first reading of a channel its uuid is announced. The
    /// announcement is repeated with later readings until one succeeds.
    pub fn publish(
        &self,
        channel: Option<&dyn MeterChannel>,
        reading: &dyn MeterReading,
        is_aggregate: bool,
    ) {
        let Some(channel) = channel else {
            return;
        };
        if !self.inner.enabled {
            return;
        }
        let Some(client) = self.client() else {
            return;
        };

        let mut cache = self
            .inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = cache.resolve(channel);

        if !entry.announced && !entry.announce_topic.is_empty() {
            match client.publish(
                &entry.announce_topic,
                entry.announce_value.clone().into_bytes(),
                self.inner.retain,
            ) {
                Ok(()) => {
                    entry.announced = true;
                    self.inner.stats.announces_sent.fetch_add(1, Ordering::Relaxed);
                    self.inner.stats.touch();
                }
                Err(e) => {
                    trace!("mqtt publish announce returned {}", e);
                    self.inner.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if !entry.sends(is_aggregate) {
            return;
        }

        let topic = entry.topic(is_aggregate);
        let payload = render_value(reading.value());
        trace!("publish {}={}", topic, payload);

        match client.publish(topic, payload.into_bytes(), self.inner.retain) {
            Ok(()) => {
                self.inner.stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                self.inner.stats.touch();
            }
            Err(e) => {
                trace!("mqtt publish returned {}", e);
                self.inner.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn counters(&self) -> PublishCounters {
        let stats = &self.inner.stats;
        PublishCounters {
            messages_sent: stats.messages_sent.load(Ordering::Relaxed),
            announces_sent: stats.announces_sent.load(Ordering::Relaxed),
            publish_failures: stats.publish_failures.load(Ordering::Relaxed),
            last_activity: *stats
                .last_activity
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Number of channels seen so far
    pub fn channel_count(&self) -> usize {
        self.inner
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Takes the client away from every clone; later publishes are no-ops.
    pub(crate) fn release_client(&self) -> Option<Arc<dyn BrokerClient>> {
        self.inner
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn client(&self) -> Option<Arc<dyn BrokerClient>> {
        self.inner
            .client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Shortest round-trip decimal; non-finite values as `nan`, `inf` and `-inf`.
fn render_value(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        value.to_string()
    }
}
