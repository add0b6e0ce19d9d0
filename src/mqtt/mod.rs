//! # MQTT Publishing Module
//!
//! Turns channel readings of the metering pipeline into MQTT messages and keeps
//! the broker connection alive in the background.
//!
//! ## Why This Module Exists
//!
//! The metering pipeline must never stall because a broker is slow or gone.
//! This module gives the pipeline a publish call that only enqueues, and moves
//! all network I/O, reconnects and teardown onto a task of its own:
//! - Deterministic topics per channel, derived once and cached
//! - One uuid announcement per channel and process
//! - Fixed-delay reconnects while the broker is unreachable
//! - Graceful degradation: a failed setup disables MQTT, never the host
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - ClientConfig parsing and validation
//! ├── topics.rs           - Topic naming and the per-channel cache
//! ├── publisher.rs        - Non-blocking publish path
//! ├── transport.rs        - Client library seams and the rumqttc backend
//! ├── reconnect.rs        - Background network loop with reconnects
//! ├── mqtt_handler.rs     - Connection lifecycle and state tracking
//! ├── message_manager.rs  - Received message representation
//! └── error.rs            - MqttError
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! reading ──► Publisher ──► ChannelTopicCache ──► BrokerClient (enqueue)
//!                                                      │
//!                          ReconnectLoop ──► NetworkDriver ──► broker
//!                                                │
//!                                   ConnectionMonitor (state)
//! ```
//!
//! ## Shutdown
//!
//! The host cancels the stop token, then calls [`MqttHandler::shutdown`],
//! which joins the loop before the client is released.

pub mod config;
pub mod error;
pub mod message_manager;
pub mod mqtt_handler;
pub mod publisher;
pub mod reconnect;
pub mod topics;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::ClientConfig;
pub use error::MqttError;
pub use mqtt_handler::{ConnectionMonitor, ConnectionState, MqttHandler, MqttStatus};
pub use publisher::Publisher;
pub use reconnect::{ReconnectHandle, ReconnectLoop, ReconnectSettings};
pub use topics::{generate_names, ChannelTopicCache, ChannelTopicEntry};
pub use transport::{
    BrokerClient, ConnAckCode, ConnectionEventSink, Connector, DisconnectReason, NetworkDriver,
    RumqttConnector,
};
