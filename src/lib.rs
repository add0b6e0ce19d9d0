//! Publish-side bridge from a metering pipeline to an MQTT broker.
//!
//! [`mqtt::MqttHandler`] owns the broker connection, [`mqtt::Publisher`] is the
//! non-blocking handle the pipeline calls for every reading.

pub mod config;
pub mod meter;
pub mod mqtt;
