//! Error definitions for the MQTT bridge

use thiserror::Error;

/// Errors raised by the MQTT bridge
///
/// Only [`MqttError::ConfigurationError`] stops the bridge from being built.
/// Everything else is logged by the bridge itself and degrades to "MQTT
/// publishing disabled" or a dropped message.
#[derive(Debug, Error)]
pub enum MqttError {
    /// The configuration object is missing
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Library init, client creation or the initial connect failed
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// A single publish could not be enqueued
    #[error("Publish error: {0}")]
    PublishError(String),

    /// Network processing or a reconnect attempt failed
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The background task panicked or was aborted
    #[error("Task error: {0}")]
    TaskError(String),
}

impl From<rumqttc::ClientError> for MqttError {
    fn from(e: rumqttc::ClientError) -> Self {
        MqttError::PublishError(e.to_string())
    }
}

impl From<rumqttc::ConnectionError> for MqttError {
    fn from(e: rumqttc::ConnectionError) -> Self {
        MqttError::ConnectionError(e.to_string())
    }
}

impl From<tokio::task::JoinError> for MqttError {
    fn from(e: tokio::task::JoinError) -> Self {
        MqttError::TaskError(e.to_string())
    }
}
