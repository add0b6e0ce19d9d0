use std::fmt;

use toml::Value;
use tracing::{debug, trace, warn};

use super::error::MqttError;

pub const DEFAULT_TOPIC_PREFIX: &str = "vzlogger";
pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_KEEPALIVE: u16 = 60;

/// Connection and publishing parameters of the MQTT bridge
///
/// Built once from the `[mqtt]` options table and immutable afterwards.
/// `topic_prefix` always ends with exactly one `/`.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub enabled: bool,
    pub retain: bool,
    pub raw_and_agg: bool,
    pub host: String,
    pub port: u16,
    pub keepalive: u16,
    pub user: String,
    pub password: String,
    pub topic_prefix: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retain: false,
            raw_and_agg: false,
            host: String::new(),
            port: DEFAULT_PORT,
            keepalive: DEFAULT_KEEPALIVE,
            user: String::new(),
            password: String::new(),
            topic_prefix: format!("{}/", DEFAULT_TOPIC_PREFIX),
        }
    }
}

// Keeps the password out of log lines
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("enabled", &self.enabled)
            .field("retain", &self.retain)
            .field("raw_and_agg", &self.raw_and_agg)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("keepalive", &self.keepalive)
            .field("user", &self.user)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("topic_prefix", &self.topic_prefix)
            .finish()
    }
}

impl ClientConfig {
    /// Parses the MQTT options table.
    ///
    /// Recognised keys are `enabled`, `retain`, `rawAndAgg`, `port`,
    /// `keepalive`, `host`, `user`, `pass` and `topic`. Unknown keys and
    /// values of the wrong type are ignored with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`MqttError::ConfigurationError`] if `options` is `None`.
    pub fn from_options(options: Option<&toml::Table>) -> Result<Self, MqttError> {
        let options = options
            .ok_or_else(|| MqttError::ConfigurationError("mqtt: no options!".to_string()))?;

        let mut config = ClientConfig::default();
        let mut topic: Option<String> = None;

        for (key, value) in options {
            match (key.as_str(), value) {
                ("enabled", Value::Boolean(b)) => config.enabled = *b,
                ("retain", Value::Boolean(b)) => config.retain = *b,
                ("rawAndAgg", Value::Boolean(b)) => config.raw_and_agg = *b,
                ("port", Value::Integer(i)) if u16::try_from(*i).is_ok() => {
                    config.port = *i as u16;
                }
                ("keepalive", Value::Integer(i)) if u16::try_from(*i).is_ok() => {
                    config.keepalive = *i as u16;
                }
                ("host", Value::String(s)) => config.host = s.clone(),
                ("user", Value::String(s)) => config.user = s.clone(),
                ("pass", Value::String(s)) => config.password = s.clone(),
                ("topic", Value::String(s)) => topic = Some(s.clone()),
                _ => {
                    warn!("Ignoring invalid field or type: {}={}", key, value);
                }
            }
        }

        if let Some(topic) = topic {
            config.topic_prefix = normalize_prefix(&topic);
        }

        debug!("Parsed mqtt config: {:?}", config);
        Ok(config)
    }

    /// True iff the bridge is enabled and has somewhere to connect to.
    pub fn is_configured(&self) -> bool {
        if !self.enabled {
            return false;
        }
        if self.port == 0 {
            trace!("mqtt port not configured!");
        }
        if self.host.is_empty() {
            warn!("mqtt host not configured!");
        }
        self.port != 0 && !self.host.is_empty()
    }
}

/// Turns the configured `topic` into a prefix ending in a single `/`.
///
/// Falls back to the default prefix when the value could never form a valid
/// publish topic (empty, `$`-prefixed, or containing wildcards).
fn normalize_prefix(topic: &str) -> String {
    let trimmed = topic.trim_end_matches('/');

    let reason = if trimmed.is_empty() {
        Some("is empty")
    } else if trimmed.starts_with('$') {
        Some("starts with '$'")
    } else if trimmed.contains(['+', '#']) {
        Some("contains a wildcard")
    } else {
        None
    };

    match reason {
        Some(reason) => {
            warn!(
                "mqtt topic prefix '{}' {}, using '{}'",
                topic, reason, DEFAULT_TOPIC_PREFIX
            );
            format!("{}/", DEFAULT_TOPIC_PREFIX)
        }
        None => format!("{}/", trimmed),
    }
}
