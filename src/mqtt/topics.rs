//! Topic naming and the per-channel topic cache
//!
//! Every channel publishes to three topics below the configured prefix:
//!
//! ```text
//! <prefix><channel>/raw   - every raw reading
//! <prefix><channel>/agg   - every aggregated reading
//! <prefix><channel>/uuid  - the channel uuid, announced once
//! ```
//!
//! Channel names are not checked against MQTT topic syntax. A name that
//! contains `/`, `+` or `#` produces extra levels or an invalid publish topic.

use std::collections::HashMap;

use tracing::debug;

use crate::meter::MeterChannel;

/// Resolved topics and publishing state of one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTopicEntry {
    pub raw_topic: String,
    pub agg_topic: String,
    pub announce_topic: String,
    pub announce_value: String,
    pub send_raw: bool,
    pub send_agg: bool,
    pub announced: bool,
}

impl ChannelTopicEntry {
    /// Topic for the given kind of reading
    pub fn topic(&self, is_aggregate: bool) -> &str {
        if is_aggregate {
            &self.agg_topic
        } else {
            &self.raw_topic
        }
    }

    /// Whether this channel emits the given kind of reading
    pub fn sends(&self, is_aggregate: bool) -> bool {
        (self.send_agg && is_aggregate) || (self.send_raw && !is_aggregate)
    }
}

/// Derives the topic set of a channel. Pure, no I/O.
pub fn generate_names(
    prefix: &str,
    channel_name: &str,
    has_aggregation: bool,
    channel_uid: &str,
) -> ChannelTopicEntry {
    let base = format!("{}{}", prefix, channel_name);
    ChannelTopicEntry {
        raw_topic: format!("{}/raw", base),
        agg_topic: format!("{}/agg", base),
        announce_topic: format!("{}/uuid", base),
        announce_value: channel_uid.to_string(),
        send_raw: true,
        send_agg: has_aggregation,
        announced: false,
    }
}

/// Append-only map from channel name to its topic entry
///
/// Entries are created on first sight and live for the process lifetime.
#[derive(Debug)]
pub struct ChannelTopicCache {
    prefix: String,
    raw_and_agg: bool,
    entries: HashMap<String, ChannelTopicEntry>,
}

impl ChannelTopicCache {
    pub fn new(prefix: impl Into<String>, raw_and_agg: bool) -> Self {
        Self {
            prefix: prefix.into(),
            raw_and_agg,
            entries: HashMap::new(),
        }
    }

    /// Returns the entry for `channel`, creating it on first use.
    ///
    /// A channel that aggregates only publishes raw readings too when
    /// `rawAndAgg` is configured.
    pub fn resolve(&mut self, channel: &dyn MeterChannel) -> &mut ChannelTopicEntry {
        let prefix = &self.prefix;
        let raw_and_agg = self.raw_and_agg;

        self.entries
            .entry(channel.name().to_string())
            .or_insert_with(|| {
                let mut entry = generate_names(
                    prefix,
                    channel.name(),
                    channel.has_aggregation(),
                    channel.uuid(),
                );
                if entry.send_agg && !raw_and_agg {
                    entry.send_raw = false;
                }
                debug!(
                    "New mqtt channel entry {}: raw={} agg={}",
                    channel.name(),
                    entry.send_raw,
                    entry.send_agg
                );
                entry
            })
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
