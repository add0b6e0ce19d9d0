//! Read-only view of the metering pipeline
//!
//! The bridge only needs three facts about a channel (its name, its unique
//! id, and whether its buffer aggregates) and one fact about a reading (its
//! value). The traits keep the bridge independent of how the pipeline
//! stores these; [`Channel`] and [`Reading`] are the plain implementations
//! used by the binary.

use chrono::{DateTime, Local};
use std::fmt;
use std::str::FromStr;

/// Aggregation mode of a channel buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AggMode {
    #[default]
    None,
    Max,
    Min,
    Avg,
    Sum,
}

impl FromStr for AggMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(AggMode::None),
            "max" => Ok(AggMode::Max),
            "min" => Ok(AggMode::Min),
            "avg" => Ok(AggMode::Avg),
            "sum" => Ok(AggMode::Sum),
            other => Err(format!("unknown aggregation mode '{}'", other)),
        }
    }
}

/// A measurement channel as seen by the bridge
pub trait MeterChannel {
    /// Stable channel name, used to build topics
    fn name(&self) -> &str;

    /// Stable unique identifier, published on the announce topic
    fn uuid(&self) -> &str;

    /// Whether the channel buffer has a non-trivial aggregation mode
    fn has_aggregation(&self) -> bool;
}

/// A single reading as seen by the bridge
pub trait MeterReading {
    fn value(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    uuid: String,
    aggmode: AggMode,
}

impl Channel {
    pub fn new(name: impl Into<String>, uuid: impl Into<String>, aggmode: AggMode) -> Self {
        Self {
            name: name.into(),
            uuid: uuid.into(),
            aggmode,
        }
    }
}

impl MeterChannel for Channel {
    fn name(&self) -> &str {
        &self.name
    }

    fn uuid(&self) -> &str {
        &self.uuid
    }

    fn has_aggregation(&self) -> bool {
        self.aggmode != AggMode::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    value: f64,
    time: DateTime<Local>,
}

impl Reading {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            time: Local::now(),
        }
    }
}

impl MeterReading for Reading {
    fn value(&self) -> f64 {
        self.value
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} @ {}", self.value, self.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregation_follows_aggmode() {
        assert!(!Channel::new("power1", "uuid-1", AggMode::None).has_aggregation());
        assert!(Channel::new("power1", "uuid-1", AggMode::Avg).has_aggregation());
    }

    #[test]
    fn aggmode_parses_case_insensitively() {
        assert_eq!("MAX".parse::<AggMode>(), Ok(AggMode::Max));
        assert_eq!("sum".parse::<AggMode>(), Ok(AggMode::Sum));
        assert!("median".parse::<AggMode>().is_err());
    }
}
