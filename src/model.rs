//! Data units flowing through the delivery engine.
//!
//! A [`TimeValue`] is the element South connectors produce; batches of them are
//! persisted as JSON arrays by the value cache. [`Content`] is what a destination
//! receives. [`ScanMode`] is the cron reference data used by the scheduler.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// A single timestamped measurement.
///
/// # Example
///
/// ```
/// use north_engine::TimeValue;
/// use serde_json::json;
///
/// let value = TimeValue::new("pump-1.pressure", "2024-03-01T10:00:00.000Z", json!(4.2));
/// let encoded = serde_json::to_string(&value).unwrap();
/// assert!(encoded.contains("\"pointId\":\"pump-1.pressure\""));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeValue {
    pub point_id: String,
    /// RFC 3339 timestamp, kept verbatim
    pub timestamp: String,
    pub data: TimeValueData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeValueData {
    pub value: Value,
    /// Quality flags, units and other string/number attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TimeValue {
    pub fn new(point_id: impl Into<String>, timestamp: impl Into<String>, value: Value) -> Self {
        Self {
            point_id: point_id.into(),
            timestamp: timestamp.into(),
            data: TimeValueData {
                value,
                extra: Map::new(),
            },
        }
    }

    /// Attach an extra attribute to the value's data.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.extra.insert(key.into(), value);
        self
    }
}

/// Content handed to a destination.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    TimeValues(Vec<TimeValue>),
    Raw { file_path: PathBuf },
}

impl Content {
    /// Short tag used in logs and metrics labels
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TimeValues(_) => "time-values",
            Self::Raw { .. } => "raw",
        }
    }
}

/// Named cron schedule shared by configuration entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub cron: String,
}

impl ScanMode {
    pub fn new(id: impl Into<String>, name: impl Into<String>, cron: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            cron: cron.into(),
        }
    }
}
