use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;

use crate::value::{serialize_finite, Labels, Map, Value};

/// Maximum length, in characters, of an event subject.
pub const MAX_EVENT_SUBJECT_LEN: usize = 3072;

/// Maximum length, in characters, of an event body.
pub const MAX_EVENT_BODY_LEN: usize = 3072;

/// Maximum length, in characters, of a log subject.
pub const MAX_LOG_SUBJECT_LEN: usize = 7168;

/// Name used by heartbeats when the caller does not provide one.
pub const DEFAULT_HEARTBEAT_NAME: &str = "application.heartbeat";

/// Name used by the periodic heartbeat that [`Client::start`](crate::Client::start) schedules.
pub const PROCESS_HEARTBEAT_NAME: &str = "process_heartbeat";

/// Language tag reported in process registrations.
pub const LANGUAGE: &str = "rust";

/// Library version reported in process registrations.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// A message failed to encode.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct EncodeError(#[from] serde_json::Error);

/// The kind-specific part of a message.
///
/// Encoded inline with the rest of the message, with the variant name written as the `type` field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Body {
    /// A point-in-time event notification with a string value.
    Mark {
        /// Name of the mark.
        name: String,
        /// Value of the mark.
        value: String,
    },

    /// A delta-valued metric.
    Counter {
        /// Name of the counter.
        name: String,
        /// Amount the counter changed by.
        value: i64,
    },

    /// An absolute-valued metric.
    Gauge {
        /// Name of the gauge.
        name: String,
        /// Current value of the gauge.
        #[serde(serialize_with = "serialize_finite")]
        value: f64,
    },

    /// A high-priority notification.
    Event {
        /// Name of the event.
        name: String,
        /// Short description of this occurrence.
        subject: String,
        /// Longer details, such as a stack trace.
        body: String,
        /// Teams, people or components that should pay attention.
        attn: Vec<String>,
    },

    /// A low-priority freeform record.
    Log {
        /// The log line.
        subject: String,
        /// Structured data attached to the log line.
        data: Value,
    },

    /// A process registration.
    RegProcess {
        /// Registration details.
        data: Map,
    },

    /// Freeform information about the process.
    InfoProcess {
        /// What kind of information this is.
        tag: String,
        /// The information.
        data: Map,
    },

    /// Freeform information about the agent or host.
    InfoAgent {
        /// What kind of information this is.
        tag: String,
        /// The information.
        data: Map,
    },

    /// A process liveness signal.
    HbProcess {
        /// Name of the heartbeat.
        name: String,
        /// Value carried by the heartbeat.
        #[serde(serialize_with = "serialize_finite")]
        value: f64,
        /// How long, in seconds, until the heartbeat should be considered missed.
        #[serde(serialize_with = "serialize_finite")]
        timeout: f64,
    },
}

impl Body {
    /// Returns the wire `type` tag of this body.
    pub const fn kind(&self) -> &'static str {
        match self {
            Body::Mark { .. } => "mark",
            Body::Counter { .. } => "counter",
            Body::Gauge { .. } => "gauge",
            Body::Event { .. } => "event",
            Body::Log { .. } => "log",
            Body::RegProcess { .. } => "reg_process",
            Body::InfoProcess { .. } => "info_process",
            Body::InfoAgent { .. } => "info_agent",
            Body::HbProcess { .. } => "hb_process",
        }
    }
}

/// A single message, ready to be encoded and sent.
///
/// The constructors here are pure: they take the final label set as given. Merging default labels is done by the
/// [`Client`](crate::Client) before a message is built.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Message {
    #[serde(flatten)]
    body: Body,
    timestamp: i64,
    labels: Labels,
}

impl Message {
    fn new(body: Body, timestamp: SystemTime, labels: Labels) -> Self {
        Message { body, timestamp: micros_since_epoch(timestamp), labels }
    }

    /// Builds a `mark` message.
    pub fn mark(name: impl Into<String>, value: impl Into<String>, timestamp: SystemTime, labels: Labels) -> Self {
        Self::new(Body::Mark { name: name.into(), value: value.into() }, timestamp, labels)
    }

    /// Builds a `counter` message.
    pub fn counter(name: impl Into<String>, value: i64, timestamp: SystemTime, labels: Labels) -> Self {
        Self::new(Body::Counter { name: name.into(), value }, timestamp, labels)
    }

    /// Builds a `gauge` message.
    pub fn gauge(name: impl Into<String>, value: f64, timestamp: SystemTime, labels: Labels) -> Self {
        Self::new(Body::Gauge { name: name.into(), value }, timestamp, labels)
    }

    /// Builds an `event` message.
    ///
    /// The subject and body are truncated to [`MAX_EVENT_SUBJECT_LEN`] and [`MAX_EVENT_BODY_LEN`] characters.
    pub fn event(
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        attn: Vec<String>,
        timestamp: SystemTime,
        labels: Labels,
    ) -> Self {
        let body = Body::Event {
            name: name.into(),
            subject: truncate(subject.into(), MAX_EVENT_SUBJECT_LEN),
            body: truncate(body.into(), MAX_EVENT_BODY_LEN),
            attn,
        };
        Self::new(body, timestamp, labels)
    }

    /// Builds a `log` message.
    ///
    /// The subject is truncated to [`MAX_LOG_SUBJECT_LEN`] characters.
    pub fn log(subject: impl Into<String>, data: Value, timestamp: SystemTime, labels: Labels) -> Self {
        let subject = truncate(subject.into(), MAX_LOG_SUBJECT_LEN);
        Self::new(Body::Log { subject, data }, timestamp, labels)
    }

    /// Builds a `reg_process` message.
    ///
    /// The registration data starts with `name`, `language` and `version`, and `data` is laid over it, so a caller
    /// can replace any of the three.
    pub fn register_process(name: impl Into<String>, data: Map, timestamp: SystemTime, labels: Labels) -> Self {
        let mut all = Map::new();
        all.insert("name".to_string(), Value::String(name.into()));
        all.insert("language".to_string(), Value::from(LANGUAGE));
        all.insert("version".to_string(), Value::from(VERSION));
        all.extend(data);

        Self::new(Body::RegProcess { data: all }, timestamp, labels)
    }

    /// Builds an `info_process` message.
    pub fn info_process(tag: impl Into<String>, data: Map, timestamp: SystemTime, labels: Labels) -> Self {
        Self::new(Body::InfoProcess { tag: tag.into(), data }, timestamp, labels)
    }

    /// Builds an `info_agent` message.
    pub fn info_agent(tag: impl Into<String>, data: Map, timestamp: SystemTime, labels: Labels) -> Self {
        Self::new(Body::InfoAgent { tag: tag.into(), data }, timestamp, labels)
    }

    /// Builds an `hb_process` message.
    pub fn heartbeat(
        name: impl Into<String>,
        value: f64,
        timeout: f64,
        timestamp: SystemTime,
        labels: Labels,
    ) -> Self {
        Self::new(Body::HbProcess { name: name.into(), value, timeout }, timestamp, labels)
    }

    /// Returns the wire `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }

    /// Returns the kind-specific part of this message.
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Returns the timestamp, in microseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the labels.
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Encodes the message as a JSON object.
    ///
    /// # Errors
    ///
    /// If the message holds a value the wire format cannot represent, such as a `NaN` gauge value or label, an error
    /// is returned.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Converts a timestamp to microseconds since the Unix epoch.
///
/// Sub-microsecond precision is truncated toward zero, including for timestamps before the epoch.
pub fn micros_since_epoch(timestamp: SystemTime) -> i64 {
    match timestamp.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_micros()).unwrap_or(i64::MAX),
        Err(e) => i64::try_from(e.duration().as_micros()).map_or(i64::MIN, |before| -before),
    }
}

/// Converts microseconds since the Unix epoch back to a timestamp.
pub fn from_micros(micros: i64) -> SystemTime {
    let offset = Duration::from_micros(micros.unsigned_abs());
    if micros >= 0 {
        SystemTime::UNIX_EPOCH + offset
    } else {
        SystemTime::UNIX_EPOCH - offset
    }
}

fn truncate(mut s: String, max_chars: usize) -> String {
    if let Some((idx, _)) = s.char_indices().nth(max_chars) {
        s.truncate(idx);
    }
    s
}
