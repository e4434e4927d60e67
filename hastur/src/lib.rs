//! A client for sending monitoring messages to a local Hastur agent.
//!
//! Each message is a single JSON object, sent as one UDP datagram to the agent (by default at `127.0.0.1:8125`).
//! Sending is fire-and-forget: nothing is buffered, retried or acknowledged, and sending never fails from the caller's
//! point of view.
//!
//! # Usage
//!
//! ```no_run
//! # use hastur::{labels, HasturBuilder, Interval};
//! // Build a client. The builder can change the destination, the app name, default labels, and so on.
//! let client = HasturBuilder::default()
//!     .with_app_name("billing.worker")
//!     .build()
//!     .expect("failed to build Hastur client");
//!
//! // Register the process and start sending a heartbeat every minute.
//! client.start().expect("failed to start heartbeat");
//!
//! // Send messages. Each operation has a short form, and a `_full` form taking a timestamp and labels.
//! client.counter("invoices.processed", 1);
//! client.gauge("queue.depth", 17.0);
//! client.mark_full("deploy", "v1.4.2", std::time::SystemTime::now(), labels!("region" => "us-east"));
//! client.event("payment.failed", "card declined", "details...", ["billing-team"]);
//!
//! // Report state periodically.
//! let reporter = client.clone();
//! let _schedule = client.every(Interval::FiveSecs, move || reporter.gauge("open.connections", 3.0));
//! ```
//!
//! # Messages
//!
//! | Operation | `type` | Purpose |
//! |---|---|---|
//! | [`Client::mark`] | `mark` | A point-in-time notification with a string value. |
//! | [`Client::counter`] | `counter` | A delta-valued metric. |
//! | [`Client::gauge`] | `gauge` | An absolute-valued metric. |
//! | [`Client::event`] | `event` | A high-priority notification with a subject, body and attention list. |
//! | [`Client::log`] | `log` | A low-priority freeform record. |
//! | [`Client::register_process`] | `reg_process` | Announces the process. |
//! | [`Client::info_process`] | `info_process` | Freeform information about the process. |
//! | [`Client::info_agent`] | `info_agent` | Freeform information about the host. |
//! | [`Client::heartbeat`] | `hb_process` | A liveness signal. |
//!
//! # Labels
//!
//! Every message carries labels. The default labels are attached to every message, and always include `app` (the app
//! name) and `pid` (the process ID). When a message operation is given labels that collide with default labels, the
//! default labels win.
//!
//! The app name is, in priority order: the name set with [`Client::set_app_name`], the `HASTUR_APP_NAME` environment
//! variable, or the name the executable was invoked as.
//!
//! # Encoding failures
//!
//! A message holding a value that cannot be encoded, such as a `NaN` gauge or label, is replaced by a `log` message
//! describing the failure. If that log message cannot be encoded either, it is dropped.
//!
//! # `metrics` integration
//!
//! [`HasturBuilder::install`] installs the client as the global [`metrics`] recorder, so that metrics recorded with the
//! `metrics` macros are sent as Hastur counters and gauges.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{Error, HasturBuilder};

mod client;
pub use self::client::{Client, Timer};

pub mod debugging;

mod forwarder;
pub use self::forwarder::{Sink, UdpSink, DEFAULT_UDP_ADDRESS, DEFAULT_UDP_PORT};

mod labels;
pub use self::labels::{APP_LABEL, APP_NAME_ENV_VAR, PID_LABEL};

mod message;
pub use self::message::{
    from_micros, micros_since_epoch, Body, EncodeError, Message, DEFAULT_HEARTBEAT_NAME, LANGUAGE,
    MAX_EVENT_BODY_LEN, MAX_EVENT_SUBJECT_LEN, MAX_LOG_SUBJECT_LEN, PROCESS_HEARTBEAT_NAME, VERSION,
};

mod recorder;
pub use self::recorder::HasturRecorder;

mod schedule;
pub use self::schedule::{every, Interval, Schedule};

mod telemetry;
pub use self::telemetry::TelemetrySnapshot;

mod value;
pub use self::value::{Labels, Map, Value};
