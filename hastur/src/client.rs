use std::{
    ops::ControlFlow,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant, SystemTime},
};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    builder::Error,
    forwarder::{Destination, Sink, UdpSink},
    labels::LabelResolver,
    message::{EncodeError, Message, DEFAULT_HEARTBEAT_NAME, PROCESS_HEARTBEAT_NAME},
    recorder::HasturRecorder,
    schedule::{self, Interval, Schedule},
    telemetry::{Telemetry, TelemetrySnapshot},
    value::{Labels, Map, Value},
};

struct Transport {
    destination: Destination,
    write_timeout: Option<Duration>,
    sink: Box<dyn Sink>,
}

struct Inner {
    labels: LabelResolver,
    transport: Mutex<Transport>,
    process_heartbeat: AtomicBool,
    heartbeat: Mutex<Option<Schedule>>,
    telemetry: Telemetry,
}

impl Inner {
    fn send(&self, message: &Message) {
        self.dispatch(message, false);
    }

    /// Encodes and writes a message.
    ///
    /// `reporting` is only set on the call stack that is sending the log message in place of one that failed to
    /// encode, so failures on other threads are still reported.
    fn dispatch(&self, message: &Message, reporting: bool) {
        match message.encode() {
            Ok(payload) => self.write(&payload),
            Err(error) if reporting => {
                self.telemetry.track_encode_failed();
                trace!(
                    kind = message.kind(),
                    %error,
                    "Dropped message that failed to encode while reporting an earlier failure."
                );
                self.telemetry.track_fallback_dropped();
            }
            Err(error) => {
                self.telemetry.track_encode_failed();
                self.report_encode_failure(message.kind(), &error);
            }
        }
    }

    fn write(&self, payload: &[u8]) {
        let transport = self.transport.lock();
        match transport.sink.emit(payload) {
            Ok(_) => {
                trace!(destination = %transport.destination, len = payload.len(), "Sent message.");
                self.telemetry.track_send_succeeded(payload.len());
            }
            Err(e) => {
                debug!(destination = %transport.destination, error = %e, "Failed to send message.");
                self.telemetry.track_send_failed(payload.len());
            }
        }
    }

    /// Sends a log message describing an encoding failure in place of the message that failed.
    ///
    /// If the log message itself fails to encode, which happens when a default label cannot be encoded, it is
    /// dropped rather than reported again.
    fn report_encode_failure(&self, kind: &'static str, error: &EncodeError) {
        warn!(kind, %error, "Failed to encode message, sending a log message in its place.");
        let fallback = Message::log(
            format!("Error marshalling json message: {error}"),
            Value::from(""),
            SystemTime::now(),
            self.labels.merge(Labels::new()),
        );
        self.dispatch(&fallback, true);
    }
}

/// A Hastur client.
///
/// Sends messages to the local Hastur agent. A client is cheap to clone, and all clones share the same
/// configuration: changing the destination, app name or default labels through one clone affects messages sent
/// through all of them.
///
/// Each message operation has a short form, which timestamps the message with the current time and adds no extra
/// labels, and a `_full` form that takes both explicitly. Every message carries the default labels, including `app`
/// and `pid`. Sending never fails from the caller's point of view: write errors are ignored, and a message that cannot
/// be encoded is replaced by a `log` message describing why.
#[derive(Clone)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    pub(crate) fn new(
        destination: Destination,
        write_timeout: Option<Duration>,
        sink: Box<dyn Sink>,
        app_name: String,
        default_labels: Labels,
        process_heartbeat: bool,
    ) -> Self {
        Client {
            inner: Arc::new(Inner {
                labels: LabelResolver::new(app_name, default_labels),
                transport: Mutex::new(Transport { destination, write_timeout, sink }),
                process_heartbeat: AtomicBool::new(process_heartbeat),
                heartbeat: Mutex::new(None),
                telemetry: Telemetry::default(),
            }),
        }
    }

    /// Sends a message as-is.
    ///
    /// Default labels are not merged into the message; use the message-specific operations for that.
    pub fn send(&self, message: &Message) {
        self.inner.send(message);
    }

    /// Sends a `mark`.
    ///
    /// A mark gives the time that an interesting event occurred, even with no value attached. It can also carry
    /// string-valued stats that might otherwise be gauges, such as "green", "yellow" or "red".
    ///
    /// A mark is different from an event because it happens at stat priority: it can be batched or slightly delayed,
    /// and has no end-to-end acknowledgement.
    pub fn mark(&self, name: impl Into<String>, value: impl Into<String>) {
        self.mark_full(name, value, SystemTime::now(), Labels::new());
    }

    /// Sends a `mark` with an explicit timestamp and labels.
    pub fn mark_full(&self, name: impl Into<String>, value: impl Into<String>, timestamp: SystemTime, labels: Labels) {
        self.send(&Message::mark(name, value, timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends a `counter`.
    ///
    /// Counters are sent as deltas: a value of 1 adds 1 to the counter.
    pub fn counter(&self, name: impl Into<String>, value: i64) {
        self.counter_full(name, value, SystemTime::now(), Labels::new());
    }

    /// Sends a `counter` with an explicit timestamp and labels.
    pub fn counter_full(&self, name: impl Into<String>, value: i64, timestamp: SystemTime, labels: Labels) {
        self.send(&Message::counter(name, value, timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends a `gauge`.
    ///
    /// A gauge is sent as an exact value, not a difference.
    pub fn gauge(&self, name: impl Into<String>, value: f64) {
        self.gauge_full(name, value, SystemTime::now(), Labels::new());
    }

    /// Sends a `gauge` with an explicit timestamp and labels.
    pub fn gauge_full(&self, name: impl Into<String>, value: f64, timestamp: SystemTime, labels: Labels) {
        self.send(&Message::gauge(name, value, timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends an `event`.
    ///
    /// An event is high-priority and never buffered, and includes an end-to-end acknowledgement, but is expensive to
    /// store, send and query. `subject` describes this occurrence and `body` holds details such as a stack trace; both
    /// are truncated to 3072 characters. `attn` lists who should care: logins, email addresses, team or component
    /// names.
    pub fn event<I, S>(&self, name: impl Into<String>, subject: impl Into<String>, body: impl Into<String>, attn: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_full(name, subject, body, attn, SystemTime::now(), Labels::new());
    }

    /// Sends an `event` with an explicit timestamp and labels.
    pub fn event_full<I, S>(
        &self,
        name: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        attn: I,
        timestamp: SystemTime,
        labels: Labels,
    ) where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let attn = attn.into_iter().map(Into::into).collect();
        self.send(&Message::event(name, subject, body, attn, timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends a `log` line.
    ///
    /// A log line is low priority and may be buffered or batched. `subject` is truncated to 7168 characters. A
    /// severity can be included in `data` under a `severity` key.
    pub fn log(&self, subject: impl Into<String>, data: impl Into<Value>) {
        self.log_full(subject, data, SystemTime::now(), Labels::new());
    }

    /// Sends a `log` line with an explicit timestamp and labels.
    pub fn log_full(&self, subject: impl Into<String>, data: impl Into<Value>, timestamp: SystemTime, labels: Labels) {
        self.send(&Message::log(subject, data.into(), timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends a `reg_process` registration.
    ///
    /// This indicates that the process is running and that heartbeats should follow. The registration carries
    /// `name`, the client language and version, and any extra `data`.
    pub fn register_process(&self, name: impl Into<String>, data: Map) {
        self.register_process_full(name, data, SystemTime::now(), Labels::new());
    }

    /// Sends a `reg_process` registration with an explicit timestamp and labels.
    pub fn register_process_full(&self, name: impl Into<String>, data: Map, timestamp: SystemTime, labels: Labels) {
        self.send(&Message::register_process(name, data, timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends freeform `info_process` information.
    ///
    /// Use this for supplemental information about the process: resource usage, configuration, deployment details.
    /// Information that changes constantly or needs alerting should be sent as a metric or event instead.
    pub fn info_process(&self, tag: impl Into<String>, data: Map) {
        self.info_process_full(tag, data, SystemTime::now(), Labels::new());
    }

    /// Sends `info_process` information with an explicit timestamp and labels.
    pub fn info_process_full(&self, tag: impl Into<String>, data: Map, timestamp: SystemTime, labels: Labels) {
        self.send(&Message::info_process(tag, data, timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends freeform `info_agent` information about the agent or host, such as installed packages.
    pub fn info_agent(&self, tag: impl Into<String>, data: Map) {
        self.info_agent_full(tag, data, SystemTime::now(), Labels::new());
    }

    /// Sends `info_agent` information with an explicit timestamp and labels.
    pub fn info_agent_full(&self, tag: impl Into<String>, data: Map, timestamp: SystemTime, labels: Labels) {
        self.send(&Message::info_agent(tag, data, timestamp, self.inner.labels.merge(labels)));
    }

    /// Sends an `hb_process` heartbeat named `application.heartbeat`.
    pub fn heartbeat(&self) {
        self.heartbeat_named(DEFAULT_HEARTBEAT_NAME);
    }

    /// Sends an `hb_process` heartbeat with the given name.
    ///
    /// A heartbeat indicates that a process is running. It is higher priority than a stat, but lower than an event.
    pub fn heartbeat_named(&self, name: impl Into<String>) {
        self.heartbeat_full(name, 0.0, 0.0, SystemTime::now(), Labels::new());
    }

    /// Sends an `hb_process` heartbeat with an explicit value, timeout, timestamp and labels.
    pub fn heartbeat_full(
        &self,
        name: impl Into<String>,
        value: f64,
        timeout: f64,
        timestamp: SystemTime,
        labels: Labels,
    ) {
        self.send(&Message::heartbeat(name, value, timeout, timestamp, self.inner.labels.merge(labels)));
    }

    /// Runs `f` and sends its run time, in seconds, as a `gauge`.
    pub fn time<F, R>(&self, name: impl Into<String>, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.time_full(name, f, SystemTime::now(), Labels::new())
    }

    /// Runs `f` and sends its run time, in seconds, as a `gauge` with an explicit timestamp and labels.
    pub fn time_full<F, R>(&self, name: impl Into<String>, f: F, timestamp: SystemTime, labels: Labels) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.gauge_full(name, start.elapsed().as_secs_f64(), timestamp, labels);
        result
    }

    /// Sends the time elapsed since `start`, in seconds, as a `gauge`.
    pub fn time_current(&self, name: impl Into<String>, start: Instant) {
        self.gauge(name, start.elapsed().as_secs_f64());
    }

    /// Starts a timer that sends the time until it is dropped, in seconds, as a `gauge`.
    ///
    /// ```
    /// # use hastur::{debugging::CapturingSink, HasturBuilder};
    /// # let (sink, captured) = CapturingSink::new();
    /// # let client = HasturBuilder::default().with_sink(sink).build().unwrap();
    /// fn handle_request(client: &hastur::Client) {
    ///     let _timer = client.timer("handle_request");
    ///     // ...
    /// }
    /// # handle_request(&client);
    /// # assert_eq!(captured.messages()[0]["name"], "handle_request");
    /// ```
    pub fn timer(&self, name: impl Into<String>) -> Timer {
        Timer { client: self.clone(), name: name.into(), start: Instant::now() }
    }

    /// Runs `callback` once per `interval` on a background thread.
    ///
    /// See [`every`](crate::every).
    ///
    /// # Errors
    ///
    /// If the background thread cannot be spawned, an error is returned.
    pub fn every<F>(&self, interval: Interval, callback: F) -> Result<Schedule, Error>
    where
        F: FnMut() + Send + 'static,
    {
        schedule::every(interval, callback)
    }

    /// Registers the process and, if enabled, starts sending a `process_heartbeat` heartbeat every minute.
    ///
    /// Calling `start` again replaces the running heartbeat rather than adding another.
    ///
    /// # Errors
    ///
    /// If the heartbeat thread cannot be spawned, an error is returned and nothing is sent.
    pub fn start(&self) -> Result<(), Error> {
        if self.send_process_heartbeat() {
            let schedule = spawn_heartbeat(Arc::downgrade(&self.inner), Interval::Minute.as_duration())?;
            let previous = self.inner.heartbeat.lock().replace(schedule);
            if let Some(previous) = previous {
                previous.cancel();
            }
        }

        self.register_process(self.app_name(), Map::new());
        Ok(())
    }

    /// Stops the periodic heartbeat started by [`Client::start`], if any.
    pub fn stop(&self) {
        let schedule = self.inner.heartbeat.lock().take();
        if let Some(schedule) = schedule {
            schedule.cancel();
        }
    }

    /// Returns the address of the agent messages are sent to.
    pub fn udp_address(&self) -> String {
        self.inner.transport.lock().destination.address.clone()
    }

    /// Sets the address of the agent messages are sent to.
    ///
    /// The connection is re-established immediately, so the next message goes to the new address.
    ///
    /// # Errors
    ///
    /// If the new destination cannot be resolved or connected to, an error is returned and the previous destination
    /// stays in use.
    pub fn set_udp_address(&self, address: impl Into<String>) -> Result<(), Error> {
        let address = address.into();
        self.reconnect(|destination| destination.address.clone_from(&address))
    }

    /// Returns the UDP port of the agent messages are sent to.
    pub fn udp_port(&self) -> u16 {
        self.inner.transport.lock().destination.port
    }

    /// Sets the UDP port of the agent messages are sent to.
    ///
    /// The connection is re-established immediately, so the next message goes to the new port.
    ///
    /// # Errors
    ///
    /// If the new destination cannot be connected to, an error is returned and the previous destination stays in use.
    pub fn set_udp_port(&self, port: u16) -> Result<(), Error> {
        self.reconnect(|destination| destination.port = port)
    }

    /// Applies `update` to the destination and swaps in a sink connected to the result.
    ///
    /// Resolving and connecting happen without the transport lock held, so sends keep flowing to the previous
    /// destination in the meantime. If another setter commits first, `update` is applied again on top of its change.
    fn reconnect(&self, update: impl Fn(&mut Destination)) -> Result<(), Error> {
        loop {
            let (current, write_timeout) = {
                let transport = self.inner.transport.lock();
                (transport.destination.clone(), transport.write_timeout)
            };

            let mut destination = current.clone();
            update(&mut destination);

            let sink = UdpSink::from_destination(&destination, write_timeout)
                .map_err(|e| Error::invalid_destination(&destination, e))?;

            let mut transport = self.inner.transport.lock();
            if transport.destination != current {
                debug!(from = %current, to = %transport.destination, "Destination changed while reconnecting.");
                continue;
            }

            debug!(from = %current, to = %destination, "Changed destination.");
            transport.sink = Box::new(sink);
            transport.destination = destination;
            return Ok(());
        }
    }

    /// Returns the app name attached to every message as the `app` label.
    ///
    /// In priority order, this is the name set with [`Client::set_app_name`], the `HASTUR_APP_NAME` environment
    /// variable, or the name the executable was invoked as. It is resolved each time a message is sent.
    pub fn app_name(&self) -> String {
        self.inner.labels.app_name()
    }

    /// Sets the app name, overriding all other sources. An empty name clears the override.
    pub fn set_app_name(&self, name: impl Into<String>) {
        self.inner.labels.set_app_name(name.into());
    }

    /// Returns the labels attached to every message, including `app` and `pid`.
    pub fn default_labels(&self) -> Labels {
        self.inner.labels.default_labels()
    }

    /// Adds labels to attach to every message.
    ///
    /// On collision, default labels take precedence over labels passed to a message operation.
    pub fn add_default_labels(&self, labels: Labels) {
        self.inner.labels.add_default_labels(labels);
    }

    /// Removes labels previously added with [`Client::add_default_labels`].
    ///
    /// Keys that are not present are ignored. The `app` and `pid` labels cannot be removed.
    pub fn remove_default_labels<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.inner.labels.remove_default_labels(keys);
    }

    /// Returns `true` if [`Client::start`] sends periodic heartbeats.
    pub fn send_process_heartbeat(&self) -> bool {
        self.inner.process_heartbeat.load(Ordering::Acquire)
    }

    /// Sets whether [`Client::start`] sends periodic heartbeats.
    ///
    /// This does not affect a heartbeat that is already running; use [`Client::stop`] for that.
    pub fn set_send_process_heartbeat(&self, enabled: bool) {
        self.inner.process_heartbeat.store(enabled, Ordering::Release);
    }

    /// Returns a snapshot of this client's telemetry.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.telemetry.snapshot()
    }

    /// Returns a [`metrics`] recorder that sends through this client.
    pub fn recorder(&self) -> HasturRecorder {
        HasturRecorder::new(self.clone())
    }
}

/// Sends heartbeats on behalf of a client until it is dropped.
fn spawn_heartbeat(client: Weak<Inner>, period: Duration) -> Result<Schedule, Error> {
    schedule::spawn_repeating(period, move || match client.upgrade() {
        Some(inner) => {
            Client { inner }.heartbeat_named(PROCESS_HEARTBEAT_NAME);
            ControlFlow::Continue(())
        }
        None => ControlFlow::Break(()),
    })
}

/// Measures the time until it is dropped, and sends it as a `gauge`.
///
/// Created by [`Client::timer`].
#[must_use = "the timer reports when it is dropped"]
pub struct Timer {
    client: Client,
    name: String,
    start: Instant,
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.client.time_current(std::mem::take(&mut self.name), self.start);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread::{self, sleep},
        time::{Duration, Instant, SystemTime},
    };

    use crossbeam_channel::{bounded, Receiver, Sender};
    use parking_lot::Mutex;
    use serde_json::json;

    use super::{spawn_heartbeat, Client};
    use crate::{
        debugging::{Captured, CapturingSink},
        forwarder::Sink,
        labels,
        message::{from_micros, VERSION},
        HasturBuilder, Map, Value,
    };

    fn capturing_client() -> (Client, Captured) {
        let (sink, captured) = CapturingSink::new();
        let client = HasturBuilder::default().with_app_name("test.app").with_sink(sink).build().expect("should build");
        (client, captured)
    }

    fn assert_current(timestamp: &serde_json::Value) {
        let micros = timestamp.as_i64().expect("timestamp should be an integer");
        let sent = from_micros(micros);
        let now = SystemTime::now();
        let delta = match now.duration_since(sent) {
            Ok(delta) => delta,
            Err(e) => e.duration(),
        };
        assert!(delta < Duration::from_secs(1), "timestamp {micros} is not current");
    }

    fn assert_common(message: &serde_json::Value) {
        assert_eq!(message["labels"]["app"], "test.app");
        assert_eq!(message["labels"]["pid"], json!(std::process::id()));
        assert_current(&message["timestamp"]);
    }

    #[test]
    fn mark() {
        let (client, captured) = capturing_client();
        client.mark_full("test.mark", "baz", SystemTime::now(), labels!("label1" => "value1"));

        let messages = captured.messages();
        assert_eq!(messages.len(), 1);
        let m = &messages[0];
        assert_common(m);
        assert_eq!(m["type"], "mark");
        assert_eq!(m["name"], "test.mark");
        assert_eq!(m["value"], "baz");
        assert_eq!(m["labels"]["label1"], "value1");
    }

    #[test]
    fn counter() {
        let (client, captured) = capturing_client();
        client.counter("test.counter", 10);

        let m = &captured.messages()[0];
        assert_common(m);
        assert_eq!(m["type"], "counter");
        assert_eq!(m["name"], "test.counter");
        assert_eq!(m["value"], 10);
    }

    #[test]
    fn gauge() {
        let (client, captured) = capturing_client();
        client.gauge("test.gauge", 9.0);

        let m = &captured.messages()[0];
        assert_common(m);
        assert_eq!(m["type"], "gauge");
        assert_eq!(m["value"], 9.0);
    }

    #[test]
    fn event() {
        let (client, captured) = capturing_client();
        client.event("test.event", "subject", "body", ["a@b.com", "team"]);

        let m = &captured.messages()[0];
        assert_common(m);
        assert_eq!(m["type"], "event");
        assert_eq!(m["subject"], "subject");
        assert_eq!(m["body"], "body");
        assert_eq!(m["attn"], json!(["a@b.com", "team"]));
    }

    #[test]
    fn event_truncates_subject_and_body() {
        let (client, captured) = capturing_client();
        let long = "s".repeat(4_000);
        client.event("test.event", long.clone(), long, Vec::<String>::new());

        let m = &captured.messages()[0];
        assert_eq!(m["subject"].as_str().map(str::len), Some(3072));
        assert_eq!(m["body"].as_str().map(str::len), Some(3072));
    }

    #[test]
    fn log() {
        let (client, captured) = capturing_client();
        let mut data = Map::new();
        data.insert("severity".to_string(), Value::from("info"));
        client.log("test.log", data);
        client.log("x".repeat(8_000), "");

        let messages = captured.messages();
        assert_common(&messages[0]);
        assert_eq!(messages[0]["type"], "log");
        assert_eq!(messages[0]["subject"], "test.log");
        assert_eq!(messages[0]["data"], json!({ "severity": "info" }));
        assert_eq!(messages[1]["subject"].as_str().map(str::len), Some(7168));
    }

    #[test]
    fn register_process() {
        let (client, captured) = capturing_client();
        let mut data = Map::new();
        data.insert("extra".to_string(), Value::from(true));
        client.register_process("test.process", data);

        let m = &captured.messages()[0];
        assert_common(m);
        assert_eq!(m["type"], "reg_process");
        assert_eq!(m["data"], json!({ "name": "test.process", "language": "rust", "version": VERSION, "extra": true }));
    }

    #[test]
    fn info_process_and_agent() {
        let (client, captured) = capturing_client();
        let mut data = Map::new();
        data.insert("memory".to_string(), Value::from(1_024u64));
        client.info_process("resources", data.clone());
        client.info_agent("host", data);

        let messages = captured.messages();
        assert_common(&messages[0]);
        assert_eq!(messages[0]["type"], "info_process");
        assert_eq!(messages[0]["tag"], "resources");
        assert_eq!(messages[0]["data"], json!({ "memory": 1024 }));
        assert_eq!(messages[1]["type"], "info_agent");
        assert_eq!(messages[1]["tag"], "host");
    }

    #[test]
    fn heartbeat() {
        let (client, captured) = capturing_client();
        client.heartbeat();
        client.heartbeat_named("worker.heartbeat");
        client.heartbeat_full("custom", 1.5, 30.0, SystemTime::now(), labels!());

        let messages = captured.messages();
        assert_common(&messages[0]);
        assert_eq!(messages[0]["type"], "hb_process");
        assert_eq!(messages[0]["name"], "application.heartbeat");
        assert_eq!(messages[0]["value"], 0.0);
        assert_eq!(messages[0]["timeout"], 0.0);
        assert_eq!(messages[1]["name"], "worker.heartbeat");
        assert_eq!(messages[2]["value"], 1.5);
        assert_eq!(messages[2]["timeout"], 30.0);
    }

    #[test]
    fn default_label_toggle() {
        let (client, captured) = capturing_client();
        client.mark("test.mark", "before");
        client.add_default_labels(labels!("label2" => "value2"));
        client.mark("test.mark", "during");
        client.remove_default_labels(["label2"]);
        client.mark("test.mark", "after");

        let messages = captured.messages();
        assert!(messages[0]["labels"].get("label2").is_none());
        assert_eq!(messages[1]["labels"]["label2"], "value2");
        assert!(messages[2]["labels"].get("label2").is_none());
    }

    #[test]
    fn default_labels_win_over_caller_labels() {
        let (client, captured) = capturing_client();
        client.add_default_labels(labels!("shared" => "default"));
        client.mark_full("m", "v", SystemTime::now(), labels!("shared" => "caller", "app" => "x", "pid" => 0));

        let labels = &captured.messages()[0]["labels"];
        assert_eq!(labels["shared"], "default");
        assert_eq!(labels["app"], "test.app");
        assert_eq!(labels["pid"], json!(std::process::id()));
    }

    #[test]
    fn removing_reserved_labels_has_no_effect() {
        let (client, captured) = capturing_client();
        client.remove_default_labels(["app", "pid", "never.added"]);
        client.mark("m", "v");

        let labels = &captured.messages()[0]["labels"];
        assert_eq!(labels["app"], "test.app");
        assert_eq!(labels["pid"], json!(std::process::id()));
    }

    #[test]
    fn explicit_timestamp_is_kept() {
        let (client, captured) = capturing_client();
        client.gauge_full("g", 1.0, from_micros(1_234_567), labels!());
        assert_eq!(captured.messages()[0]["timestamp"], 1_234_567);
    }

    #[test]
    fn unencodable_message_becomes_log() {
        let (client, captured) = capturing_client();
        client.mark_full("test.mark", "baz", SystemTime::now(), labels!("bad" => f64::NAN));

        let messages = captured.messages();
        assert_eq!(messages.len(), 1);
        let m = &messages[0];
        assert_common(m);
        assert_eq!(m["type"], "log");
        let subject = m["subject"].as_str().expect("subject should be a string");
        assert!(subject.starts_with("Error marshalling json message: "), "{subject}");
        assert!(subject.contains("unsupported value"), "{subject}");
        assert!(m["labels"].get("bad").is_none());

        let telemetry = client.telemetry();
        assert_eq!(telemetry.encode_failures, 1);
        assert_eq!(telemetry.fallbacks_dropped, 0);
        assert_eq!(telemetry.messages_sent, 1);
    }

    #[test]
    fn unencodable_fallback_is_dropped_without_recursing() {
        let (client, captured) = capturing_client();
        client.add_default_labels(labels!("bad" => f64::INFINITY));
        client.counter("test.counter", 1);

        assert!(captured.is_empty());
        let telemetry = client.telemetry();
        assert_eq!(telemetry.encode_failures, 2);
        assert_eq!(telemetry.fallbacks_dropped, 1);

        // The guard is released afterwards, so later failures are reported again.
        client.remove_default_labels(["bad"]);
        client.gauge("test.gauge", f64::NAN);
        let messages = captured.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "log");
    }

    /// Blocks the first write until released, capturing everything written.
    struct GatedSink {
        gated: AtomicBool,
        entered: Sender<()>,
        release: Receiver<()>,
        payloads: Mutex<Vec<Vec<u8>>>,
    }

    impl Sink for GatedSink {
        fn emit(&self, payload: &[u8]) -> io::Result<usize> {
            if self.gated.swap(false, Ordering::SeqCst) {
                let _ = self.entered.send(());
                let _ = self.release.recv();
            }
            self.payloads.lock().push(payload.to_vec());
            Ok(payload.len())
        }
    }

    #[test]
    fn concurrent_encode_failures_are_each_reported() {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let sink = Arc::new(GatedSink {
            gated: AtomicBool::new(true),
            entered: entered_tx,
            release: release_rx,
            payloads: Mutex::new(Vec::new()),
        });
        let client = HasturBuilder::default().with_sink(Arc::clone(&sink)).build().expect("should build");

        // The first thread stalls while writing its fallback log.
        let first = {
            let client = client.clone();
            thread::spawn(move || client.gauge("first", f64::NAN))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).expect("first fallback should reach the sink");

        let second = {
            let client = client.clone();
            thread::spawn(move || client.gauge("second", f64::NAN))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while client.telemetry().encode_failures < 2 && Instant::now() < deadline {
            sleep(Duration::from_millis(5));
        }

        release_tx.send(()).expect("sink should be waiting");
        first.join().expect("first sender should not panic");
        second.join().expect("second sender should not panic");

        let telemetry = client.telemetry();
        assert_eq!(telemetry.encode_failures, 2);
        assert_eq!(telemetry.fallbacks_dropped, 0);
        assert_eq!(telemetry.messages_sent, 2);

        let payloads = sink.payloads.lock();
        assert_eq!(payloads.len(), 2);
        for payload in payloads.iter() {
            let m: serde_json::Value = serde_json::from_slice(payload).expect("should decode");
            assert_eq!(m["type"], "log");
        }
    }

    struct FailingSink {
        attempts: AtomicUsize,
    }

    impl Sink for FailingSink {
        fn emit(&self, _: &[u8]) -> io::Result<usize> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }
    }

    #[test]
    fn write_errors_are_ignored() {
        let sink = Arc::new(FailingSink { attempts: AtomicUsize::new(0) });
        let client = HasturBuilder::default().with_sink(Arc::clone(&sink)).build().expect("should build");

        client.mark("m", "v");
        client.counter("c", 1);

        assert_eq!(sink.attempts.load(Ordering::SeqCst), 2);
        let telemetry = client.telemetry();
        assert_eq!(telemetry.messages_sent, 0);
        assert_eq!(telemetry.messages_dropped_writer, 2);
        assert!(telemetry.bytes_dropped_writer > 0);
    }

    #[test]
    fn time_reports_elapsed_seconds() {
        let (client, captured) = capturing_client();
        let result = client.time("test.time", || {
            sleep(Duration::from_millis(20));
            42
        });
        assert_eq!(result, 42);

        {
            let _timer = client.timer("test.timer");
            sleep(Duration::from_millis(20));
        }
        client.time_current("test.current", Instant::now() - Duration::from_millis(20));

        let messages = captured.messages();
        assert_eq!(messages.len(), 3);
        for (m, name) in messages.iter().zip(["test.time", "test.timer", "test.current"]) {
            assert_eq!(m["type"], "gauge");
            assert_eq!(m["name"], name);
            let seconds = m["value"].as_f64().expect("value should be a number");
            assert!((0.02..5.0).contains(&seconds), "{name} took {seconds}s");
        }
    }

    #[test]
    fn start_registers_process() {
        let (client, captured) = capturing_client();
        client.set_send_process_heartbeat(false);
        client.start().expect("should start");
        client.stop();

        let messages = captured.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["type"], "reg_process");
        assert_eq!(messages[0]["data"]["name"], "test.app");
    }

    #[test]
    fn start_and_stop_heartbeat() {
        let (client, captured) = capturing_client();
        assert!(client.send_process_heartbeat());
        client.start().expect("should start");
        client.stop();

        // Only the registration: the first heartbeat is a full minute away.
        assert_eq!(captured.len(), 1);
    }

    #[test]
    fn heartbeat_schedule_sends_and_ends_with_client() {
        let (client, captured) = capturing_client();
        let schedule =
            spawn_heartbeat(Arc::downgrade(&client.inner), Duration::from_millis(10)).expect("should spawn");

        let deadline = Instant::now() + Duration::from_secs(5);
        while captured.len() < 2 && Instant::now() < deadline {
            sleep(Duration::from_millis(5));
        }
        let messages = captured.messages();
        assert!(messages.len() >= 2);
        assert_eq!(messages[0]["type"], "hb_process");
        assert_eq!(messages[0]["name"], "process_heartbeat");
        assert_eq!(messages[1]["name"], "process_heartbeat");

        drop(client);
        let deadline = Instant::now() + Duration::from_secs(5);
        while !schedule.is_finished() && Instant::now() < deadline {
            sleep(Duration::from_millis(5));
        }
        assert!(schedule.is_finished());
    }

    #[test]
    fn invalid_destination_keeps_previous() {
        let (client, _captured) = capturing_client();
        assert!(client.set_udp_address("not a host name").is_err());
        assert_eq!(client.udp_address(), "127.0.0.1");
        assert_eq!(client.udp_port(), 8125);
    }
}
