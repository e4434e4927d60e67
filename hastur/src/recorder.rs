use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::SystemTime,
};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};

use crate::{client::Client, value::Labels, Value};

/// A recorder that sends [`metrics`] measurements as Hastur messages.
///
/// Every update is sent immediately: counter increments as `counter` deltas, and gauge updates and histogram samples
/// as `gauge` values. Metric labels become message labels.
pub struct HasturRecorder {
    client: Client,
}

impl HasturRecorder {
    pub(crate) fn new(client: Client) -> Self {
        HasturRecorder { client }
    }
}

struct Handle {
    client: Client,
    name: String,
    labels: Labels,
}

impl Handle {
    fn from_key(client: &Client, key: &Key) -> Self {
        let labels = key
            .labels()
            .map(|label| (label.key().to_string(), Value::from(label.value())))
            .collect();
        Handle { client: client.clone(), name: key.name().to_string(), labels }
    }

    fn send_counter(&self, delta: u64) {
        let delta = i64::try_from(delta).unwrap_or(i64::MAX);
        self.client.counter_full(self.name.as_str(), delta, SystemTime::now(), self.labels.clone());
    }

    fn send_gauge(&self, value: f64) {
        self.client.gauge_full(self.name.as_str(), value, SystemTime::now(), self.labels.clone());
    }
}

struct CounterHandle {
    handle: Handle,
    total: AtomicU64,
}

impl CounterFn for CounterHandle {
    fn increment(&self, value: u64) {
        self.total.fetch_add(value, Ordering::AcqRel);
        self.handle.send_counter(value);
    }

    fn absolute(&self, value: u64) {
        let previous = self.total.fetch_max(value, Ordering::AcqRel);
        if value > previous {
            self.handle.send_counter(value - previous);
        }
    }
}

struct GaugeHandle {
    handle: Handle,
    value: AtomicU64,
}

impl GaugeHandle {
    fn update(&self, f: impl Fn(f64) -> f64) {
        let previous = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| Some(f(f64::from_bits(bits)).to_bits()))
            .unwrap_or_else(|bits| bits);
        self.handle.send_gauge(f(f64::from_bits(previous)));
    }
}

impl GaugeFn for GaugeHandle {
    fn increment(&self, value: f64) {
        self.update(|current| current + value);
    }

    fn decrement(&self, value: f64) {
        self.update(|current| current - value);
    }

    fn set(&self, value: f64) {
        self.value.store(value.to_bits(), Ordering::Release);
        self.handle.send_gauge(value);
    }
}

impl HistogramFn for Handle {
    fn record(&self, value: f64) {
        self.send_gauge(value);
    }
}

impl Recorder for HasturRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(CounterHandle {
            handle: Handle::from_key(&self.client, key),
            total: AtomicU64::new(0),
        }))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(GaugeHandle {
            handle: Handle::from_key(&self.client, key),
            value: AtomicU64::new(0.0_f64.to_bits()),
        }))
    }

    fn register_histogram(&self, key: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(Handle::from_key(&self.client, key)))
    }
}
