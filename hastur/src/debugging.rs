//! Tools for testing code that emits Hastur messages.
//!
//! A [`CapturingSink`] records every payload it is given instead of sending it anywhere. Install it with
//! [`HasturBuilder::with_sink`](crate::HasturBuilder::with_sink) and inspect what was sent through the paired
//! [`Captured`] handle:
//!
//! ```
//! # use hastur::{debugging::CapturingSink, HasturBuilder};
//! let (sink, captured) = CapturingSink::new();
//! let client = HasturBuilder::default().with_app_name("my.app").with_sink(sink).build().unwrap();
//!
//! client.counter("requests", 1);
//!
//! let messages = captured.messages();
//! assert_eq!(messages[0]["type"], "counter");
//! assert_eq!(messages[0]["labels"]["app"], "my.app");
//! ```
use std::{io, sync::Arc};

use parking_lot::Mutex;

use crate::forwarder::Sink;

/// A sink that keeps every payload in memory.
pub struct CapturingSink {
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

/// Read access to the payloads recorded by a [`CapturingSink`].
#[derive(Clone)]
pub struct Captured {
    payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl CapturingSink {
    /// Creates a new `CapturingSink` and the handle used to read what it captures.
    pub fn new() -> (CapturingSink, Captured) {
        let payloads = Arc::new(Mutex::new(Vec::new()));
        (CapturingSink { payloads: Arc::clone(&payloads) }, Captured { payloads })
    }
}

impl Sink for CapturingSink {
    fn emit(&self, payload: &[u8]) -> io::Result<usize> {
        self.payloads.lock().push(payload.to_vec());
        Ok(payload.len())
    }
}

impl Captured {
    /// Returns the raw payloads captured so far.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }

    /// Returns the captured messages, decoded.
    ///
    /// # Panics
    ///
    /// Panics if a captured payload is not a valid JSON document. The client only ever writes valid documents.
    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.payloads
            .lock()
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("captured payload is not valid JSON"))
            .collect()
    }

    /// Returns the number of payloads captured so far.
    pub fn len(&self) -> usize {
        self.payloads.lock().len()
    }

    /// Returns `true` if nothing has been captured.
    pub fn is_empty(&self) -> bool {
        self.payloads.lock().is_empty()
    }

    /// Discards everything captured so far.
    pub fn clear(&self) {
        self.payloads.lock().clear();
    }
}
