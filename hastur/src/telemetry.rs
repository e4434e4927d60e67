use std::sync::atomic::{AtomicU64, Ordering};

/// Client telemetry.
///
/// `Telemetry` counts what the dispatcher did with each message, so that callers can tell whether anything is being
/// lost without the send path ever reporting errors.
#[derive(Default)]
pub(crate) struct Telemetry {
    messages_sent: AtomicU64,
    bytes_sent: AtomicU64,
    messages_dropped_writer: AtomicU64,
    bytes_dropped_writer: AtomicU64,
    encode_failures: AtomicU64,
    fallbacks_dropped: AtomicU64,
}

impl Telemetry {
    /// Tracks a successful write.
    pub fn track_send_succeeded(&self, bytes_len: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes_len as u64, Ordering::Relaxed);
    }

    /// Tracks a failed write.
    pub fn track_send_failed(&self, bytes_len: usize) {
        self.messages_dropped_writer.fetch_add(1, Ordering::Relaxed);
        self.bytes_dropped_writer.fetch_add(bytes_len as u64, Ordering::Relaxed);
    }

    /// Tracks a message that failed to encode.
    pub fn track_encode_failed(&self) {
        self.encode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Tracks a fallback log message that was dropped because it was produced while already reporting a failure.
    pub fn track_fallback_dropped(&self) {
        self.fallbacks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_dropped_writer: self.messages_dropped_writer.load(Ordering::Relaxed),
            bytes_dropped_writer: self.bytes_dropped_writer.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
            fallbacks_dropped: self.fallbacks_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of a client's telemetry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    /// Messages written to the sink.
    pub messages_sent: u64,

    /// Bytes written to the sink.
    pub bytes_sent: u64,

    /// Messages the sink failed to write.
    pub messages_dropped_writer: u64,

    /// Bytes the sink failed to write.
    pub bytes_dropped_writer: u64,

    /// Messages that could not be encoded, including fallback log messages.
    pub encode_failures: u64,

    /// Fallback log messages that were dropped because they also failed to encode.
    pub fallbacks_dropped: u64,
}
