use std::time::Duration;

use thiserror::Error;

use crate::{
    client::Client,
    forwarder::{Destination, Sink, UdpSink},
    value::Labels,
};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that could occur while configuring a Hastur client.
///
/// Sending messages never fails from the caller's point of view; only configuration does.
#[derive(Debug, Error)]
pub enum Error {
    /// The destination could not be resolved, or no socket could be connected to it.
    #[error("invalid destination {destination}: {reason}")]
    InvalidDestination {
        /// The destination, as `host:port`.
        destination: String,

        /// Details about the failure.
        reason: String,
    },

    /// Failed to spawn a background thread.
    #[error("failed to spawn background thread")]
    Backend,

    /// Failed to install the recorder due to an existing global recorder already being installed.
    #[error("failed to install Hastur recorder as global recorder")]
    FailedToInstall,
}

impl Error {
    pub(crate) fn invalid_destination(destination: &Destination, reason: impl ToString) -> Self {
        Error::InvalidDestination { destination: destination.to_string(), reason: reason.to_string() }
    }
}

/// Builder for a Hastur [`Client`].
pub struct HasturBuilder {
    destination: Destination,
    write_timeout: Option<Duration>,
    app_name: String,
    default_labels: Labels,
    process_heartbeat: bool,
    sink: Option<Box<dyn Sink>>,
}

impl HasturBuilder {
    /// Set the address of the agent to send messages to.
    ///
    /// This can be an IP address or a host name. It is resolved when the client is built.
    ///
    /// Defaults to `127.0.0.1`.
    #[must_use]
    pub fn with_udp_address<A>(mut self, address: A) -> Self
    where
        A: Into<String>,
    {
        self.destination.address = address.into();
        self
    }

    /// Set the UDP port of the agent to send messages to.
    ///
    /// Defaults to 8125.
    #[must_use]
    pub fn with_udp_port(mut self, port: u16) -> Self {
        self.destination.port = port;
        self
    }

    /// Set the write timeout for sending messages.
    ///
    /// When the write timeout is reached, the message being sent is dropped without retrying. `None` means writes
    /// block for as long as the operating system lets them.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the app name attached to every message as the `app` label.
    ///
    /// When unset (or set to an empty string), the `HASTUR_APP_NAME` environment variable is used, falling back to the
    /// name the executable was invoked as.
    #[must_use]
    pub fn with_app_name<N>(mut self, name: N) -> Self
    where
        N: Into<String>,
    {
        self.app_name = name.into();
        self
    }

    /// Add labels to attach to every message.
    ///
    /// Can be called multiple times; later labels replace earlier labels with the same key. The `app` and `pid` labels
    /// are always computed by the client and cannot be replaced.
    #[must_use]
    pub fn with_default_labels(mut self, labels: Labels) -> Self {
        self.default_labels.extend(labels);
        self
    }

    /// Sets whether or not [`Client::start`] begins sending periodic process heartbeats.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_process_heartbeat(mut self, enabled: bool) -> Self {
        self.process_heartbeat = enabled;
        self
    }

    /// Send messages to the given sink instead of over UDP.
    ///
    /// The configured address and port are not used until the client's destination is changed, at which point the
    /// sink is replaced by a UDP sink for the new destination.
    #[must_use]
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: Sink + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// If no sink was given and the destination cannot be resolved or connected to, an error is returned.
    pub fn build(self) -> Result<Client, Error> {
        let sink: Box<dyn Sink> = match self.sink {
            Some(sink) => sink,
            None => Box::new(
                UdpSink::from_destination(&self.destination, self.write_timeout)
                    .map_err(|e| Error::invalid_destination(&self.destination, e))?,
            ),
        };

        Ok(Client::new(
            self.destination,
            self.write_timeout,
            sink,
            self.app_name,
            self.default_labels,
            self.process_heartbeat,
        ))
    }

    /// Builds the client and installs it as the global [`metrics`] recorder.
    ///
    /// Metrics recorded through the `metrics` macros are then sent as Hastur messages. The client is returned so
    /// that Hastur-specific messages can be sent directly.
    ///
    /// # Errors
    ///
    /// If the client cannot be built, or a global recorder is already installed, an error is returned.
    pub fn install(self) -> Result<Client, Error> {
        let client = self.build()?;

        metrics::set_global_recorder(client.recorder()).map_err(|_| Error::FailedToInstall)?;
        Ok(client)
    }
}

impl Default for HasturBuilder {
    fn default() -> Self {
        HasturBuilder {
            destination: Destination::default(),
            write_timeout: Some(DEFAULT_WRITE_TIMEOUT),
            app_name: String::new(),
            default_labels: Labels::new(),
            process_heartbeat: true,
            sink: None,
        }
    }
}
