//! Builder for [`Connection`]

use std::sync::Arc;
use std::time::Duration;

use amqp091_types::definitions::PORT;
use amqp091_types::{FieldTable, FieldValue};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use url::Url;

use crate::connection::engine::ConnectionEngine;
use crate::connection::{Connection, OpenError};
use crate::sasl::SaslProfile;
use crate::transport::Transport;

pub(crate) const DEFAULT_CONTROL_CHAN_BUF: usize = 128;
pub(crate) const DEFAULT_OUTGOING_BUFFER_SIZE: usize = u16::MAX as usize;

const DEFAULT_CHANNEL_MAX: u16 = 2047;
const DEFAULT_FRAME_MAX: u32 = 131_072;
const DEFAULT_HEARTBEAT_SECONDS: u16 = 60;
const DEFAULT_STREAM_BUFFER_SIZE: usize = 16;
const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for [`Connection`]
#[derive(Debug, Clone)]
pub struct Builder {
    /// Host to connect to
    pub host: String,

    /// Port to connect to
    pub port: u16,

    /// Virtual host passed in `Connection.Open`
    pub virtual_host: String,

    /// SASL profile used during the handshake
    pub sasl_profile: SaslProfile,

    /// Proposed channel-max, negotiated down by the server
    pub desired_channel_max: u16,

    /// Proposed frame-max in bytes, including the 8 bytes of frame
    /// overhead
    pub desired_frame_max: u32,

    /// Proposed heartbeat period in seconds, 0 to ask for none
    pub desired_heartbeat: u16,

    /// Extra client properties merged over the built-in ones in
    /// `Connection.StartOk`
    pub client_properties: FieldTable,

    /// Depth of each consumer's delivery queue
    pub stream_buffer_size: usize,

    /// Bound on the whole prelude-to-OpenOk sequence
    pub handshake_timeout: Duration,

    /// Locale sent in `Connection.StartOk`
    pub locale: String,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Creates a builder with RabbitMQ-compatible defaults
    pub fn new() -> Self {
        Self {
            host: "localhost".into(),
            port: PORT,
            virtual_host: "/".into(),
            sasl_profile: SaslProfile::from(("guest", "guest")),
            desired_channel_max: DEFAULT_CHANNEL_MAX,
            desired_frame_max: DEFAULT_FRAME_MAX,
            desired_heartbeat: DEFAULT_HEARTBEAT_SECONDS,
            client_properties: FieldTable::new(),
            stream_buffer_size: DEFAULT_STREAM_BUFFER_SIZE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            locale: "en_US".into(),
        }
    }

    /// Sets the host
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the virtual host
    pub fn virtual_host(mut self, virtual_host: impl Into<String>) -> Self {
        self.virtual_host = virtual_host.into();
        self
    }

    /// Sets the SASL profile
    pub fn sasl_profile(mut self, profile: SaslProfile) -> Self {
        self.sasl_profile = profile;
        self
    }

    /// Shorthand for a PLAIN profile with the given credentials
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.sasl_profile = SaslProfile::Plain {
            username: username.into(),
            password: password.into(),
        };
        self
    }

    /// Sets the proposed channel-max
    pub fn channel_max(mut self, channel_max: u16) -> Self {
        self.desired_channel_max = channel_max;
        self
    }

    /// Sets the proposed frame-max
    pub fn frame_max(mut self, frame_max: u32) -> Self {
        self.desired_frame_max = frame_max;
        self
    }

    /// Sets the proposed heartbeat period in seconds
    pub fn heartbeat(mut self, seconds: u16) -> Self {
        self.desired_heartbeat = seconds;
        self
    }

    /// Adds a client property advertised in `Connection.StartOk`
    pub fn client_property(
        mut self,
        name: impl Into<String>,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.client_properties.insert(name.into(), value.into());
        self
    }

    /// Sets the per-consumer delivery queue depth
    pub fn stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size;
        self
    }

    /// Sets the handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// The client properties sent in `Connection.StartOk`: the built-in
    /// identification and capabilities, with user entries merged on top
    pub(crate) fn amended_client_properties(&self) -> FieldTable {
        let mut capabilities = FieldTable::new();
        for capability in [
            "publisher_confirms",
            "consumer_cancel_notify",
            "basic.nack",
            "connection.blocked",
            "authentication_failure_close",
        ] {
            capabilities.insert(capability.into(), FieldValue::Boolean(true));
        }

        let mut properties = FieldTable::new();
        properties.insert("product".into(), FieldValue::from(env!("CARGO_PKG_NAME")));
        properties.insert("version".into(), FieldValue::from(env!("CARGO_PKG_VERSION")));
        properties.insert("platform".into(), FieldValue::from("Rust"));
        properties.insert("capabilities".into(), FieldValue::Table(capabilities));
        for (name, value) in &self.client_properties {
            properties.insert(name.clone(), value.clone());
        }
        properties
    }

    /// Parses endpoint, credentials and virtual host from an `amqp://` url,
    /// connects over TCP, and opens the connection
    pub async fn open(
        mut self,
        url: impl TryInto<Url, Error = url::ParseError>,
    ) -> Result<Connection, OpenError> {
        let url = url.try_into()?;
        if url.scheme() != "amqp" {
            return Err(OpenError::InvalidScheme);
        }
        if let Some(host) = url.host_str() {
            self.host = host.to_string();
        }
        if let Some(port) = url.port() {
            self.port = port;
        }
        if let Ok(profile) = SaslProfile::try_from(&url) {
            self.sasl_profile = profile;
        }
        match url.path() {
            "" | "/" => {}
            path => {
                // the vhost is the path without its leading slash; `%2f`
                // is the conventional encoding of the default vhost
                let vhost = path[1..].replace("%2f", "/").replace("%2F", "/");
                self.virtual_host = vhost;
            }
        }

        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        self.open_with_stream(stream).await
    }

    /// Runs the handshake over an already connected byte stream and spawns
    /// the connection engine
    pub async fn open_with_stream<Io>(self, io: Io) -> Result<Connection, OpenError>
    where
        Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let handshake_timeout = self.handshake_timeout;
        let handshake = async move {
            let transport = Transport::negotiate(io, self.desired_frame_max as usize).await?;

            let (control_tx, control_rx) = mpsc::channel(DEFAULT_CONTROL_CHAN_BUF);
            let (outgoing_tx, outgoing_rx) = mpsc::channel(DEFAULT_OUTGOING_BUFFER_SIZE);
            let fault = Arc::new(Mutex::new(None));

            let engine =
                ConnectionEngine::open(transport, &self, control_rx, outgoing_rx, fault.clone())
                    .await?;
            let limits = engine.limits();
            let server_properties = engine.server_properties();
            let handle = engine.spawn();

            Ok(Connection::new(
                control_tx,
                outgoing_tx,
                handle,
                limits,
                server_properties,
                fault,
                self.stream_buffer_size,
            ))
        };

        match tokio::time::timeout(handshake_timeout, handshake).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(OpenError::Timeout),
        }
    }
}
