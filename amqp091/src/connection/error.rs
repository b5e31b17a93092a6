//! Implements errors associated with the connection

use std::io;

use amqp091_types::CloseInfo;
use tokio::task::JoinError;

use crate::{channel, frames, transport};

/// Error associated with opening a connection
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// IO error
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// Error parsing the url
    #[error(transparent)]
    UrlError(#[from] url::ParseError),

    /// Scheme is invalid or not found
    #[error(r#"Invalid scheme. Only "amqp" is supported."#)]
    InvalidScheme,

    /// The server does not speak AMQP 0-9-1
    #[error("Protocol mismatch. Server answered with header {0:02x?}")]
    ProtocolMismatch([u8; 8]),

    /// SASL negotiation failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The server closed the connection during the handshake
    #[error("Server closed the connection during handshake: {0}")]
    RemoteClosed(CloseInfo),

    /// The handshake did not finish within the configured timeout
    #[error("Handshake timed out")]
    Timeout,

    /// The server sent a frame that does not belong in the handshake
    #[error("Unexpected frame during handshake: {0}")]
    UnexpectedFrame(String),

    /// Frame-level error
    #[error(transparent)]
    Frame(frames::Error),
}

impl From<transport::Error> for OpenError {
    fn from(err: transport::Error) -> Self {
        match err {
            transport::Error::Io(err) => Self::Io(err),
            transport::Error::Frame(frames::Error::ProtocolHeaderReceived(header)) => {
                Self::ProtocolMismatch(header)
            }
            transport::Error::Frame(other) => Self::Frame(other),
            transport::Error::IdleTimeoutElapsed => Self::Timeout,
        }
    }
}

/// Error associated with an open connection
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error("IO Error {0:?}")]
    Io(#[from] io::Error),

    /// Frame-level error
    #[error(transparent)]
    Frame(#[from] frames::Error),

    /// No inbound frame arrived within the heartbeat grace window
    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    /// The peer closed the connection
    #[error("Closed by peer: {0}")]
    RemoteClosed(CloseInfo),

    /// Every channel id up to the negotiated channel-max is taken
    #[error("Reached connection channel max")]
    ChannelMaxReached,

    /// The connection is already closed
    #[error("Connection is closed")]
    Closed,

    /// The peer sent a frame that does not fit the connection's state
    #[error("Unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// Illegal local connection state
    #[error("Illegal local state")]
    IllegalState,

    /// The connection engine task panicked or was aborted
    #[error(transparent)]
    JoinError(#[from] JoinError),
}

impl From<transport::Error> for Error {
    fn from(err: transport::Error) -> Self {
        match err {
            transport::Error::Io(err) => Self::Io(err),
            transport::Error::Frame(err) => Self::Frame(err),
            transport::Error::IdleTimeoutElapsed => Self::HeartbeatTimeout,
        }
    }
}

impl From<channel::Error> for Error {
    fn from(err: channel::Error) -> Self {
        match err {
            channel::Error::UnexpectedClose(info) => Self::RemoteClosed(info),
            channel::Error::HeartbeatTimeout => Self::HeartbeatTimeout,
            channel::Error::Closed => Self::Closed,
            channel::Error::MessageReturned(_) | channel::Error::State(_) => Self::IllegalState,
        }
    }
}

impl Error {
    /// The reason channel waiters observe when this error faults the
    /// connection
    pub(crate) fn as_channel_fault(&self) -> channel::Error {
        match self {
            Error::HeartbeatTimeout => channel::Error::HeartbeatTimeout,
            Error::RemoteClosed(info) => channel::Error::UnexpectedClose(info.clone()),
            _ => channel::Error::Closed,
        }
    }
}

/// Error associated with allocating a new channel id
#[derive(Debug, thiserror::Error)]
pub(crate) enum AllocChannelError {
    #[error("Illegal local state")]
    IllegalState,

    #[error("Reached connection channel max")]
    ChannelMaxReached,
}

impl From<AllocChannelError> for Error {
    fn from(err: AllocChannelError) -> Self {
        match err {
            AllocChannelError::IllegalState => Self::IllegalState,
            AllocChannelError::ChannelMaxReached => Self::ChannelMaxReached,
        }
    }
}
