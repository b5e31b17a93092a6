//! Implements errors associated with a channel

use amqp091_types::CloseInfo;

use crate::message::ReturnedMessage;

/// Error associated with channel operations.
///
/// Clonable because the same closure reason is replayed to every waiter on
/// the channel.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The peer closed the channel or the connection with an error code
    #[error("Closed by peer: {0}")]
    UnexpectedClose(CloseInfo),

    /// The peer went silent past the heartbeat grace window
    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    /// The channel or its connection is already closed
    #[error("Channel is closed")]
    Closed,

    /// A mandatory or immediate publish came back via `Basic.Return`
    #[error("Message returned by the server: {} {}", .0.reply_code, .0.reply_text)]
    MessageReturned(Box<ReturnedMessage>),

    /// The peer sent something that does not fit the channel's state
    #[error("Protocol state error: {0}")]
    State(String),
}

impl Error {
    /// Whether this error means the channel cannot be used anymore
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::MessageReturned(_))
    }
}
