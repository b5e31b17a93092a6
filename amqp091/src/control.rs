//! Control messages between handles and engine tasks

use amqp091_types::methods::basic;
use amqp091_types::{ContentHeader, Method};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::channel;
use crate::connection::AllocChannelError;
use crate::frames::FramePayload;
use crate::message::Message;

pub(crate) enum ConnectionControl {
    /// Gracefully close the connection: best-effort `Channel.Close` on every
    /// live channel, then `Connection.Close`, then drain for the reply
    Close {
        reply_code: u16,
        reply_text: String,
    },

    /// Reserve the lowest free channel id and register its inbound handoff
    AllocateChannel {
        incoming: mpsc::UnboundedSender<FramePayload>,
        responder: oneshot::Sender<Result<u16, AllocChannelError>>,
    },

    /// Drop a channel's registration after it reached its terminal state
    DeallocateChannel(u16),

    /// A channel engine observed a protocol violation that is fatal to the
    /// whole connection
    Fault {
        reply_code: u16,
        reply_text: String,
    },
}

impl std::fmt::Debug for ConnectionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Close {
                reply_code,
                reply_text,
            } => write!(f, "Close({reply_code}, {reply_text:?})"),
            Self::AllocateChannel { .. } => write!(f, "AllocateChannel"),
            Self::DeallocateChannel(id) => write!(f, "DeallocateChannel({id})"),
            Self::Fault {
                reply_code,
                reply_text,
            } => write!(f, "Fault({reply_code}, {reply_text:?})"),
        }
    }
}

/// What a synchronous request resolves to
#[derive(Debug)]
pub(crate) enum SyncReply {
    /// A plain reply method, e.g. `Queue.DeclareOk`
    Method(Method),

    /// A reply that carried content, i.e. `Basic.GetOk` plus its message
    Content(Box<Message>),
}

pub(crate) enum ChannelControl {
    /// Send a method and wake the responder with the paired reply
    Rpc {
        method: Method,
        responder: oneshot::Sender<Result<SyncReply, channel::Error>>,
        /// For `Basic.Consume`: the queue to register under the
        /// authoritative tag from `Consume.Ok`
        deliveries: Option<mpsc::Sender<Message>>,
    },

    /// Send a method that has no reply (acks, rejects, nowait cancels)
    Send(Method),

    /// Send the method/header/body sequence of a publish
    Publish {
        method: basic::Publish,
        header: ContentHeader,
        body: Bytes,
    },
}

impl std::fmt::Debug for ChannelControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rpc { method, .. } => write!(f, "Rpc({method:?})"),
            Self::Send(method) => write!(f, "Send({method:?})"),
            Self::Publish { method, .. } => write!(f, "Publish({method:?})"),
        }
    }
}
