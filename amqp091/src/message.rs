//! Assembled message types
//!
//! A message exists on the wire as a method frame, a content header frame
//! and zero or more body frames. The channel state machine assembles those
//! into one of the types here before anything is handed to the user.

use amqp091_types::BasicProperties;
use bytes::Bytes;

/// A message delivered by `Basic.Deliver` or fetched with `Basic.Get`.
///
/// The consumer owns the message until it is acked, rejected, or the
/// channel closes.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Server-assigned delivery tag, unique and monotonic per channel
    pub delivery_tag: u64,

    /// The message was delivered before
    pub redelivered: bool,

    /// Exchange the message was published to
    pub exchange: String,

    /// Routing key the message was published with
    pub routing_key: String,

    /// Consumer tag, present when the message arrived via `Basic.Deliver`
    pub consumer_tag: Option<String>,

    /// Messages left in the queue, present when fetched via `Basic.Get`
    pub message_count: Option<u32>,

    /// Content properties from the header frame
    pub properties: BasicProperties,

    /// The reassembled body
    pub body: Bytes,
}

/// A message the server handed back via `Basic.Return` because a
/// `mandatory`/`immediate` publish could not be satisfied
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnedMessage {
    /// Why the message came back, e.g. 312 NO_ROUTE
    pub reply_code: u16,

    /// Reply text
    pub reply_text: String,

    /// Exchange the message was published to
    pub exchange: String,

    /// Routing key the message was published with
    pub routing_key: String,

    /// Content properties from the header frame
    pub properties: BasicProperties,

    /// The reassembled body
    pub body: Bytes,
}
