//! Methods of the basic class (class id 60)

use crate::codec::{CodecError, Decoder, Encoder};
use crate::value::FieldTable;

/// Sets the prefetch window for the channel or connection
#[derive(Debug, Clone, PartialEq)]
pub struct Qos {
    /// Prefetch window in octets, 0 for no limit
    pub prefetch_size: u32,

    /// Prefetch window in messages, 0 for no limit
    pub prefetch_count: u16,

    /// Apply to the whole connection instead of the channel
    pub global: bool,
}

impl Qos {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_long(self.prefetch_size);
        e.put_short(self.prefetch_count);
        e.put_bit(self.global);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            prefetch_size: d.get_long()?,
            prefetch_count: d.get_short()?,
            global: d.get_bit()?,
        })
    }
}

/// Confirms a [`Qos`]
#[derive(Debug, Clone, PartialEq)]
pub struct QosOk;

impl QosOk {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Starts a consumer on a queue
#[derive(Debug, Clone, PartialEq)]
pub struct Consume {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Queue to consume from
    pub queue: String,

    /// Consumer tag; empty asks the server to generate one
    pub consumer_tag: String,

    /// Do not deliver messages published on this connection
    pub no_local: bool,

    /// Deliveries need no acknowledgement
    pub no_ack: bool,

    /// Only this consumer may access the queue
    pub exclusive: bool,

    /// Do not send a ConsumeOk
    pub no_wait: bool,

    /// Implementation-specific arguments
    pub arguments: FieldTable,
}

impl Consume {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.queue)?;
        e.put_shortstr(&self.consumer_tag)?;
        e.put_bit(self.no_local);
        e.put_bit(self.no_ack);
        e.put_bit(self.exclusive);
        e.put_bit(self.no_wait);
        e.put_table(&self.arguments)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            queue: d.get_shortstr()?,
            consumer_tag: d.get_shortstr()?,
            no_local: d.get_bit()?,
            no_ack: d.get_bit()?,
            exclusive: d.get_bit()?,
            no_wait: d.get_bit()?,
            arguments: d.get_table()?,
        })
    }
}

/// Confirms a [`Consume`] with the authoritative consumer tag
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeOk {
    /// The consumer tag, server-generated when the request left it empty
    pub consumer_tag: String,
}

impl ConsumeOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.consumer_tag)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            consumer_tag: d.get_shortstr()?,
        })
    }
}

/// Ends a consumer. Servers send this too, to notify consumer cancellation.
#[derive(Debug, Clone, PartialEq)]
pub struct Cancel {
    /// Consumer tag to cancel
    pub consumer_tag: String,

    /// Do not send a CancelOk
    pub no_wait: bool,
}

impl Cancel {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.consumer_tag)?;
        e.put_bit(self.no_wait);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            consumer_tag: d.get_shortstr()?,
            no_wait: d.get_bit()?,
        })
    }
}

/// Confirms a [`Cancel`]
#[derive(Debug, Clone, PartialEq)]
pub struct CancelOk {
    /// The cancelled consumer tag
    pub consumer_tag: String,
}

impl CancelOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.consumer_tag)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            consumer_tag: d.get_shortstr()?,
        })
    }
}

/// Publishes a message. Followed by a content header and body frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Publish {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Exchange to publish to; empty for the default exchange
    pub exchange: String,

    /// Routing key
    pub routing_key: String,

    /// Return the message if it cannot be routed to a queue
    pub mandatory: bool,

    /// Return the message if it cannot be consumed immediately
    pub immediate: bool,
}

impl Publish {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.exchange)?;
        e.put_shortstr(&self.routing_key)?;
        e.put_bit(self.mandatory);
        e.put_bit(self.immediate);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            exchange: d.get_shortstr()?,
            routing_key: d.get_shortstr()?,
            mandatory: d.get_bit()?,
            immediate: d.get_bit()?,
        })
    }
}

/// Returns an undeliverable message to its publisher. Followed by content.
#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    /// Why the message came back
    pub reply_code: u16,

    /// Reply text
    pub reply_text: String,

    /// Exchange the message was published to
    pub exchange: String,

    /// Routing key the message was published with
    pub routing_key: String,
}

impl Return {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reply_code);
        e.put_shortstr(&self.reply_text)?;
        e.put_shortstr(&self.exchange)?;
        e.put_shortstr(&self.routing_key)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reply_code: d.get_short()?,
            reply_text: d.get_shortstr()?,
            exchange: d.get_shortstr()?,
            routing_key: d.get_shortstr()?,
        })
    }
}

/// Delivers a message to a consumer. Followed by content.
#[derive(Debug, Clone, PartialEq)]
pub struct Deliver {
    /// Target consumer
    pub consumer_tag: String,

    /// Server-assigned delivery tag, unique per channel
    pub delivery_tag: u64,

    /// The message was delivered before
    pub redelivered: bool,

    /// Exchange the message was published to
    pub exchange: String,

    /// Routing key the message was published with
    pub routing_key: String,
}

impl Deliver {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.consumer_tag)?;
        e.put_longlong(self.delivery_tag);
        e.put_bit(self.redelivered);
        e.put_shortstr(&self.exchange)?;
        e.put_shortstr(&self.routing_key)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            consumer_tag: d.get_shortstr()?,
            delivery_tag: d.get_longlong()?,
            redelivered: d.get_bit()?,
            exchange: d.get_shortstr()?,
            routing_key: d.get_shortstr()?,
        })
    }
}

/// Synchronously fetches a single message from a queue
#[derive(Debug, Clone, PartialEq)]
pub struct Get {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Queue to fetch from
    pub queue: String,

    /// The message needs no acknowledgement
    pub no_ack: bool,
}

impl Get {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.queue)?;
        e.put_bit(self.no_ack);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            queue: d.get_shortstr()?,
            no_ack: d.get_bit()?,
        })
    }
}

/// Answers a [`Get`] with a message. Followed by content.
#[derive(Debug, Clone, PartialEq)]
pub struct GetOk {
    /// Server-assigned delivery tag
    pub delivery_tag: u64,

    /// The message was delivered before
    pub redelivered: bool,

    /// Exchange the message was published to
    pub exchange: String,

    /// Routing key the message was published with
    pub routing_key: String,

    /// Messages remaining in the queue
    pub message_count: u32,
}

impl GetOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_longlong(self.delivery_tag);
        e.put_bit(self.redelivered);
        e.put_shortstr(&self.exchange)?;
        e.put_shortstr(&self.routing_key)?;
        e.put_long(self.message_count);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            delivery_tag: d.get_longlong()?,
            redelivered: d.get_bit()?,
            exchange: d.get_shortstr()?,
            routing_key: d.get_shortstr()?,
            message_count: d.get_long()?,
        })
    }
}

/// Answers a [`Get`] on an empty queue
#[derive(Debug, Clone, PartialEq)]
pub struct GetEmpty {
    /// Reserved, always empty
    pub reserved_1: String,
}

impl GetEmpty {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.reserved_1)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_shortstr()?,
        })
    }
}

/// Positively acknowledges one or more deliveries
#[derive(Debug, Clone, PartialEq)]
pub struct Ack {
    /// Delivery tag to acknowledge
    pub delivery_tag: u64,

    /// Acknowledge everything up to and including the tag
    pub multiple: bool,
}

impl Ack {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_longlong(self.delivery_tag);
        e.put_bit(self.multiple);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            delivery_tag: d.get_longlong()?,
            multiple: d.get_bit()?,
        })
    }
}

/// Rejects a single delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Reject {
    /// Delivery tag to reject
    pub delivery_tag: u64,

    /// Requeue instead of discarding
    pub requeue: bool,
}

impl Reject {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_longlong(self.delivery_tag);
        e.put_bit(self.requeue);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            delivery_tag: d.get_longlong()?,
            requeue: d.get_bit()?,
        })
    }
}

/// Deprecated asynchronous variant of [`Recover`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverAsync {
    /// Requeue instead of redelivering to the same consumer
    pub requeue: bool,
}

impl RecoverAsync {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_bit(self.requeue);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            requeue: d.get_bit()?,
        })
    }
}

/// Redelivers all unacknowledged messages on the channel
#[derive(Debug, Clone, PartialEq)]
pub struct Recover {
    /// Requeue instead of redelivering to the same consumer
    pub requeue: bool,
}

impl Recover {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_bit(self.requeue);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            requeue: d.get_bit()?,
        })
    }
}

/// Confirms a [`Recover`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecoverOk;

impl RecoverOk {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Negatively acknowledges one or more deliveries (broker extension)
#[derive(Debug, Clone, PartialEq)]
pub struct Nack {
    /// Delivery tag to reject
    pub delivery_tag: u64,

    /// Reject everything up to and including the tag
    pub multiple: bool,

    /// Requeue instead of discarding
    pub requeue: bool,
}

impl Nack {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_longlong(self.delivery_tag);
        e.put_bit(self.multiple);
        e.put_bit(self.requeue);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            delivery_tag: d.get_longlong()?,
            multiple: d.get_bit()?,
            requeue: d.get_bit()?,
        })
    }
}
