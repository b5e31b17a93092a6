//! Methods of the queue class (class id 50)

use crate::codec::{CodecError, Decoder, Encoder};
use crate::value::FieldTable;

/// Creates a queue if it does not already exist
#[derive(Debug, Clone, PartialEq)]
pub struct Declare {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Queue name; empty asks the server to generate one
    pub queue: String,

    /// Only check for existence, do not create
    pub passive: bool,

    /// Survive a broker restart
    pub durable: bool,

    /// Only accessible from this connection, deleted with it
    pub exclusive: bool,

    /// Delete once all consumers are gone
    pub auto_delete: bool,

    /// Do not send a DeclareOk
    pub no_wait: bool,

    /// Implementation-specific arguments
    pub arguments: FieldTable,
}

impl Declare {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.queue)?;
        e.put_bit(self.passive);
        e.put_bit(self.durable);
        e.put_bit(self.exclusive);
        e.put_bit(self.auto_delete);
        e.put_bit(self.no_wait);
        e.put_table(&self.arguments)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            queue: d.get_shortstr()?,
            passive: d.get_bit()?,
            durable: d.get_bit()?,
            exclusive: d.get_bit()?,
            auto_delete: d.get_bit()?,
            no_wait: d.get_bit()?,
            arguments: d.get_table()?,
        })
    }
}

/// Confirms a [`Declare`] and reports queue statistics
#[derive(Debug, Clone, PartialEq)]
pub struct DeclareOk {
    /// The queue name, authoritative when the server generated it
    pub queue: String,

    /// Number of messages currently in the queue
    pub message_count: u32,

    /// Number of active consumers on the queue
    pub consumer_count: u32,
}

impl DeclareOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.queue)?;
        e.put_long(self.message_count);
        e.put_long(self.consumer_count);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            queue: d.get_shortstr()?,
            message_count: d.get_long()?,
            consumer_count: d.get_long()?,
        })
    }
}

/// Binds a queue to an exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Queue to bind
    pub queue: String,

    /// Exchange to bind to
    pub exchange: String,

    /// Routing key for the binding
    pub routing_key: String,

    /// Do not send a BindOk
    pub no_wait: bool,

    /// Implementation-specific arguments
    pub arguments: FieldTable,
}

impl Bind {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.queue)?;
        e.put_shortstr(&self.exchange)?;
        e.put_shortstr(&self.routing_key)?;
        e.put_bit(self.no_wait);
        e.put_table(&self.arguments)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            queue: d.get_shortstr()?,
            exchange: d.get_shortstr()?,
            routing_key: d.get_shortstr()?,
            no_wait: d.get_bit()?,
            arguments: d.get_table()?,
        })
    }
}

/// Confirms a [`Bind`]
#[derive(Debug, Clone, PartialEq)]
pub struct BindOk;

impl BindOk {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Removes a queue binding
#[derive(Debug, Clone, PartialEq)]
pub struct Unbind {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Queue to unbind
    pub queue: String,

    /// Exchange to unbind from
    pub exchange: String,

    /// Routing key of the binding
    pub routing_key: String,

    /// Implementation-specific arguments
    pub arguments: FieldTable,
}

impl Unbind {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.queue)?;
        e.put_shortstr(&self.exchange)?;
        e.put_shortstr(&self.routing_key)?;
        e.put_table(&self.arguments)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            queue: d.get_shortstr()?,
            exchange: d.get_shortstr()?,
            routing_key: d.get_shortstr()?,
            arguments: d.get_table()?,
        })
    }
}

/// Confirms an [`Unbind`]
#[derive(Debug, Clone, PartialEq)]
pub struct UnbindOk;

impl UnbindOk {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Discards all messages in a queue
#[derive(Debug, Clone, PartialEq)]
pub struct Purge {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Queue to purge
    pub queue: String,

    /// Do not send a PurgeOk
    pub no_wait: bool,
}

impl Purge {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.queue)?;
        e.put_bit(self.no_wait);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            queue: d.get_shortstr()?,
            no_wait: d.get_bit()?,
        })
    }
}

/// Confirms a [`Purge`]
#[derive(Debug, Clone, PartialEq)]
pub struct PurgeOk {
    /// Number of messages discarded
    pub message_count: u32,
}

impl PurgeOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_long(self.message_count);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            message_count: d.get_long()?,
        })
    }
}

/// Deletes a queue
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Queue to delete
    pub queue: String,

    /// Only delete if it has no consumers
    pub if_unused: bool,

    /// Only delete if it has no messages
    pub if_empty: bool,

    /// Do not send a DeleteOk
    pub no_wait: bool,
}

impl Delete {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.queue)?;
        e.put_bit(self.if_unused);
        e.put_bit(self.if_empty);
        e.put_bit(self.no_wait);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            queue: d.get_shortstr()?,
            if_unused: d.get_bit()?,
            if_empty: d.get_bit()?,
            no_wait: d.get_bit()?,
        })
    }
}

/// Confirms a [`Delete`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOk {
    /// Number of messages deleted with the queue
    pub message_count: u32,
}

impl DeleteOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_long(self.message_count);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            message_count: d.get_long()?,
        })
    }
}
