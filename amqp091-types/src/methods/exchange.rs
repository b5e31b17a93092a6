//! Methods of the exchange class (class id 40)

use crate::codec::{CodecError, Decoder, Encoder};
use crate::value::FieldTable;

/// The built-in exchange types, plus broker extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeKind {
    /// Routes on an exact routing-key match
    Direct,
    /// Routes to every bound queue
    Fanout,
    /// Routes on a dotted pattern match
    Topic,
    /// Routes on header table matches
    Headers,
    /// A broker-specific exchange type, e.g. `x-delayed-message`
    Custom(String),
}

impl ExchangeKind {
    /// The type string sent in `Exchange.Declare`
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::Custom(name) => name,
        }
    }
}

impl Default for ExchangeKind {
    fn default() -> Self {
        Self::Direct
    }
}

/// Creates an exchange if it does not already exist
#[derive(Debug, Clone, PartialEq)]
pub struct Declare {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Exchange name
    pub exchange: String,

    /// Exchange type string
    pub kind: String,

    /// Only check for existence, do not create
    pub passive: bool,

    /// Survive a broker restart
    pub durable: bool,

    /// Delete when no longer used
    pub auto_delete: bool,

    /// May not be published to directly
    pub internal: bool,

    /// Do not send a DeclareOk
    pub no_wait: bool,

    /// Implementation-specific arguments
    pub arguments: FieldTable,
}

impl Declare {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.exchange)?;
        e.put_shortstr(&self.kind)?;
        e.put_bit(self.passive);
        e.put_bit(self.durable);
        e.put_bit(self.auto_delete);
        e.put_bit(self.internal);
        e.put_bit(self.no_wait);
        e.put_table(&self.arguments)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            exchange: d.get_shortstr()?,
            kind: d.get_shortstr()?,
            passive: d.get_bit()?,
            durable: d.get_bit()?,
            auto_delete: d.get_bit()?,
            internal: d.get_bit()?,
            no_wait: d.get_bit()?,
            arguments: d.get_table()?,
        })
    }
}

/// Confirms a [`Declare`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeclareOk;

impl DeclareOk {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Deletes an exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Exchange name
    pub exchange: String,

    /// Only delete if it has no bindings
    pub if_unused: bool,

    /// Do not send a DeleteOk
    pub no_wait: bool,
}

impl Delete {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.exchange)?;
        e.put_bit(self.if_unused);
        e.put_bit(self.no_wait);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            exchange: d.get_shortstr()?,
            if_unused: d.get_bit()?,
            no_wait: d.get_bit()?,
        })
    }
}

/// Confirms a [`Delete`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOk;

impl DeleteOk {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Binds an exchange to an exchange (broker extension)
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Destination exchange
    pub destination: String,

    /// Source exchange
    pub source: String,

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
        e.put_shortstr(&self.destination)?;
        e.put_shortstr(&self.source)?;
        e.put_shortstr(&self.routing_key)?;
        e.put_bit(self.no_wait);
        e.put_table(&self.arguments)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            destination: d.get_shortstr()?,
            source: d.get_shortstr()?,
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

/// Removes an exchange-to-exchange binding (broker extension)
#[derive(Debug, Clone, PartialEq)]
pub struct Unbind {
    /// Reserved, always 0
    pub reserved_1: u16,

    /// Destination exchange
    pub destination: String,

    /// Source exchange
    pub source: String,

    /// Routing key of the binding
    pub routing_key: String,

    /// Do not send an UnbindOk
    pub no_wait: bool,

    /// Implementation-specific arguments
    pub arguments: FieldTable,
}

impl Unbind {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reserved_1);
        e.put_shortstr(&self.destination)?;
        e.put_shortstr(&self.source)?;
        e.put_shortstr(&self.routing_key)?;
        e.put_bit(self.no_wait);
        e.put_table(&self.arguments)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_short()?,
            destination: d.get_shortstr()?,
            source: d.get_shortstr()?,
            routing_key: d.get_shortstr()?,
            no_wait: d.get_bit()?,
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
