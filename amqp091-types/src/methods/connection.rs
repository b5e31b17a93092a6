//! Methods of the connection class (class id 10)

use bytes::Bytes;

use crate::codec::{CodecError, Decoder, Encoder};
use crate::value::FieldTable;

/// Starts the connection negotiation. First method the server sends after
/// accepting the protocol header.
#[derive(Debug, Clone, PartialEq)]
pub struct Start {
    /// Protocol major version the server speaks
    pub version_major: u8,

    /// Protocol minor version the server speaks
    pub version_minor: u8,

    /// Server properties (product, version, capabilities, ...)
    pub server_properties: FieldTable,

    /// Space separated list of SASL mechanisms the server accepts
    pub mechanisms: Bytes,

    /// Space separated list of message locales the server supports
    pub locales: Bytes,
}

impl Start {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_octet(self.version_major);
        e.put_octet(self.version_minor);
        e.put_table(&self.server_properties)?;
        e.put_longstr(&self.mechanisms)?;
        e.put_longstr(&self.locales)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version_major: d.get_octet()?,
            version_minor: d.get_octet()?,
            server_properties: d.get_table()?,
            mechanisms: d.get_longstr()?,
            locales: d.get_longstr()?,
        })
    }
}

/// Client reply to [`Start`] carrying the selected mechanism and the
/// initial SASL response
#[derive(Debug, Clone, PartialEq)]
pub struct StartOk {
    /// Client properties advertised to the server
    pub client_properties: FieldTable,

    /// Selected SASL mechanism
    pub mechanism: String,

    /// Initial SASL response bytes
    pub response: Bytes,

    /// Selected message locale
    pub locale: String,
}

impl StartOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_table(&self.client_properties)?;
        e.put_shortstr(&self.mechanism)?;
        e.put_longstr(&self.response)?;
        e.put_shortstr(&self.locale)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            client_properties: d.get_table()?,
            mechanism: d.get_shortstr()?,
            response: d.get_longstr()?,
            locale: d.get_shortstr()?,
        })
    }
}

/// Additional SASL challenge from the server
#[derive(Debug, Clone, PartialEq)]
pub struct Secure {
    /// Challenge bytes
    pub challenge: Bytes,
}

impl Secure {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_longstr(&self.challenge)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            challenge: d.get_longstr()?,
        })
    }
}

/// Client reply to a SASL challenge
#[derive(Debug, Clone, PartialEq)]
pub struct SecureOk {
    /// Response bytes
    pub response: Bytes,
}

impl SecureOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_longstr(&self.response)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            response: d.get_longstr()?,
        })
    }
}

/// Server proposal of connection limits
#[derive(Debug, Clone, PartialEq)]
pub struct Tune {
    /// Highest channel id the server accepts, 0 for no limit
    pub channel_max: u16,

    /// Largest frame the server accepts, 0 for no limit
    pub frame_max: u32,

    /// Heartbeat period the server wants, in seconds, 0 to disable
    pub heartbeat: u16,
}

impl Tune {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.channel_max);
        e.put_long(self.frame_max);
        e.put_short(self.heartbeat);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            channel_max: d.get_short()?,
            frame_max: d.get_long()?,
            heartbeat: d.get_short()?,
        })
    }
}

/// Client confirmation of the negotiated connection limits
#[derive(Debug, Clone, PartialEq)]
pub struct TuneOk {
    /// Negotiated channel-max
    pub channel_max: u16,

    /// Negotiated frame-max
    pub frame_max: u32,

    /// Negotiated heartbeat period in seconds
    pub heartbeat: u16,
}

impl TuneOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.channel_max);
        e.put_long(self.frame_max);
        e.put_short(self.heartbeat);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            channel_max: d.get_short()?,
            frame_max: d.get_long()?,
            heartbeat: d.get_short()?,
        })
    }
}

/// Opens a connection to a virtual host
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    /// Virtual host name, `/` by default
    pub virtual_host: String,

    /// Reserved, always empty
    pub reserved_1: String,

    /// Reserved, always false
    pub reserved_2: bool,
}

impl Open {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.virtual_host)?;
        e.put_shortstr(&self.reserved_1)?;
        e.put_bit(self.reserved_2);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            virtual_host: d.get_shortstr()?,
            reserved_1: d.get_shortstr()?,
            reserved_2: d.get_bit()?,
        })
    }
}

/// Server confirmation that the connection is open
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOk {
    /// Reserved, always empty
    pub reserved_1: String,
}

impl OpenOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.reserved_1)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_shortstr()?,
        })
    }
}

/// Closes the connection. Either peer may send this.
#[derive(Debug, Clone, PartialEq)]
pub struct Close {
    /// Reply code, 200 for a clean close
    pub reply_code: u16,

    /// Reply text
    pub reply_text: String,

    /// Class id of the offending method, 0 if none
    pub class_id: u16,

    /// Method id of the offending method, 0 if none
    pub method_id: u16,
}

impl Close {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_short(self.reply_code);
        e.put_shortstr(&self.reply_text)?;
        e.put_short(self.class_id);
        e.put_short(self.method_id);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reply_code: d.get_short()?,
            reply_text: d.get_shortstr()?,
            class_id: d.get_short()?,
            method_id: d.get_short()?,
        })
    }
}

/// Confirms a [`Close`]
#[derive(Debug, Clone, PartialEq)]
pub struct CloseOk;

impl CloseOk {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// The server stopped accepting publishes (resource alarm)
#[derive(Debug, Clone, PartialEq)]
pub struct Blocked {
    /// Why the connection is blocked
    pub reason: String,
}

impl Blocked {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.reason)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reason: d.get_shortstr()?,
        })
    }
}

/// The server resumed accepting publishes
#[derive(Debug, Clone, PartialEq)]
pub struct Unblocked;

impl Unblocked {
    pub(crate) fn encode(&self, _e: &mut Encoder<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    pub(crate) fn decode(_d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}
