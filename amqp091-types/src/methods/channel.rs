//! Methods of the channel class (class id 20)

use bytes::Bytes;

use crate::codec::{CodecError, Decoder, Encoder};

/// Opens a channel on the connection
#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    /// Reserved, always empty
    pub reserved_1: String,
}

impl Open {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_shortstr(&self.reserved_1)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_shortstr()?,
        })
    }
}

/// Server confirmation that the channel is open
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOk {
    /// Reserved, always empty
    pub reserved_1: Bytes,
}

impl OpenOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_longstr(&self.reserved_1)
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reserved_1: d.get_longstr()?,
        })
    }
}

/// Asks the peer to pause or resume content flow on this channel
#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    /// True to resume flow, false to pause it
    pub active: bool,
}

impl Flow {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_bit(self.active);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            active: d.get_bit()?,
        })
    }
}

/// Confirms a [`Flow`]
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOk {
    /// The flow state the peer settled on
    pub active: bool,
}

impl FlowOk {
    pub(crate) fn encode(&self, e: &mut Encoder<'_>) -> Result<(), CodecError> {
        e.put_bit(self.active);
        Ok(())
    }

    pub(crate) fn decode(d: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            active: d.get_bit()?,
        })
    }
}

/// Closes the channel. Either peer may send this.
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
