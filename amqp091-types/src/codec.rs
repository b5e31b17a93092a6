//! Primitive AMQP 0-9-1 encoding and decoding
//!
//! The wire format is positional: each method lists its fields in order and
//! the codec writes them back to back with no self-description, except for
//! field tables which carry their own type tags. Consecutive `bit` fields
//! are packed LSB-first into shared octets; any non-bit field flushes the
//! pending bit buffer. [`Encoder`] and [`Decoder`] keep that bit state so
//! method encoders can stay a flat list of `put_*`/`get_*` calls.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::value::{FieldTable, FieldValue};

/// Error raised while encoding or decoding wire data.
///
/// Any codec error is fatal to the frame it occurred in, and the connection
/// that received the frame must abort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Ran out of bytes mid-value
    #[error("Buffer ended in the middle of a value")]
    UnderRun,

    /// A length field exceeded what its type can carry
    #[error("Value too large for its wire representation")]
    Overflow,

    /// Unknown field-value type tag
    #[error("Invalid field value type tag {0:#04x}")]
    InvalidTypeTag(u8),

    /// A string field was not valid UTF-8
    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    /// A length prefix disagreed with the data that followed it
    #[error("Length prefix does not match encoded data")]
    LengthMismatch,
}

/// Sequential encoder with bit packing.
#[derive(Debug)]
pub struct Encoder<'a> {
    buf: &'a mut BytesMut,
    bits: u8,
    bit_count: u8,
}

impl<'a> Encoder<'a> {
    /// Creates an encoder appending to `buf`
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self {
            buf,
            bits: 0,
            bit_count: 0,
        }
    }

    fn flush_bits(&mut self) {
        if self.bit_count > 0 {
            self.buf.put_u8(self.bits);
            self.bits = 0;
            self.bit_count = 0;
        }
    }

    /// Appends a bit, packing up to eight consecutive bits per octet
    pub fn put_bit(&mut self, value: bool) {
        if self.bit_count == 8 {
            self.flush_bits();
        }
        if value {
            self.bits |= 1 << self.bit_count;
        }
        self.bit_count += 1;
    }

    /// Appends an octet
    pub fn put_octet(&mut self, value: u8) {
        self.flush_bits();
        self.buf.put_u8(value);
    }

    /// Appends a short (u16 BE)
    pub fn put_short(&mut self, value: u16) {
        self.flush_bits();
        self.buf.put_u16(value);
    }

    /// Appends a long (u32 BE)
    pub fn put_long(&mut self, value: u32) {
        self.flush_bits();
        self.buf.put_u32(value);
    }

    /// Appends a long-long (u64 BE)
    pub fn put_longlong(&mut self, value: u64) {
        self.flush_bits();
        self.buf.put_u64(value);
    }

    /// Appends a timestamp (u64 BE, POSIX seconds)
    pub fn put_timestamp(&mut self, value: u64) {
        self.put_longlong(value);
    }

    /// Appends a short string (u8 length prefix, at most 255 bytes)
    pub fn put_shortstr(&mut self, value: &str) -> Result<(), CodecError> {
        let len = u8::try_from(value.len()).map_err(|_| CodecError::Overflow)?;
        self.flush_bits();
        self.buf.put_u8(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Appends a long string (u32 length prefix)
    pub fn put_longstr(&mut self, value: &[u8]) -> Result<(), CodecError> {
        let len = u32::try_from(value.len()).map_err(|_| CodecError::Overflow)?;
        self.flush_bits();
        self.buf.put_u32(len);
        self.buf.put_slice(value);
        Ok(())
    }

    /// Appends a field table (u32 byte-length prefix, then entries)
    pub fn put_table(&mut self, table: &FieldTable) -> Result<(), CodecError> {
        self.flush_bits();
        crate::value::encode_table(self.buf, table)
    }

    /// Appends a single field value (tag octet then payload)
    pub fn put_field_value(&mut self, value: &FieldValue) -> Result<(), CodecError> {
        self.flush_bits();
        crate::value::encode_field_value(self.buf, value)
    }

    /// Flushes any pending bits. Must be called once all fields are written.
    pub fn finish(mut self) {
        self.flush_bits();
    }
}

/// Sequential decoder mirroring [`Encoder`], including bit unpacking.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a mut Bytes,
    bits: u8,
    // 8 means no partially consumed bit octet is pending
    bit_index: u8,
}

impl<'a> Decoder<'a> {
    /// Creates a decoder consuming from the front of `buf`
    pub fn new(buf: &'a mut Bytes) -> Self {
        Self {
            buf,
            bits: 0,
            bit_index: 8,
        }
    }

    fn check(&self, needed: usize) -> Result<(), CodecError> {
        if self.buf.remaining() < needed {
            return Err(CodecError::UnderRun);
        }
        Ok(())
    }

    fn reset_bits(&mut self) {
        self.bit_index = 8;
    }

    /// Reads a bit, consuming packed octets as needed
    pub fn get_bit(&mut self) -> Result<bool, CodecError> {
        if self.bit_index == 8 {
            self.check(1)?;
            self.bits = self.buf.get_u8();
            self.bit_index = 0;
        }
        let value = self.bits & (1 << self.bit_index) != 0;
        self.bit_index += 1;
        Ok(value)
    }

    /// Reads an octet
    pub fn get_octet(&mut self) -> Result<u8, CodecError> {
        self.reset_bits();
        self.check(1)?;
        Ok(self.buf.get_u8())
    }

    /// Reads a short (u16 BE)
    pub fn get_short(&mut self) -> Result<u16, CodecError> {
        self.reset_bits();
        self.check(2)?;
        Ok(self.buf.get_u16())
    }

    /// Reads a long (u32 BE)
    pub fn get_long(&mut self) -> Result<u32, CodecError> {
        self.reset_bits();
        self.check(4)?;
        Ok(self.buf.get_u32())
    }

    /// Reads a long-long (u64 BE)
    pub fn get_longlong(&mut self) -> Result<u64, CodecError> {
        self.reset_bits();
        self.check(8)?;
        Ok(self.buf.get_u64())
    }

    /// Reads a timestamp (u64 BE)
    pub fn get_timestamp(&mut self) -> Result<u64, CodecError> {
        self.get_longlong()
    }

    /// Reads a short string
    pub fn get_shortstr(&mut self) -> Result<String, CodecError> {
        self.reset_bits();
        self.check(1)?;
        let len = self.buf.get_u8() as usize;
        self.check(len)?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a long string as raw bytes
    pub fn get_longstr(&mut self) -> Result<Bytes, CodecError> {
        self.reset_bits();
        self.check(4)?;
        let len = self.buf.get_u32() as usize;
        self.check(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Reads a field table
    pub fn get_table(&mut self) -> Result<FieldTable, CodecError> {
        self.reset_bits();
        crate::value::decode_table(self.buf)
    }

    /// Reads a single field value (tag octet then payload)
    pub fn get_field_value(&mut self) -> Result<FieldValue, CodecError> {
        self.reset_bits();
        crate::value::decode_field_value(self.buf)
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }
}
