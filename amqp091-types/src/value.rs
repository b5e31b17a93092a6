//! Field values and field tables
//!
//! Field tables are the protocol's self-describing map type, used for
//! server/client properties, queue and exchange arguments, and consume
//! arguments. Unlike method fields, every table entry carries a one-octet
//! type tag.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use indexmap::IndexMap;

use crate::codec::CodecError;

/// A typed value inside a [`FieldTable`] or field array.
///
/// One variant per type tag: `t b B U u I i L l f d D s S A T F V`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// `t`: boolean
    Boolean(bool),
    /// `b`: short-short-int
    ShortShortInt(i8),
    /// `B`: short-short-uint
    ShortShortUint(u8),
    /// `U`: short-int
    ShortInt(i16),
    /// `u`: short-uint
    ShortUint(u16),
    /// `I`: long-int
    LongInt(i32),
    /// `i`: long-uint
    LongUint(u32),
    /// `L`: long-long-int
    LongLongInt(i64),
    /// `l`: long-long-uint
    LongLongUint(u64),
    /// `f`: float
    Float(f32),
    /// `d`: double
    Double(f64),
    /// `D`: decimal, a scale octet and a long-uint mantissa
    Decimal {
        /// Number of decimal digits after the point
        scale: u8,
        /// Unscaled value
        mantissa: u32,
    },
    /// `s`: short string
    ShortString(String),
    /// `S`: long string
    LongString(Bytes),
    /// `A`: field array
    Array(Vec<FieldValue>),
    /// `T`: timestamp, POSIX seconds
    Timestamp(u64),
    /// `F`: nested field table
    Table(FieldTable),
    /// `V`: no value
    Void,
}

impl FieldValue {
    /// The one-octet type tag identifying this variant on the wire
    pub fn type_tag(&self) -> u8 {
        match self {
            FieldValue::Boolean(_) => b't',
            FieldValue::ShortShortInt(_) => b'b',
            FieldValue::ShortShortUint(_) => b'B',
            FieldValue::ShortInt(_) => b'U',
            FieldValue::ShortUint(_) => b'u',
            FieldValue::LongInt(_) => b'I',
            FieldValue::LongUint(_) => b'i',
            FieldValue::LongLongInt(_) => b'L',
            FieldValue::LongLongUint(_) => b'l',
            FieldValue::Float(_) => b'f',
            FieldValue::Double(_) => b'd',
            FieldValue::Decimal { .. } => b'D',
            FieldValue::ShortString(_) => b's',
            FieldValue::LongString(_) => b'S',
            FieldValue::Array(_) => b'A',
            FieldValue::Timestamp(_) => b'T',
            FieldValue::Table(_) => b'F',
            FieldValue::Void => b'V',
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        Self::LongInt(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::LongString(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::LongString(Bytes::from(value.into_bytes()))
    }
}

impl From<FieldTable> for FieldValue {
    fn from(value: FieldTable) -> Self {
        Self::Table(value)
    }
}

/// An insertion-ordered map of short-string keys to typed values
pub type FieldTable = IndexMap<String, FieldValue>;

fn put_shortstr(buf: &mut BytesMut, value: &str) -> Result<(), CodecError> {
    let len = u8::try_from(value.len()).map_err(|_| CodecError::Overflow)?;
    buf.put_u8(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub(crate) fn encode_field_value(
    buf: &mut BytesMut,
    value: &FieldValue,
) -> Result<(), CodecError> {
    buf.put_u8(value.type_tag());
    match value {
        FieldValue::Boolean(v) => buf.put_u8(u8::from(*v)),
        FieldValue::ShortShortInt(v) => buf.put_i8(*v),
        FieldValue::ShortShortUint(v) => buf.put_u8(*v),
        FieldValue::ShortInt(v) => buf.put_i16(*v),
        FieldValue::ShortUint(v) => buf.put_u16(*v),
        FieldValue::LongInt(v) => buf.put_i32(*v),
        FieldValue::LongUint(v) => buf.put_u32(*v),
        FieldValue::LongLongInt(v) => buf.put_i64(*v),
        FieldValue::LongLongUint(v) => buf.put_u64(*v),
        FieldValue::Float(v) => buf.put_f32(*v),
        FieldValue::Double(v) => buf.put_f64(*v),
        FieldValue::Decimal { scale, mantissa } => {
            buf.put_u8(*scale);
            buf.put_u32(*mantissa);
        }
        FieldValue::ShortString(v) => put_shortstr(buf, v)?,
        FieldValue::LongString(v) => {
            let len = u32::try_from(v.len()).map_err(|_| CodecError::Overflow)?;
            buf.put_u32(len);
            buf.put_slice(v);
        }
        FieldValue::Array(values) => {
            let mut inner = BytesMut::new();
            for value in values {
                encode_field_value(&mut inner, value)?;
            }
            let len = u32::try_from(inner.len()).map_err(|_| CodecError::Overflow)?;
            buf.put_u32(len);
            buf.put_slice(&inner);
        }
        FieldValue::Timestamp(v) => buf.put_u64(*v),
        FieldValue::Table(table) => encode_table(buf, table)?,
        FieldValue::Void => {}
    }
    Ok(())
}

pub(crate) fn encode_table(buf: &mut BytesMut, table: &FieldTable) -> Result<(), CodecError> {
    let mut inner = BytesMut::new();
    for (name, value) in table {
        put_shortstr(&mut inner, name)?;
        encode_field_value(&mut inner, value)?;
    }
    let len = u32::try_from(inner.len()).map_err(|_| CodecError::Overflow)?;
    buf.put_u32(len);
    buf.put_slice(&inner);
    Ok(())
}

fn check(buf: &Bytes, needed: usize) -> Result<(), CodecError> {
    if buf.remaining() < needed {
        return Err(CodecError::UnderRun);
    }
    Ok(())
}

fn get_shortstr(buf: &mut Bytes) -> Result<String, CodecError> {
    check(buf, 1)?;
    let len = buf.get_u8() as usize;
    check(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

pub(crate) fn decode_field_value(buf: &mut Bytes) -> Result<FieldValue, CodecError> {
    check(buf, 1)?;
    let tag = buf.get_u8();
    let value = match tag {
        b't' => {
            check(buf, 1)?;
            FieldValue::Boolean(buf.get_u8() != 0)
        }
        b'b' => {
            check(buf, 1)?;
            FieldValue::ShortShortInt(buf.get_i8())
        }
        b'B' => {
            check(buf, 1)?;
            FieldValue::ShortShortUint(buf.get_u8())
        }
        b'U' => {
            check(buf, 2)?;
            FieldValue::ShortInt(buf.get_i16())
        }
        b'u' => {
            check(buf, 2)?;
            FieldValue::ShortUint(buf.get_u16())
        }
        b'I' => {
            check(buf, 4)?;
            FieldValue::LongInt(buf.get_i32())
        }
        b'i' => {
            check(buf, 4)?;
            FieldValue::LongUint(buf.get_u32())
        }
        b'L' => {
            check(buf, 8)?;
            FieldValue::LongLongInt(buf.get_i64())
        }
        b'l' => {
            check(buf, 8)?;
            FieldValue::LongLongUint(buf.get_u64())
        }
        b'f' => {
            check(buf, 4)?;
            FieldValue::Float(buf.get_f32())
        }
        b'd' => {
            check(buf, 8)?;
            FieldValue::Double(buf.get_f64())
        }
        b'D' => {
            check(buf, 5)?;
            FieldValue::Decimal {
                scale: buf.get_u8(),
                mantissa: buf.get_u32(),
            }
        }
        b's' => FieldValue::ShortString(get_shortstr(buf)?),
        b'S' => {
            check(buf, 4)?;
            let len = buf.get_u32() as usize;
            check(buf, len)?;
            FieldValue::LongString(buf.split_to(len))
        }
        b'A' => {
            check(buf, 4)?;
            let len = buf.get_u32() as usize;
            check(buf, len)?;
            let mut inner = buf.split_to(len);
            let mut values = Vec::new();
            while inner.has_remaining() {
                let value = decode_field_value(&mut inner).map_err(|err| match err {
                    CodecError::UnderRun => CodecError::LengthMismatch,
                    other => other,
                })?;
                values.push(value);
            }
            FieldValue::Array(values)
        }
        b'T' => {
            check(buf, 8)?;
            FieldValue::Timestamp(buf.get_u64())
        }
        b'F' => FieldValue::Table(decode_table(buf)?),
        b'V' => FieldValue::Void,
        other => return Err(CodecError::InvalidTypeTag(other)),
    };
    Ok(value)
}

pub(crate) fn decode_table(buf: &mut Bytes) -> Result<FieldTable, CodecError> {
    check(buf, 4)?;
    let len = buf.get_u32() as usize;
    check(buf, len)?;
    let mut inner = buf.split_to(len);
    let mut table = FieldTable::new();
    while inner.has_remaining() {
        let entry = (|| {
            let name = get_shortstr(&mut inner)?;
            let value = decode_field_value(&mut inner)?;
            Ok::<_, CodecError>((name, value))
        })()
        .map_err(|err| match err {
            CodecError::UnderRun => CodecError::LengthMismatch,
            other => other,
        })?;
        table.insert(entry.0, entry.1);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_round_trip(table: &FieldTable) -> FieldTable {
        let mut buf = BytesMut::new();
        encode_table(&mut buf, table).unwrap();
        let mut bytes = buf.freeze();
        let decoded = decode_table(&mut bytes).unwrap();
        assert!(!bytes.has_remaining());
        decoded
    }

    #[test]
    fn empty_table_is_four_bytes() {
        let mut buf = BytesMut::new();
        encode_table(&mut buf, &FieldTable::new()).unwrap();
        assert_eq!(&buf[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn table_with_every_scalar_round_trips() {
        let mut table = FieldTable::new();
        table.insert("bool".into(), FieldValue::Boolean(true));
        table.insert("i8".into(), FieldValue::ShortShortInt(-8));
        table.insert("u8".into(), FieldValue::ShortShortUint(8));
        table.insert("i16".into(), FieldValue::ShortInt(-16));
        table.insert("u16".into(), FieldValue::ShortUint(16));
        table.insert("i32".into(), FieldValue::LongInt(-32));
        table.insert("u32".into(), FieldValue::LongUint(32));
        table.insert("i64".into(), FieldValue::LongLongInt(-64));
        table.insert("u64".into(), FieldValue::LongLongUint(64));
        table.insert("f32".into(), FieldValue::Float(1.5));
        table.insert("f64".into(), FieldValue::Double(-2.25));
        table.insert(
            "decimal".into(),
            FieldValue::Decimal {
                scale: 2,
                mantissa: 12345,
            },
        );
        table.insert("sstr".into(), FieldValue::ShortString("hi".into()));
        table.insert("lstr".into(), FieldValue::from("hello world"));
        table.insert("ts".into(), FieldValue::Timestamp(1_700_000_000));
        table.insert("void".into(), FieldValue::Void);

        assert_eq!(table_round_trip(&table), table);
    }

    #[test]
    fn nested_table_and_array_round_trip() {
        let mut inner = FieldTable::new();
        inner.insert("x-max-length".into(), FieldValue::LongInt(1000));

        let mut table = FieldTable::new();
        table.insert("nested".into(), FieldValue::Table(inner));
        table.insert(
            "array".into(),
            FieldValue::Array(vec![
                FieldValue::LongInt(1),
                FieldValue::from("two"),
                FieldValue::Array(vec![FieldValue::Boolean(false)]),
            ]),
        );

        assert_eq!(table_round_trip(&table), table);
    }

    #[test]
    fn table_preserves_insertion_order() {
        let mut table = FieldTable::new();
        for key in ["z", "a", "m"] {
            table.insert(key.into(), FieldValue::Boolean(true));
        }
        let decoded = table_round_trip(&table);
        let keys: Vec<&str> = decoded.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn truncated_entry_is_a_length_mismatch() {
        let mut buf = BytesMut::new();
        // table claims 3 bytes: a name of length 2 but only one byte follows
        buf.put_u32(3);
        buf.put_u8(2);
        buf.put_slice(b"ab");
        // the value tag is missing
        let mut bytes = buf.freeze();
        assert_eq!(decode_table(&mut bytes), Err(CodecError::LengthMismatch));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u32(4);
        buf.put_u8(1);
        buf.put_slice(b"k");
        buf.put_u8(b'Z');
        let mut bytes = buf.freeze();
        assert_eq!(
            decode_table(&mut bytes),
            Err(CodecError::InvalidTypeTag(b'Z'))
        );
    }
}
