//! Content headers and basic properties
//!
//! A published or delivered message is `method + header + N body frames`.
//! The header frame carries the total body size and a set of optional
//! properties tracked by a property-flags bitmask (bit 15 downward, one bit
//! per property in declaration order).

use bytes::{Bytes, BytesMut};

use crate::codec::{CodecError, Decoder, Encoder};
use crate::value::FieldTable;

/// Optional content properties of the basic class.
///
/// Any subset may be present; absent properties are simply not encoded and
/// their flag bit stays clear.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BasicProperties {
    /// MIME content type
    pub content_type: Option<String>,

    /// MIME content encoding
    pub content_encoding: Option<String>,

    /// Application message headers
    pub headers: Option<FieldTable>,

    /// 1 for transient, 2 for persistent
    pub delivery_mode: Option<u8>,

    /// Message priority, 0 to 9
    pub priority: Option<u8>,

    /// Application correlation identifier
    pub correlation_id: Option<String>,

    /// Address to reply to
    pub reply_to: Option<String>,

    /// Message expiration, in milliseconds as a string
    pub expiration: Option<String>,

    /// Application message identifier
    pub message_id: Option<String>,

    /// Message timestamp, POSIX seconds
    pub timestamp: Option<u64>,

    /// Message type name
    pub message_type: Option<String>,

    /// Creating user id, validated by the broker
    pub user_id: Option<String>,

    /// Creating application id
    pub app_id: Option<String>,

    /// Intra-cluster routing identifier, deprecated
    pub cluster_id: Option<String>,
}

const FLAG_CONTENT_TYPE: u16 = 1 << 15;
const FLAG_CONTENT_ENCODING: u16 = 1 << 14;
const FLAG_HEADERS: u16 = 1 << 13;
const FLAG_DELIVERY_MODE: u16 = 1 << 12;
const FLAG_PRIORITY: u16 = 1 << 11;
const FLAG_CORRELATION_ID: u16 = 1 << 10;
const FLAG_REPLY_TO: u16 = 1 << 9;
const FLAG_EXPIRATION: u16 = 1 << 8;
const FLAG_MESSAGE_ID: u16 = 1 << 7;
const FLAG_TIMESTAMP: u16 = 1 << 6;
const FLAG_TYPE: u16 = 1 << 5;
const FLAG_USER_ID: u16 = 1 << 4;
const FLAG_APP_ID: u16 = 1 << 3;
const FLAG_CLUSTER_ID: u16 = 1 << 2;

impl BasicProperties {
    fn flags(&self) -> u16 {
        let mut flags = 0;
        let mut set = |present: bool, flag: u16| {
            if present {
                flags |= flag;
            }
        };
        set(self.content_type.is_some(), FLAG_CONTENT_TYPE);
        set(self.content_encoding.is_some(), FLAG_CONTENT_ENCODING);
        set(self.headers.is_some(), FLAG_HEADERS);
        set(self.delivery_mode.is_some(), FLAG_DELIVERY_MODE);
        set(self.priority.is_some(), FLAG_PRIORITY);
        set(self.correlation_id.is_some(), FLAG_CORRELATION_ID);
        set(self.reply_to.is_some(), FLAG_REPLY_TO);
        set(self.expiration.is_some(), FLAG_EXPIRATION);
        set(self.message_id.is_some(), FLAG_MESSAGE_ID);
        set(self.timestamp.is_some(), FLAG_TIMESTAMP);
        set(self.message_type.is_some(), FLAG_TYPE);
        set(self.user_id.is_some(), FLAG_USER_ID);
        set(self.app_id.is_some(), FLAG_APP_ID);
        set(self.cluster_id.is_some(), FLAG_CLUSTER_ID);
        flags
    }

    /// Encodes the property flags word followed by the present properties
    pub fn encode(&self, encoder: &mut Encoder<'_>) -> Result<(), CodecError> {
        encoder.put_short(self.flags());
        if let Some(value) = &self.content_type {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.content_encoding {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.headers {
            encoder.put_table(value)?;
        }
        if let Some(value) = self.delivery_mode {
            encoder.put_octet(value);
        }
        if let Some(value) = self.priority {
            encoder.put_octet(value);
        }
        if let Some(value) = &self.correlation_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.reply_to {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.expiration {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.message_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = self.timestamp {
            encoder.put_timestamp(value);
        }
        if let Some(value) = &self.message_type {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.user_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.app_id {
            encoder.put_shortstr(value)?;
        }
        if let Some(value) = &self.cluster_id {
            encoder.put_shortstr(value)?;
        }
        Ok(())
    }

    /// Decodes the property flags word and the properties it announces
    pub fn decode(decoder: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let flags = decoder.get_short()?;
        let mut properties = Self::default();
        if flags & FLAG_CONTENT_TYPE != 0 {
            properties.content_type = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_CONTENT_ENCODING != 0 {
            properties.content_encoding = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_HEADERS != 0 {
            properties.headers = Some(decoder.get_table()?);
        }
        if flags & FLAG_DELIVERY_MODE != 0 {
            properties.delivery_mode = Some(decoder.get_octet()?);
        }
        if flags & FLAG_PRIORITY != 0 {
            properties.priority = Some(decoder.get_octet()?);
        }
        if flags & FLAG_CORRELATION_ID != 0 {
            properties.correlation_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_REPLY_TO != 0 {
            properties.reply_to = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_EXPIRATION != 0 {
            properties.expiration = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_MESSAGE_ID != 0 {
            properties.message_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_TIMESTAMP != 0 {
            properties.timestamp = Some(decoder.get_timestamp()?);
        }
        if flags & FLAG_TYPE != 0 {
            properties.message_type = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_USER_ID != 0 {
            properties.user_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_APP_ID != 0 {
            properties.app_id = Some(decoder.get_shortstr()?);
        }
        if flags & FLAG_CLUSTER_ID != 0 {
            properties.cluster_id = Some(decoder.get_shortstr()?);
        }
        Ok(properties)
    }
}

/// The payload of a content header frame
#[derive(Debug, Clone, PartialEq)]
pub struct ContentHeader {
    /// Class id of the method the content belongs to (60 for basic)
    pub class_id: u16,

    /// Total size of the body across all body frames
    pub body_size: u64,

    /// Content properties
    pub properties: BasicProperties,
}

impl ContentHeader {
    /// Encodes `class-id | weight | body-size | properties` into `buf`
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let mut encoder = Encoder::new(buf);
        encoder.put_short(self.class_id);
        // weight is unused and always zero
        encoder.put_short(0);
        encoder.put_longlong(self.body_size);
        self.properties.encode(&mut encoder)?;
        encoder.finish();
        Ok(())
    }

    /// Decodes a content header frame payload
    pub fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let mut decoder = Decoder::new(buf);
        let class_id = decoder.get_short()?;
        let _weight = decoder.get_short()?;
        let body_size = decoder.get_longlong()?;
        let properties = BasicProperties::decode(&mut decoder)?;
        Ok(Self {
            class_id,
            body_size,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Buf;

    use super::*;
    use crate::value::FieldValue;

    fn round_trip(header: &ContentHeader) -> ContentHeader {
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        let decoded = ContentHeader::decode(&mut bytes).unwrap();
        assert!(!bytes.has_remaining());
        decoded
    }

    #[test]
    fn empty_properties_round_trip() {
        let header = ContentHeader {
            class_id: 60,
            body_size: 5,
            properties: BasicProperties::default(),
        };
        assert_eq!(round_trip(&header), header);
    }

    #[test]
    fn full_properties_round_trip() {
        let mut headers = FieldTable::new();
        headers.insert("x-first-death-reason".into(), FieldValue::from("expired"));

        let header = ContentHeader {
            class_id: 60,
            body_size: 1 << 20,
            properties: BasicProperties {
                content_type: Some("application/json".into()),
                content_encoding: Some("gzip".into()),
                headers: Some(headers),
                delivery_mode: Some(2),
                priority: Some(5),
                correlation_id: Some("corr-1".into()),
                reply_to: Some("amq.gen-reply".into()),
                expiration: Some("60000".into()),
                message_id: Some("msg-1".into()),
                timestamp: Some(1_700_000_000),
                message_type: Some("event".into()),
                user_id: Some("guest".into()),
                app_id: Some("app".into()),
                cluster_id: Some("cluster".into()),
            },
        };
        assert_eq!(round_trip(&header), header);
    }

    #[test]
    fn sparse_properties_keep_their_slots() {
        // only bits 12 and 6 are set; decode must not shift fields around
        let header = ContentHeader {
            class_id: 60,
            body_size: 0,
            properties: BasicProperties {
                delivery_mode: Some(1),
                timestamp: Some(42),
                ..Default::default()
            },
        };
        assert_eq!(round_trip(&header), header);
    }
}
