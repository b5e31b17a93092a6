//! AMQP 0-9-1 frame type and corresponding encoder and decoder
//!
//! Wire format per frame: `type:u8 | channel:u16 | length:u32 | payload |
//! 0xCE`. Four frame kinds exist: method, content header, content body and
//! heartbeat. Heartbeat frames always travel on channel 0 with an empty
//! payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use amqp091_types::definitions::{
    FRAME_BODY, FRAME_END, FRAME_HEADER, FRAME_HEADER_SIZE, FRAME_HEARTBEAT, FRAME_METHOD,
    FRAME_OVERHEAD,
};
use amqp091_types::{ContentHeader, Method};

mod error;
pub use error::Error;

/// A single frame on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel the frame belongs to; 0 is the connection itself
    pub channel: u16,

    /// The typed payload
    pub payload: FramePayload,
}

/// The payload of a [`Frame`], one variant per frame type octet
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// A method frame
    Method(Method),

    /// A content header frame
    Header(ContentHeader),

    /// A chunk of content body
    Body(Bytes),

    /// An empty heartbeat frame
    Heartbeat,
}

impl Frame {
    /// Creates a method frame
    pub fn method(channel: u16, method: Method) -> Self {
        Self {
            channel,
            payload: FramePayload::Method(method),
        }
    }

    /// Creates a content header frame
    pub fn header(channel: u16, header: ContentHeader) -> Self {
        Self {
            channel,
            payload: FramePayload::Header(header),
        }
    }

    /// Creates a content body frame
    pub fn body(channel: u16, body: Bytes) -> Self {
        Self {
            channel,
            payload: FramePayload::Body(body),
        }
    }

    /// Creates a heartbeat frame. Heartbeats always use channel 0.
    pub fn heartbeat() -> Self {
        Self {
            channel: 0,
            payload: FramePayload::Heartbeat,
        }
    }
}

/// Encoder and decoder of AMQP 0-9-1 frames.
///
/// Both directions enforce the negotiated frame-max; an oversized frame in
/// either direction is fatal to the connection.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_size: usize,
    frames_decoded: u64,
}

impl FrameCodec {
    /// Creates a codec enforcing `max_frame_size` (including the 8 bytes of
    /// frame overhead)
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            frames_decoded: 0,
        }
    }

    /// Updates the enforced frame-max after tuning
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) {
        self.max_frame_size = max_frame_size;
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let type_byte = match &item.payload {
            FramePayload::Method(_) => FRAME_METHOD,
            FramePayload::Header(_) => FRAME_HEADER,
            FramePayload::Body(_) => FRAME_BODY,
            FramePayload::Heartbeat => FRAME_HEARTBEAT,
        };

        let mut payload = BytesMut::new();
        match item.payload {
            FramePayload::Method(method) => method.encode(&mut payload)?,
            FramePayload::Header(header) => header.encode(&mut payload)?,
            FramePayload::Body(body) => payload.extend_from_slice(&body),
            FramePayload::Heartbeat => {}
        }

        let size = payload.len() + FRAME_OVERHEAD;
        if size > self.max_frame_size {
            return Err(Error::Oversized {
                size,
                max: self.max_frame_size,
            });
        }

        dst.reserve(size);
        dst.put_u8(type_byte);
        dst.put_u16(item.channel);
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        dst.put_u8(FRAME_END);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Version mismatch: before any frame arrives, the server may answer
        // our prelude with its own 8-byte protocol header and hang up.
        if self.frames_decoded == 0 && src.first() == Some(&b'A') {
            if src.len() < 8 {
                return Ok(None);
            }
            let mut header = [0u8; 8];
            header.copy_from_slice(&src[..8]);
            src.advance(8);
            return Err(Error::ProtocolHeaderReceived(header));
        }

        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[3], src[4], src[5], src[6]]) as usize;
        let size = length + FRAME_OVERHEAD;
        if size > self.max_frame_size {
            return Err(Error::Oversized {
                size,
                max: self.max_frame_size,
            });
        }
        if src.len() < size {
            src.reserve(size - src.len());
            return Ok(None);
        }

        let type_byte = src.get_u8();
        let channel = src.get_u16();
        let _length = src.get_u32();
        let mut payload = src.split_to(length).freeze();
        let terminator = src.get_u8();
        if terminator != FRAME_END {
            return Err(Error::BadTerminator { found: terminator });
        }

        let payload = match type_byte {
            FRAME_METHOD => FramePayload::Method(Method::decode(&mut payload)?),
            FRAME_HEADER => FramePayload::Header(ContentHeader::decode(&mut payload)?),
            FRAME_BODY => FramePayload::Body(payload),
            FRAME_HEARTBEAT => FramePayload::Heartbeat,
            other => return Err(Error::UnknownFrameType(other)),
        };

        self.frames_decoded += 1;
        Ok(Some(Frame { channel, payload }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => Err(Error::Truncated),
        }
    }
}

#[cfg(test)]
mod tests {
    use amqp091_types::methods::{channel, connection};
    use amqp091_types::BasicProperties;

    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new(131_072)
    }

    fn encode(frame: Frame) -> BytesMut {
        let mut buf = BytesMut::new();
        codec().encode(frame, &mut buf).unwrap();
        buf
    }

    #[test]
    fn heartbeat_frame_is_eight_bytes() {
        let buf = encode(Frame::heartbeat());
        assert_eq!(&buf[..], &[8, 0, 0, 0, 0, 0, 0, 0xCE]);
    }

    #[test]
    fn method_frame_round_trips() {
        let frame = Frame::method(
            5,
            Method::ChannelClose(channel::Close {
                reply_code: 404,
                reply_text: "NOT_FOUND".into(),
                class_id: 50,
                method_id: 20,
            }),
        );
        let mut buf = encode(frame.clone());
        assert_eq!(buf[buf.len() - 1], FRAME_END);
        let decoded = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert!(buf.is_empty());
    }

    #[test]
    fn header_and_body_frames_round_trip() {
        let header = Frame::header(
            1,
            ContentHeader {
                class_id: 60,
                body_size: 5,
                properties: BasicProperties {
                    delivery_mode: Some(2),
                    ..Default::default()
                },
            },
        );
        let body = Frame::body(1, Bytes::from_static(b"hello"));

        let mut buf = encode(header.clone());
        buf.extend_from_slice(&encode(body.clone()));

        let mut codec = codec();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), header);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), body);
        assert!(buf.is_empty());
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let frame = Frame::method(
            0,
            Method::ConnectionOpen(connection::Open {
                virtual_host: "/".into(),
                reserved_1: String::new(),
                reserved_2: false,
            }),
        );
        let full = encode(frame.clone());
        let mut partial = BytesMut::from(&full[..5]);
        let mut codec = codec();
        assert!(codec.decode(&mut partial).unwrap().is_none());
        partial.extend_from_slice(&full[5..]);
        assert_eq!(codec.decode(&mut partial).unwrap().unwrap(), frame);
    }

    #[test]
    fn bad_terminator_is_fatal() {
        let mut buf = encode(Frame::heartbeat());
        let last = buf.len() - 1;
        buf[last] = 0x00;
        assert!(matches!(
            codec().decode(&mut buf),
            Err(Error::BadTerminator { found: 0x00 })
        ));
    }

    #[test]
    fn truncated_stream_is_reported_at_eof() {
        let full = encode(Frame::heartbeat());
        let mut partial = BytesMut::from(&full[..4]);
        assert!(matches!(
            codec().decode_eof(&mut partial),
            Err(Error::Truncated)
        ));
    }

    #[test]
    fn oversized_frame_is_rejected_in_both_directions() {
        let mut small = FrameCodec::new(64);
        let frame = Frame::body(1, Bytes::from(vec![0u8; 100]));
        let mut buf = BytesMut::new();
        assert!(matches!(
            small.encode(frame.clone(), &mut buf),
            Err(Error::Oversized { .. })
        ));

        let mut wire = encode(frame);
        assert!(matches!(
            FrameCodec::new(64).decode(&mut wire),
            Err(Error::Oversized { .. })
        ));
    }

    #[test]
    fn server_protocol_header_reply_is_surfaced() {
        let mut buf = BytesMut::from(&b"AMQP\x00\x00\x00\x09"[..]);
        match codec().decode(&mut buf) {
            Err(Error::ProtocolHeaderReceived(header)) => {
                assert_eq!(&header, b"AMQP\x00\x00\x00\x09");
            }
            other => panic!("expected protocol header error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        let mut buf = BytesMut::from(&[9u8, 0, 0, 0, 0, 0, 0, FRAME_END][..]);
        assert!(matches!(
            codec().decode(&mut buf),
            Err(Error::UnknownFrameType(9))
        ));
    }
}
