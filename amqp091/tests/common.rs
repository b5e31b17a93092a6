//! A scripted in-process broker for end-to-end tests.
//!
//! The broker side of a `tokio::io::duplex` pair, framed with the same
//! codec the client uses. Tests drive it step by step so every exchange is
//! deterministic.

use amqp091::frames::{Frame, FrameCodec, FramePayload};
use amqp091_types::definitions::{MAJOR, MINOR};
use amqp091_types::methods::{basic, channel, connection};
use amqp091_types::{BasicProperties, ContentHeader, FieldTable, FieldValue, Method};
use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio_util::codec::Framed;

pub const FRAME_MAX: u32 = 131_072;

pub struct MockBroker {
    framed: Framed<DuplexStream, FrameCodec>,
}

impl MockBroker {
    /// Reads and checks the client prelude, then switches to frames
    pub async fn accept(mut io: DuplexStream) -> Self {
        let mut prelude = [0u8; 8];
        io.read_exact(&mut prelude).await.unwrap();
        assert_eq!(&prelude, b"AMQP\x00\x00\x09\x01");
        Self {
            framed: Framed::new(io, FrameCodec::new(FRAME_MAX as usize)),
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.unwrap();
    }

    pub async fn send_method(&mut self, channel: u16, method: Method) {
        self.send(Frame::method(channel, method)).await;
    }

    pub async fn recv_frame(&mut self) -> Frame {
        loop {
            let frame = self.framed.next().await.unwrap().unwrap();
            if matches!(frame.payload, FramePayload::Heartbeat) {
                continue;
            }
            return frame;
        }
    }

    pub async fn recv_method(&mut self) -> (u16, Method) {
        let frame = self.recv_frame().await;
        match frame.payload {
            FramePayload::Method(method) => (frame.channel, method),
            other => panic!("expected a method frame, got {other:?}"),
        }
    }

    /// Reads a content header and its body frames up to the declared size
    pub async fn recv_content(&mut self) -> (u16, ContentHeader, Bytes) {
        let frame = self.recv_frame().await;
        let (channel, header) = match frame.payload {
            FramePayload::Header(header) => (frame.channel, header),
            other => panic!("expected a content header, got {other:?}"),
        };
        let mut body = BytesMut::new();
        while (body.len() as u64) < header.body_size {
            let frame = self.recv_frame().await;
            match frame.payload {
                FramePayload::Body(chunk) => {
                    assert_eq!(frame.channel, channel);
                    body.extend_from_slice(&chunk);
                }
                other => panic!("expected a body frame, got {other:?}"),
            }
        }
        (channel, header, body.freeze())
    }

    /// Runs the server side of the handshake with heartbeats disabled
    pub async fn handshake(&mut self) {
        self.handshake_with_heartbeat(0).await;
    }

    pub async fn handshake_with_heartbeat(&mut self, heartbeat: u16) {
        let mut server_properties = FieldTable::new();
        server_properties.insert("product".into(), FieldValue::from("MockBroker"));
        self.send_method(
            0,
            Method::ConnectionStart(connection::Start {
                version_major: MAJOR,
                version_minor: MINOR,
                server_properties,
                mechanisms: Bytes::from_static(b"PLAIN AMQPLAIN"),
                locales: Bytes::from_static(b"en_US"),
            }),
        )
        .await;

        let (_, method) = self.recv_method().await;
        match method {
            Method::ConnectionStartOk(start_ok) => {
                assert_eq!(start_ok.mechanism, "PLAIN");
                assert_eq!(start_ok.locale, "en_US");
            }
            other => panic!("expected Connection.StartOk, got {other:?}"),
        }

        self.send_method(
            0,
            Method::ConnectionTune(connection::Tune {
                channel_max: 2047,
                frame_max: FRAME_MAX,
                heartbeat,
            }),
        )
        .await;

        let (_, method) = self.recv_method().await;
        match method {
            Method::ConnectionTuneOk(tune_ok) => {
                assert_eq!(tune_ok.frame_max, FRAME_MAX);
                assert_eq!(tune_ok.heartbeat, heartbeat.min(60));
            }
            other => panic!("expected Connection.TuneOk, got {other:?}"),
        }

        let (_, method) = self.recv_method().await;
        match method {
            Method::ConnectionOpen(open) => assert_eq!(open.virtual_host, "/"),
            other => panic!("expected Connection.Open, got {other:?}"),
        }
        self.send_method(
            0,
            Method::ConnectionOpenOk(connection::OpenOk {
                reserved_1: String::new(),
            }),
        )
        .await;
    }

    /// Expects a `Channel.Open`, confirms it, and returns the channel id
    pub async fn expect_channel_open(&mut self) -> u16 {
        let (channel_id, method) = self.recv_method().await;
        match method {
            Method::ChannelOpen(_) => {}
            other => panic!("expected Channel.Open, got {other:?}"),
        }
        self.send_method(
            channel_id,
            Method::ChannelOpenOk(channel::OpenOk {
                reserved_1: Bytes::new(),
            }),
        )
        .await;
        channel_id
    }

    /// Sends a complete `Basic.Deliver` with a small body
    pub async fn deliver(
        &mut self,
        channel_id: u16,
        consumer_tag: &str,
        delivery_tag: u64,
        body: &[u8],
    ) {
        self.send_method(
            channel_id,
            Method::BasicDeliver(basic::Deliver {
                consumer_tag: consumer_tag.into(),
                delivery_tag,
                redelivered: false,
                exchange: String::new(),
                routing_key: "q".into(),
            }),
        )
        .await;
        self.send(Frame::header(
            channel_id,
            ContentHeader {
                class_id: 60,
                body_size: body.len() as u64,
                properties: BasicProperties::default(),
            },
        ))
        .await;
        if !body.is_empty() {
            self.send(Frame::body(channel_id, Bytes::copy_from_slice(body)))
                .await;
        }
    }

    /// Plays along with a graceful client close: answers channel closes,
    /// then the connection close
    pub async fn expect_close(&mut self) {
        loop {
            let (channel_id, method) = self.recv_method().await;
            match method {
                Method::ChannelClose(_) => {
                    self.send_method(channel_id, Method::ChannelCloseOk(channel::CloseOk))
                        .await;
                }
                Method::ConnectionClose(_) => {
                    self.send_method(0, Method::ConnectionCloseOk(connection::CloseOk))
                        .await;
                    break;
                }
                // late acks, cancels and similar are fine to skip here
                _ => {}
            }
        }
    }
}
