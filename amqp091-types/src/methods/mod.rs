//! The method registry
//!
//! One struct per `(class-id, method-id)` pair, grouped into a module per
//! class, plus the closed [`Method`] sum type that the frame layer encodes
//! and decodes. A method payload on the wire is two big-endian `u16`s
//! (class, method) followed by the positional fields of that method.

use bytes::{Bytes, BytesMut};

use crate::codec::{CodecError, Decoder, Encoder};

pub mod basic;
pub mod channel;
pub mod connection;
pub mod exchange;
pub mod queue;
pub mod tx;

pub use exchange::ExchangeKind;

/// Class id of the connection class
pub const CLASS_CONNECTION: u16 = 10;

/// Class id of the channel class
pub const CLASS_CHANNEL: u16 = 20;

/// Class id of the exchange class
pub const CLASS_EXCHANGE: u16 = 40;

/// Class id of the queue class
pub const CLASS_QUEUE: u16 = 50;

/// Class id of the basic class
pub const CLASS_BASIC: u16 = 60;

/// Class id of the tx class
pub const CLASS_TX: u16 = 90;

/// Error raised while decoding a method payload
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MethodError {
    /// The payload bytes were malformed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The `(class-id, method-id)` pair is not in the registry.
    ///
    /// The receiver must close the connection with reply code 540
    /// (not-implemented).
    #[error("Unknown method: class {class_id}, method {method_id}")]
    Unknown {
        /// Class id read from the payload
        class_id: u16,
        /// Method id read from the payload
        method_id: u16,
    },
}

macro_rules! methods {
    ($(
        $(#[$doc:meta])*
        $variant:ident($ty:ty) = ($class:literal, $method:literal, client: $client:literal),
    )*) => {
        /// Every method payload this implementation knows, tagged by
        /// `(class-id, method-id)`.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Method {
            $(
                $(#[$doc])*
                $variant($ty),
            )*
        }

        impl Method {
            /// The class id of this method
            pub fn class_id(&self) -> u16 {
                match self {
                    $(Self::$variant(_) => $class,)*
                }
            }

            /// The method id of this method, unique within its class
            pub fn method_id(&self) -> u16 {
                match self {
                    $(Self::$variant(_) => $method,)*
                }
            }

            /// Whether the client side of a connection may emit this method
            pub fn is_client_side(&self) -> bool {
                match self {
                    $(Self::$variant(_) => $client,)*
                }
            }

            /// Encodes `class-id | method-id | fields` into `buf`
            pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
                let mut encoder = Encoder::new(buf);
                encoder.put_short(self.class_id());
                encoder.put_short(self.method_id());
                match self {
                    $(Self::$variant(inner) => inner.encode(&mut encoder)?,)*
                }
                encoder.finish();
                Ok(())
            }

            /// Decodes a method frame payload
            pub fn decode(buf: &mut Bytes) -> Result<Self, MethodError> {
                let mut decoder = Decoder::new(buf);
                let class_id = decoder.get_short()?;
                let method_id = decoder.get_short()?;
                let method = match (class_id, method_id) {
                    $(($class, $method) => Self::$variant(<$ty>::decode(&mut decoder)?),)*
                    _ => return Err(MethodError::Unknown { class_id, method_id }),
                };
                Ok(method)
            }
        }
    };
}

methods! {
    /// `connection.start`
    ConnectionStart(connection::Start) = (10, 10, client: false),
    /// `connection.start-ok`
    ConnectionStartOk(connection::StartOk) = (10, 11, client: true),
    /// `connection.secure`
    ConnectionSecure(connection::Secure) = (10, 20, client: false),
    /// `connection.secure-ok`
    ConnectionSecureOk(connection::SecureOk) = (10, 21, client: true),
    /// `connection.tune`
    ConnectionTune(connection::Tune) = (10, 30, client: false),
    /// `connection.tune-ok`
    ConnectionTuneOk(connection::TuneOk) = (10, 31, client: true),
    /// `connection.open`
    ConnectionOpen(connection::Open) = (10, 40, client: true),
    /// `connection.open-ok`
    ConnectionOpenOk(connection::OpenOk) = (10, 41, client: false),
    /// `connection.close`
    ConnectionClose(connection::Close) = (10, 50, client: true),
    /// `connection.close-ok`
    ConnectionCloseOk(connection::CloseOk) = (10, 51, client: true),
    /// `connection.blocked`
    ConnectionBlocked(connection::Blocked) = (10, 60, client: false),
    /// `connection.unblocked`
    ConnectionUnblocked(connection::Unblocked) = (10, 61, client: false),

    /// `channel.open`
    ChannelOpen(channel::Open) = (20, 10, client: true),
    /// `channel.open-ok`
    ChannelOpenOk(channel::OpenOk) = (20, 11, client: false),
    /// `channel.flow`
    ChannelFlow(channel::Flow) = (20, 20, client: true),
    /// `channel.flow-ok`
    ChannelFlowOk(channel::FlowOk) = (20, 21, client: true),
    /// `channel.close`
    ChannelClose(channel::Close) = (20, 40, client: true),
    /// `channel.close-ok`
    ChannelCloseOk(channel::CloseOk) = (20, 41, client: true),

    /// `exchange.declare`
    ExchangeDeclare(exchange::Declare) = (40, 10, client: true),
    /// `exchange.declare-ok`
    ExchangeDeclareOk(exchange::DeclareOk) = (40, 11, client: false),
    /// `exchange.delete`
    ExchangeDelete(exchange::Delete) = (40, 20, client: true),
    /// `exchange.delete-ok`
    ExchangeDeleteOk(exchange::DeleteOk) = (40, 21, client: false),
    /// `exchange.bind`
    ExchangeBind(exchange::Bind) = (40, 30, client: true),
    /// `exchange.bind-ok`
    ExchangeBindOk(exchange::BindOk) = (40, 31, client: false),
    /// `exchange.unbind`
    ExchangeUnbind(exchange::Unbind) = (40, 40, client: true),
    /// `exchange.unbind-ok`
    ExchangeUnbindOk(exchange::UnbindOk) = (40, 51, client: false),

    /// `queue.declare`
    QueueDeclare(queue::Declare) = (50, 10, client: true),
    /// `queue.declare-ok`
    QueueDeclareOk(queue::DeclareOk) = (50, 11, client: false),
    /// `queue.bind`
    QueueBind(queue::Bind) = (50, 20, client: true),
    /// `queue.bind-ok`
    QueueBindOk(queue::BindOk) = (50, 21, client: false),
    /// `queue.purge`
    QueuePurge(queue::Purge) = (50, 30, client: true),
    /// `queue.purge-ok`
    QueuePurgeOk(queue::PurgeOk) = (50, 31, client: false),
    /// `queue.delete`
    QueueDelete(queue::Delete) = (50, 40, client: true),
    /// `queue.delete-ok`
    QueueDeleteOk(queue::DeleteOk) = (50, 41, client: false),
    /// `queue.unbind`
    QueueUnbind(queue::Unbind) = (50, 50, client: true),
    /// `queue.unbind-ok`
    QueueUnbindOk(queue::UnbindOk) = (50, 51, client: false),

    /// `basic.qos`
    BasicQos(basic::Qos) = (60, 10, client: true),
    /// `basic.qos-ok`
    BasicQosOk(basic::QosOk) = (60, 11, client: false),
    /// `basic.consume`
    BasicConsume(basic::Consume) = (60, 20, client: true),
    /// `basic.consume-ok`
    BasicConsumeOk(basic::ConsumeOk) = (60, 21, client: false),
    /// `basic.cancel` (servers send this too, as consumer-cancel-notify)
    BasicCancel(basic::Cancel) = (60, 30, client: true),
    /// `basic.cancel-ok`
    BasicCancelOk(basic::CancelOk) = (60, 31, client: true),
    /// `basic.publish`
    BasicPublish(basic::Publish) = (60, 40, client: true),
    /// `basic.return`
    BasicReturn(basic::Return) = (60, 50, client: false),
    /// `basic.deliver`
    BasicDeliver(basic::Deliver) = (60, 60, client: false),
    /// `basic.get`
    BasicGet(basic::Get) = (60, 70, client: true),
    /// `basic.get-ok`
    BasicGetOk(basic::GetOk) = (60, 71, client: false),
    /// `basic.get-empty`
    BasicGetEmpty(basic::GetEmpty) = (60, 72, client: false),
    /// `basic.ack`
    BasicAck(basic::Ack) = (60, 80, client: true),
    /// `basic.reject`
    BasicReject(basic::Reject) = (60, 90, client: true),
    /// `basic.recover-async`
    BasicRecoverAsync(basic::RecoverAsync) = (60, 100, client: true),
    /// `basic.recover`
    BasicRecover(basic::Recover) = (60, 110, client: true),
    /// `basic.recover-ok`
    BasicRecoverOk(basic::RecoverOk) = (60, 111, client: false),
    /// `basic.nack`
    BasicNack(basic::Nack) = (60, 120, client: true),

    /// `tx.select`
    TxSelect(tx::Select) = (90, 10, client: true),
    /// `tx.select-ok`
    TxSelectOk(tx::SelectOk) = (90, 11, client: false),
    /// `tx.commit`
    TxCommit(tx::Commit) = (90, 20, client: true),
    /// `tx.commit-ok`
    TxCommitOk(tx::CommitOk) = (90, 21, client: false),
    /// `tx.rollback`
    TxRollback(tx::Rollback) = (90, 30, client: true),
    /// `tx.rollback-ok`
    TxRollbackOk(tx::RollbackOk) = (90, 31, client: false),
}

impl Method {
    /// Builds a [`crate::CloseInfo`] from either close method
    pub fn close_info(&self) -> Option<crate::CloseInfo> {
        match self {
            Method::ConnectionClose(close) => Some(crate::CloseInfo {
                reply_code: close.reply_code,
                reply_text: close.reply_text.clone(),
                class_id: close.class_id,
                method_id: close.method_id,
            }),
            Method::ChannelClose(close) => Some(crate::CloseInfo {
                reply_code: close.reply_code,
                reply_text: close.reply_text.clone(),
                class_id: close.class_id,
                method_id: close.method_id,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use super::*;
    use crate::value::{FieldTable, FieldValue};

    fn round_trip(method: Method) {
        let mut buf = BytesMut::new();
        method.encode(&mut buf).unwrap();
        let mut bytes = buf.freeze();
        let decoded = Method::decode(&mut bytes).unwrap();
        assert_eq!(decoded, method);
    }

    #[test]
    fn connection_methods_round_trip() {
        let mut props = FieldTable::new();
        props.insert("product".into(), FieldValue::from("RabbitMQ"));
        round_trip(Method::ConnectionStart(connection::Start {
            version_major: 0,
            version_minor: 9,
            server_properties: props.clone(),
            mechanisms: Bytes::from_static(b"PLAIN AMQPLAIN"),
            locales: Bytes::from_static(b"en_US"),
        }));
        round_trip(Method::ConnectionStartOk(connection::StartOk {
            client_properties: props,
            mechanism: "PLAIN".into(),
            response: Bytes::from_static(b"\0guest\0guest"),
            locale: "en_US".into(),
        }));
        round_trip(Method::ConnectionTune(connection::Tune {
            channel_max: 2047,
            frame_max: 131_072,
            heartbeat: 60,
        }));
        round_trip(Method::ConnectionOpen(connection::Open {
            virtual_host: "/".into(),
            reserved_1: String::new(),
            reserved_2: false,
        }));
        round_trip(Method::ConnectionClose(connection::Close {
            reply_code: 320,
            reply_text: "CONNECTION_FORCED".into(),
            class_id: 0,
            method_id: 0,
        }));
        round_trip(Method::ConnectionCloseOk(connection::CloseOk));
        round_trip(Method::ConnectionBlocked(connection::Blocked {
            reason: "low on memory".into(),
        }));
    }

    #[test]
    fn channel_methods_round_trip() {
        round_trip(Method::ChannelOpen(channel::Open {
            reserved_1: String::new(),
        }));
        round_trip(Method::ChannelFlow(channel::Flow { active: false }));
        round_trip(Method::ChannelClose(channel::Close {
            reply_code: 404,
            reply_text: "NOT_FOUND".into(),
            class_id: 50,
            method_id: 20,
        }));
    }

    #[test]
    fn queue_and_exchange_methods_round_trip() {
        let mut args = FieldTable::new();
        args.insert("x-message-ttl".into(), FieldValue::LongInt(60_000));
        round_trip(Method::QueueDeclare(queue::Declare {
            reserved_1: 0,
            queue: String::new(),
            passive: false,
            durable: true,
            exclusive: true,
            auto_delete: false,
            no_wait: false,
            arguments: args.clone(),
        }));
        round_trip(Method::QueueDeclareOk(queue::DeclareOk {
            queue: "amq.gen-JzTY20BRgKO-HjmUJj0wLg".into(),
            message_count: 12,
            consumer_count: 1,
        }));
        round_trip(Method::QueueBind(queue::Bind {
            reserved_1: 0,
            queue: "q".into(),
            exchange: "logs".into(),
            routing_key: "info.#".into(),
            no_wait: false,
            arguments: FieldTable::new(),
        }));
        round_trip(Method::QueueDelete(queue::Delete {
            reserved_1: 0,
            queue: "q".into(),
            if_unused: true,
            if_empty: false,
            no_wait: false,
        }));
        round_trip(Method::ExchangeDeclare(exchange::Declare {
            reserved_1: 0,
            exchange: "logs".into(),
            kind: ExchangeKind::Topic.as_str().into(),
            passive: false,
            durable: true,
            auto_delete: false,
            internal: false,
            no_wait: false,
            arguments: args,
        }));
    }

    #[test]
    fn basic_methods_round_trip() {
        round_trip(Method::BasicQos(basic::Qos {
            prefetch_size: 0,
            prefetch_count: 30,
            global: false,
        }));
        round_trip(Method::BasicConsume(basic::Consume {
            reserved_1: 0,
            queue: "q".into(),
            consumer_tag: String::new(),
            no_local: false,
            no_ack: true,
            exclusive: false,
            no_wait: false,
            arguments: FieldTable::new(),
        }));
        round_trip(Method::BasicPublish(basic::Publish {
            reserved_1: 0,
            exchange: String::new(),
            routing_key: "q".into(),
            mandatory: true,
            immediate: false,
        }));
        round_trip(Method::BasicDeliver(basic::Deliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 7,
            redelivered: true,
            exchange: "logs".into(),
            routing_key: "info".into(),
        }));
        round_trip(Method::BasicGetOk(basic::GetOk {
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: "q".into(),
            message_count: 0,
        }));
        round_trip(Method::BasicNack(basic::Nack {
            delivery_tag: 3,
            multiple: false,
            requeue: true,
        }));
    }

    #[test]
    fn tx_methods_round_trip() {
        round_trip(Method::TxSelect(tx::Select));
        round_trip(Method::TxCommit(tx::Commit));
        round_trip(Method::TxRollback(tx::Rollback));
    }

    #[test]
    fn unknown_method_is_reported_with_ids() {
        // confirm.select is not in the registry
        let mut buf = BytesMut::new();
        let mut encoder = Encoder::new(&mut buf);
        encoder.put_short(85);
        encoder.put_short(10);
        encoder.finish();
        let mut bytes = buf.freeze();
        assert_eq!(
            Method::decode(&mut bytes),
            Err(MethodError::Unknown {
                class_id: 85,
                method_id: 10
            })
        );
    }

    #[test]
    fn class_and_method_ids_match_the_wire() {
        let method = Method::BasicGetEmpty(basic::GetEmpty {
            reserved_1: String::new(),
        });
        let mut buf = BytesMut::new();
        method.encode(&mut buf).unwrap();
        assert_eq!(&buf[..4], &[0, 60, 0, 72]);
    }

    #[test]
    fn close_info_is_extracted_from_both_close_methods() {
        let method = Method::ChannelClose(channel::Close {
            reply_code: 406,
            reply_text: "PRECONDITION_FAILED".into(),
            class_id: 50,
            method_id: 10,
        });
        let info = method.close_info().unwrap();
        assert_eq!(info.reply_code, 406);
        assert!(info.is_error());
        assert!(Method::BasicGet(basic::Get {
            reserved_1: 0,
            queue: "q".into(),
            no_ack: false,
        })
        .close_info()
        .is_none());
    }
}
