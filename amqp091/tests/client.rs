//! End-to-end scenarios against a scripted in-process broker

mod common;

use std::time::Duration;

use amqp091::channel::Error as ChannelError;
use amqp091::connection::{Connection, Error as ConnectionError, OpenError};
use amqp091::frames::FramePayload;
use amqp091::{BasicConsumeOptions, BasicPublishOptions, BasicProperties, QueueDeclareOptions};
use amqp091_types::methods::{basic, channel, connection, queue, Method};
use amqp091_types::FieldTable;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::MockBroker;

fn client() -> amqp091::Builder {
    Connection::builder().credentials("guest", "guest")
}

#[tokio::test]
async fn prelude_mismatch_surfaces_protocol_error() {
    let (client_io, mut server_io) = tokio::io::duplex(256);
    let server = tokio::spawn(async move {
        let mut prelude = [0u8; 8];
        server_io.read_exact(&mut prelude).await.unwrap();
        assert_eq!(&prelude, b"AMQP\x00\x00\x09\x01");
        // an 0-9-1-less server answers with its own header and hangs up
        server_io.write_all(b"AMQP\x00\x00\x00\x09").await.unwrap();
    });

    let outcome = client().open_with_stream(client_io).await;
    match outcome {
        Err(OpenError::ProtocolMismatch(header)) => {
            assert_eq!(&header, b"AMQP\x00\x00\x00\x09");
        }
        other => panic!("expected a protocol mismatch, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn authentication_failure_is_surfaced() {
    let (client_io, server_io) = tokio::io::duplex(4096);
    let broker = tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        // hand-rolled first half of the handshake so it can be failed
        broker
            .send_method(
                0,
                Method::ConnectionStart(connection::Start {
                    version_major: 0,
                    version_minor: 9,
                    server_properties: FieldTable::new(),
                    mechanisms: bytes::Bytes::from_static(b"PLAIN"),
                    locales: bytes::Bytes::from_static(b"en_US"),
                }),
            )
            .await;
        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::ConnectionStartOk(_)));
        broker
            .send_method(
                0,
                Method::ConnectionClose(connection::Close {
                    reply_code: 403,
                    reply_text: "ACCESS_REFUSED - login refused".into(),
                    class_id: 0,
                    method_id: 0,
                }),
            )
            .await;
        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::ConnectionCloseOk(_)));
    });

    let outcome = client().open_with_stream(client_io).await;
    match outcome {
        Err(OpenError::Authentication(text)) => assert!(text.contains("ACCESS_REFUSED")),
        other => panic!("expected an authentication error, got {other:?}"),
    }
    broker.await.unwrap();
}

#[tokio::test]
async fn declare_publish_get_round_trip() {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let broker = tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        broker.handshake().await;
        let channel_id = broker.expect_channel_open().await;

        let (_, method) = broker.recv_method().await;
        let declare = match method {
            Method::QueueDeclare(declare) => declare,
            other => panic!("expected Queue.Declare, got {other:?}"),
        };
        assert!(declare.queue.is_empty());
        assert!(declare.exclusive);
        broker
            .send_method(
                channel_id,
                Method::QueueDeclareOk(queue::DeclareOk {
                    queue: "amq.gen-JzTY20BRgKO".into(),
                    message_count: 0,
                    consumer_count: 0,
                }),
            )
            .await;

        let (_, method) = broker.recv_method().await;
        match method {
            Method::BasicPublish(publish) => {
                assert_eq!(publish.routing_key, "amq.gen-JzTY20BRgKO");
            }
            other => panic!("expected Basic.Publish, got {other:?}"),
        }
        let (_, header, body) = broker.recv_content().await;
        assert_eq!(header.body_size, 5);
        assert_eq!(&body[..], b"hello");

        let (_, method) = broker.recv_method().await;
        match method {
            Method::BasicGet(get) => assert!(get.no_ack),
            other => panic!("expected Basic.Get, got {other:?}"),
        }
        broker
            .send_method(
                channel_id,
                Method::BasicGetOk(basic::GetOk {
                    delivery_tag: 1,
                    redelivered: false,
                    exchange: String::new(),
                    routing_key: "amq.gen-JzTY20BRgKO".into(),
                    message_count: 0,
                }),
            )
            .await;
        broker
            .send(amqp091::frames::Frame::header(
                channel_id,
                amqp091_types::ContentHeader {
                    class_id: 60,
                    body_size: 5,
                    properties: BasicProperties::default(),
                },
            ))
            .await;
        broker
            .send(amqp091::frames::Frame::body(
                channel_id,
                bytes::Bytes::from_static(b"hello"),
            ))
            .await;

        // the follow-up get finds the queue empty
        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::BasicGet(_)));
        broker
            .send_method(
                channel_id,
                Method::BasicGetEmpty(basic::GetEmpty {
                    reserved_1: String::new(),
                }),
            )
            .await;

        broker.expect_close().await;
    });

    let mut connection = client().open_with_stream(client_io).await.unwrap();
    let channel = connection.open_channel().await.unwrap();

    let declared = channel
        .queue_declare(
            "",
            QueueDeclareOptions {
                exclusive: true,
                ..Default::default()
            },
            FieldTable::new(),
        )
        .await
        .unwrap();
    assert!(declared.queue.starts_with("amq.gen-"));

    channel
        .basic_publish(
            "",
            &declared.queue,
            &b"hello"[..],
            BasicPublishOptions::default(),
            BasicProperties::default(),
        )
        .await
        .unwrap();

    let message = channel
        .basic_get(&declared.queue, true)
        .await
        .unwrap()
        .expect("a message should be waiting");
    assert_eq!(&message.body[..], b"hello");
    assert_eq!(message.delivery_tag, 1);
    assert_eq!(message.message_count, Some(0));

    assert!(channel.basic_get(&declared.queue, true).await.unwrap().is_none());

    connection.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn large_publish_multiplexes_with_declare() {
    const BODY_SIZE: usize = 1 << 20;
    const CHUNK: usize = common::FRAME_MAX as usize - 8;

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let broker = tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        broker.handshake().await;
        let first = broker.expect_channel_open().await;
        let second = broker.expect_channel_open().await;
        assert_ne!(first, second);

        let mut body_bytes = 0usize;
        let mut body_frames = 0usize;
        let mut declared = false;
        while body_bytes < BODY_SIZE || !declared {
            let frame = broker.recv_frame().await;
            match frame.payload {
                FramePayload::Method(Method::BasicPublish(_))
                | FramePayload::Header(_) => {}
                FramePayload::Body(chunk) => {
                    assert_eq!(frame.channel, first);
                    body_bytes += chunk.len();
                    body_frames += 1;
                }
                FramePayload::Method(Method::QueueDeclare(declare)) => {
                    assert_eq!(frame.channel, second);
                    broker
                        .send_method(
                            second,
                            Method::QueueDeclareOk(queue::DeclareOk {
                                queue: declare.queue,
                                message_count: 0,
                                consumer_count: 0,
                            }),
                        )
                        .await;
                    declared = true;
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(body_bytes, BODY_SIZE);
        assert_eq!(body_frames, BODY_SIZE.div_ceil(CHUNK));

        broker.expect_close().await;
    });

    let mut connection = client().open_with_stream(client_io).await.unwrap();
    let publisher = connection.open_channel().await.unwrap();
    let declarer = connection.open_channel().await.unwrap();

    let publish = tokio::spawn(async move {
        publisher
            .basic_publish(
                "",
                "big",
                bytes::Bytes::from(vec![0x42u8; BODY_SIZE]),
                BasicPublishOptions::default(),
                BasicProperties::default(),
            )
            .await
            .unwrap();
    });

    // the declare on the second channel completes while the first
    // channel's megabyte is still being written out
    let declared = declarer
        .queue_declare("jobs", QueueDeclareOptions::default(), FieldTable::new())
        .await
        .unwrap();
    assert_eq!(declared.queue, "jobs");

    publish.await.unwrap();
    connection.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn peer_channel_close_faults_only_that_channel() {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let broker = tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        broker.handshake().await;
        let channel_id = broker.expect_channel_open().await;

        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::QueueBind(_)));
        broker
            .send_method(
                channel_id,
                Method::ChannelClose(channel::Close {
                    reply_code: 404,
                    reply_text: "NOT_FOUND - no queue 'missing'".into(),
                    class_id: 50,
                    method_id: 20,
                }),
            )
            .await;
        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::ChannelCloseOk(_)));

        // the connection survives: a fresh channel works
        let channel_id = broker.expect_channel_open().await;
        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::QueueDeclare(_)));
        broker
            .send_method(
                channel_id,
                Method::QueueDeclareOk(queue::DeclareOk {
                    queue: "jobs".into(),
                    message_count: 3,
                    consumer_count: 0,
                }),
            )
            .await;

        broker.expect_close().await;
    });

    let mut connection = client().open_with_stream(client_io).await.unwrap();
    let channel = connection.open_channel().await.unwrap();

    let outcome = channel
        .queue_bind("missing", "amq.direct", "key", FieldTable::new())
        .await;
    match outcome {
        Err(ChannelError::UnexpectedClose(info)) => {
            assert_eq!(info.reply_code, 404);
            assert_eq!(info.class_id, 50);
            assert_eq!(info.method_id, 20);
            assert!(info.reply_text.contains("NOT_FOUND"));
        }
        other => panic!("expected an unexpected-close error, got {other:?}"),
    }

    // later operations on the dead channel replay the same reason
    match channel.queue_purge("missing").await {
        Err(ChannelError::UnexpectedClose(info)) => assert_eq!(info.reply_code, 404),
        other => panic!("expected the recorded close reason, got {other:?}"),
    }

    let fresh = connection.open_channel().await.unwrap();
    let declared = fresh
        .queue_declare("jobs", QueueDeclareOptions::default(), FieldTable::new())
        .await
        .unwrap();
    assert_eq!(declared.message_count, 3);

    connection.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_faults_pending_operations() {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        broker.handshake_with_heartbeat(1).await;
        let _channel_id = broker.expect_channel_open().await;
        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::QueueDeclare(_)));
        // go silent without closing the socket
        std::future::pending::<()>().await;
    });

    let mut connection = client().open_with_stream(client_io).await.unwrap();
    assert_eq!(connection.limits().heartbeat, 1);
    let channel = connection.open_channel().await.unwrap();

    let outcome = channel
        .queue_declare("jobs", QueueDeclareOptions::default(), FieldTable::new())
        .await;
    assert!(matches!(outcome, Err(ChannelError::HeartbeatTimeout)));

    match connection.on_close().await {
        Err(ConnectionError::HeartbeatTimeout) => {}
        other => panic!("expected a heartbeat timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn consumer_backpressure_pauses_the_server() {
    const DELIVERIES: u64 = 20;

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let broker = tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        broker.handshake().await;
        let consume_channel = broker.expect_channel_open().await;

        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::BasicConsume(_)));
        broker
            .send_method(
                consume_channel,
                Method::BasicConsumeOk(basic::ConsumeOk {
                    consumer_tag: "ctag-1".into(),
                }),
            )
            .await;

        let declare_channel = broker.expect_channel_open().await;

        for delivery_tag in 1..=DELIVERIES {
            broker
                .deliver(consume_channel, "ctag-1", delivery_tag, b"payload")
                .await;
        }

        // the saturated channel pauses the server while the other channel
        // keeps answering synchronous requests
        let mut flow_stopped = false;
        let mut declared = false;
        while !(flow_stopped && declared) {
            let (channel_id, method) = broker.recv_method().await;
            match method {
                Method::ChannelFlow(flow) => {
                    assert_eq!(channel_id, consume_channel);
                    assert!(!flow.active);
                    flow_stopped = true;
                    broker
                        .send_method(
                            channel_id,
                            Method::ChannelFlowOk(channel::FlowOk { active: false }),
                        )
                        .await;
                }
                Method::QueueDeclare(_) => {
                    assert_eq!(channel_id, declare_channel);
                    declared = true;
                    broker
                        .send_method(
                            declare_channel,
                            Method::QueueDeclareOk(queue::DeclareOk {
                                queue: "side".into(),
                                message_count: 0,
                                consumer_count: 0,
                            }),
                        )
                        .await;
                }
                other => panic!("unexpected method {other:?}"),
            }
        }

        // once the consumer drains, flow resumes
        let (channel_id, method) = broker.recv_method().await;
        assert_eq!(channel_id, consume_channel);
        match method {
            Method::ChannelFlow(flow) => assert!(flow.active),
            other => panic!("expected Channel.Flow, got {other:?}"),
        }
        broker
            .send_method(
                channel_id,
                Method::ChannelFlowOk(channel::FlowOk { active: true }),
            )
            .await;

        broker.expect_close().await;
    });

    let mut connection = client()
        .stream_buffer_size(4)
        .open_with_stream(client_io)
        .await
        .unwrap();
    let consume_channel = connection.open_channel().await.unwrap();
    let mut consumer = consume_channel
        .basic_consume(
            "jobs",
            BasicConsumeOptions {
                no_ack: true,
                ..Default::default()
            },
            FieldTable::new(),
        )
        .await
        .unwrap();
    assert_eq!(consumer.tag(), "ctag-1");

    // while the consumer sits on its full buffer, another channel stays live
    let declare_channel = connection.open_channel().await.unwrap();
    let declared = declare_channel
        .queue_declare("side", QueueDeclareOptions::default(), FieldTable::new())
        .await
        .unwrap();
    assert_eq!(declared.queue, "side");

    for expected_tag in 1..=DELIVERIES {
        let message = consumer.recv().await.unwrap().expect("stream still open");
        assert_eq!(message.delivery_tag, expected_tag);
        assert_eq!(&message.body[..], b"payload");
    }

    drop(consumer);
    connection.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn returned_messages_reach_the_return_stream() {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let broker = tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        broker.handshake().await;
        let channel_id = broker.expect_channel_open().await;

        let (_, method) = broker.recv_method().await;
        match method {
            Method::BasicPublish(publish) => assert!(publish.mandatory),
            other => panic!("expected Basic.Publish, got {other:?}"),
        }
        let (_, _header, body) = broker.recv_content().await;

        broker
            .send_method(
                channel_id,
                Method::BasicReturn(basic::Return {
                    reply_code: 312,
                    reply_text: "NO_ROUTE".into(),
                    exchange: String::new(),
                    routing_key: "nowhere".into(),
                }),
            )
            .await;
        broker
            .send(amqp091::frames::Frame::header(
                channel_id,
                amqp091_types::ContentHeader {
                    class_id: 60,
                    body_size: body.len() as u64,
                    properties: BasicProperties::default(),
                },
            ))
            .await;
        broker
            .send(amqp091::frames::Frame::body(channel_id, body))
            .await;

        broker.expect_close().await;
    });

    let mut connection = client().open_with_stream(client_io).await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    let mut returns = channel.take_return_stream();

    channel
        .basic_publish(
            "",
            "nowhere",
            &b"lost"[..],
            BasicPublishOptions {
                mandatory: true,
                ..Default::default()
            },
            BasicProperties::default(),
        )
        .await
        .unwrap();

    let returned = returns.recv().await.expect("a return should arrive");
    assert_eq!(returned.reply_code, 312);
    assert_eq!(returned.routing_key, "nowhere");
    assert_eq!(&returned.body[..], b"lost");

    connection.close().await.unwrap();
    broker.await.unwrap();
}

#[tokio::test]
async fn consumer_cancel_round_trip() {
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);
    let broker = tokio::spawn(async move {
        let mut broker = MockBroker::accept(server_io).await;
        broker.handshake().await;
        let channel_id = broker.expect_channel_open().await;

        let (_, method) = broker.recv_method().await;
        assert!(matches!(method, Method::BasicConsume(_)));
        broker
            .send_method(
                channel_id,
                Method::BasicConsumeOk(basic::ConsumeOk {
                    consumer_tag: "ctag-9".into(),
                }),
            )
            .await;

        broker.deliver(channel_id, "ctag-9", 1, b"one").await;

        // auto-ack sends the ack for tag 1 before the cancel goes out
        let (_, method) = broker.recv_method().await;
        match method {
            Method::BasicAck(ack) => assert_eq!(ack.delivery_tag, 1),
            other => panic!("expected Basic.Ack, got {other:?}"),
        }
        let (_, method) = broker.recv_method().await;
        let cancel = match method {
            Method::BasicCancel(cancel) => cancel,
            other => panic!("expected Basic.Cancel, got {other:?}"),
        };
        assert_eq!(cancel.consumer_tag, "ctag-9");
        broker
            .send_method(
                channel_id,
                Method::BasicCancelOk(basic::CancelOk {
                    consumer_tag: "ctag-9".into(),
                }),
            )
            .await;

        broker.expect_close().await;
    });

    let mut connection = client().open_with_stream(client_io).await.unwrap();
    let channel = connection.open_channel().await.unwrap();
    let mut consumer = channel
        .basic_consume(
            "jobs",
            BasicConsumeOptions {
                auto_ack: true,
                ..Default::default()
            },
            FieldTable::new(),
        )
        .await
        .unwrap();

    let message = consumer.recv().await.unwrap().expect("stream open");
    assert_eq!(&message.body[..], b"one");

    consumer.cancel().await.unwrap();

    connection.close().await.unwrap();
    broker.await.unwrap();
}
