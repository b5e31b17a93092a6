//! Implementation of AMQP 0-9-1 channels
//!
//! A [`Channel`] is a lightweight logical connection multiplexed over the
//! TCP connection. Each channel runs its own engine task; the handle here
//! sends it control messages and awaits replies through one-shot
//! rendezvous slots. A per-channel async mutex keeps at most one
//! synchronous request outstanding at a time, as the protocol requires.

use std::sync::Arc;

use amqp091_types::definitions::CloseInfo;
use amqp091_types::methods::{basic, channel, exchange, queue, tx, ExchangeKind};
use amqp091_types::{BasicProperties, ContentHeader, FieldTable, Method};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::trace;

use crate::control::{ChannelControl, SyncReply};
use crate::message::{Message, ReturnedMessage};
use crate::Consumer;

pub(crate) mod engine;
mod error;

pub use error::Error;

/// Channel lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// `Channel.Open` sent, waiting for `Channel.OpenOk`
    Opening,

    /// Fully usable
    Open,

    /// `Channel.Close` sent, waiting for `Channel.CloseOk`
    Closing,

    /// Terminal
    Closed,
}

/// Shared slot connecting the engine's `Basic.Return` handling with the
/// publishing side
#[derive(Debug, Default)]
pub(crate) struct ReturnState {
    /// The most recent return nobody consumed yet
    pub latest: Option<ReturnedMessage>,

    /// Registered return stream, if any
    pub listener: Option<mpsc::Sender<ReturnedMessage>>,
}

/// Options for [`Channel::queue_declare`]
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDeclareOptions {
    /// Only check for existence, do not create
    pub passive: bool,
    /// Survive a broker restart
    pub durable: bool,
    /// Only accessible from this connection, deleted with it
    pub exclusive: bool,
    /// Delete once all consumers are gone
    pub auto_delete: bool,
}

/// Options for [`Channel::queue_delete`]
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueDeleteOptions {
    /// Only delete if it has no consumers
    pub if_unused: bool,
    /// Only delete if it has no messages
    pub if_empty: bool,
}

/// Options for [`Channel::exchange_declare`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeDeclareOptions {
    /// Only check for existence, do not create
    pub passive: bool,
    /// Survive a broker restart
    pub durable: bool,
    /// Delete when no longer used
    pub auto_delete: bool,
    /// May not be published to directly
    pub internal: bool,
}

/// Options for [`Channel::basic_publish`]
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPublishOptions {
    /// Ask for a `Basic.Return` if the message cannot be routed
    pub mandatory: bool,
    /// Ask for a `Basic.Return` if the message cannot be consumed
    /// immediately (not supported by RabbitMQ 3.x)
    pub immediate: bool,
}

/// Options for [`Channel::basic_consume`]
#[derive(Debug, Clone, Default)]
pub struct BasicConsumeOptions {
    /// Consumer tag; empty asks the server to generate one
    pub consumer_tag: String,
    /// Do not deliver messages published on this connection
    pub no_local: bool,
    /// Deliveries need no acknowledgement
    pub no_ack: bool,
    /// Only this consumer may access the queue
    pub exclusive: bool,
    /// Acknowledge each delivery once the next one is requested
    /// (library feature, see [`Consumer::recv`]); ignored when `no_ack`
    pub auto_ack: bool,
}

/// A handle to an open channel.
///
/// Clones share the channel, including its request serialization lock.
#[derive(Debug, Clone)]
pub struct Channel {
    id: u16,
    control: mpsc::Sender<ChannelControl>,
    rpc_lock: Arc<tokio::sync::Mutex<()>>,
    flow: watch::Receiver<bool>,
    close_info: Arc<Mutex<Option<CloseInfo>>>,
    returns: Arc<Mutex<ReturnState>>,
    fault: Arc<Mutex<Option<Error>>>,
    stream_buffer_size: usize,
}

impl Channel {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u16,
        control: mpsc::Sender<ChannelControl>,
        flow: watch::Receiver<bool>,
        close_info: Arc<Mutex<Option<CloseInfo>>>,
        returns: Arc<Mutex<ReturnState>>,
        fault: Arc<Mutex<Option<Error>>>,
        stream_buffer_size: usize,
    ) -> Self {
        Self {
            id,
            control,
            rpc_lock: Arc::new(tokio::sync::Mutex::new(())),
            flow,
            close_info,
            returns,
            fault,
            stream_buffer_size,
        }
    }

    /// The channel id on the wire
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Whether the channel engine is still running
    pub fn is_open(&self) -> bool {
        !self.control.is_closed() && self.close_info.lock().is_none()
    }

    pub(crate) fn closed_error(&self) -> Error {
        if let Some(info) = self.close_info.lock().clone() {
            return Error::UnexpectedClose(info);
        }
        if let Some(reason) = self.fault.lock().clone() {
            return reason;
        }
        Error::Closed
    }

    async fn rpc_with_deliveries(
        &self,
        method: Method,
        deliveries: Option<mpsc::Sender<Message>>,
    ) -> Result<SyncReply, Error> {
        let _serialized = self.rpc_lock.lock().await;
        let (responder, reply) = oneshot::channel();
        self.control
            .send(ChannelControl::Rpc {
                method,
                responder,
                deliveries,
            })
            .await
            .map_err(|_| self.closed_error())?;
        match reply.await {
            Ok(result) => result,
            Err(_) => Err(self.closed_error()),
        }
    }

    async fn rpc(&self, method: Method) -> Result<SyncReply, Error> {
        self.rpc_with_deliveries(method, None).await
    }

    async fn send(&self, method: Method) -> Result<(), Error> {
        self.control
            .send(ChannelControl::Send(method))
            .await
            .map_err(|_| self.closed_error())
    }

    fn unexpected_reply(&self, reply: &SyncReply) -> Error {
        Error::State(format!("unexpected reply {reply:?}"))
    }

    /// Sends `Channel.Open` and waits for `Channel.OpenOk`. Called once by
    /// `Connection::open_channel`.
    pub(crate) async fn open(&self) -> Result<(), Error> {
        let method = Method::ChannelOpen(channel::Open {
            reserved_1: String::new(),
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::ChannelOpenOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Declares a queue and returns the server's `Queue.DeclareOk` with the
    /// authoritative name and queue statistics.
    ///
    /// An empty `name` asks the server to generate one (combine with
    /// `exclusive` for a private reply queue).
    pub async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        arguments: FieldTable,
    ) -> Result<queue::DeclareOk, Error> {
        let method = Method::QueueDeclare(queue::Declare {
            reserved_1: 0,
            queue: name.into(),
            passive: options.passive,
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            no_wait: false,
            arguments,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::QueueDeclareOk(ok)) => Ok(ok),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Binds a queue to an exchange
    pub async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), Error> {
        let method = Method::QueueBind(queue::Bind {
            reserved_1: 0,
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            no_wait: false,
            arguments,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::QueueBindOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Removes a queue binding
    pub async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), Error> {
        let method = Method::QueueUnbind(queue::Unbind {
            reserved_1: 0,
            queue: queue.into(),
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            arguments,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::QueueUnbindOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Discards all messages in a queue, returning how many were dropped
    pub async fn queue_purge(&self, queue: &str) -> Result<u32, Error> {
        let method = Method::QueuePurge(queue::Purge {
            reserved_1: 0,
            queue: queue.into(),
            no_wait: false,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::QueuePurgeOk(ok)) => Ok(ok.message_count),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Deletes a queue, returning how many messages were deleted with it
    pub async fn queue_delete(
        &self,
        queue: &str,
        options: QueueDeleteOptions,
    ) -> Result<u32, Error> {
        let method = Method::QueueDelete(queue::Delete {
            reserved_1: 0,
            queue: queue.into(),
            if_unused: options.if_unused,
            if_empty: options.if_empty,
            no_wait: false,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::QueueDeleteOk(ok)) => Ok(ok.message_count),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Declares an exchange and returns its name
    pub async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
        arguments: FieldTable,
    ) -> Result<String, Error> {
        let method = Method::ExchangeDeclare(exchange::Declare {
            reserved_1: 0,
            exchange: name.into(),
            kind: kind.as_str().into(),
            passive: options.passive,
            durable: options.durable,
            auto_delete: options.auto_delete,
            internal: options.internal,
            no_wait: false,
            arguments,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::ExchangeDeclareOk(_)) => Ok(name.to_string()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Deletes an exchange
    pub async fn exchange_delete(&self, name: &str, if_unused: bool) -> Result<(), Error> {
        let method = Method::ExchangeDelete(exchange::Delete {
            reserved_1: 0,
            exchange: name.into(),
            if_unused,
            no_wait: false,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::ExchangeDeleteOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Binds an exchange to an exchange (broker extension)
    pub async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), Error> {
        let method = Method::ExchangeBind(exchange::Bind {
            reserved_1: 0,
            destination: destination.into(),
            source: source.into(),
            routing_key: routing_key.into(),
            no_wait: false,
            arguments,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::ExchangeBindOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Removes an exchange-to-exchange binding (broker extension)
    pub async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> Result<(), Error> {
        let method = Method::ExchangeUnbind(exchange::Unbind {
            reserved_1: 0,
            destination: destination.into(),
            source: source.into(),
            routing_key: routing_key.into(),
            no_wait: false,
            arguments,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::ExchangeUnbindOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Publishes a message.
    ///
    /// Suspends while server flow control is active. With
    /// `options.mandatory`, a `Basic.Return` recorded since the previous
    /// publish (and not consumed by a return stream) surfaces here as
    /// [`Error::MessageReturned`].
    pub async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Bytes>,
        options: BasicPublishOptions,
        properties: BasicProperties,
    ) -> Result<(), Error> {
        if self.close_info.lock().is_some() {
            return Err(self.closed_error());
        }
        if options.mandatory {
            let returned = self.returns.lock().latest.take();
            if let Some(returned) = returned {
                return Err(Error::MessageReturned(Box::new(returned)));
            }
        }

        // Channel.Flow(false) parks publishes, not consumes or sync methods
        let mut flow = self.flow.clone();
        flow.wait_for(|active| *active)
            .await
            .map_err(|_| self.closed_error())?;

        let body = body.into();
        let header = ContentHeader {
            class_id: amqp091_types::methods::CLASS_BASIC,
            body_size: body.len() as u64,
            properties,
        };
        let method = basic::Publish {
            reserved_1: 0,
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            mandatory: options.mandatory,
            immediate: options.immediate,
        };
        self.control
            .send(ChannelControl::Publish {
                method,
                header,
                body,
            })
            .await
            .map_err(|_| self.closed_error())
    }

    /// Fetches a single message, `None` when the queue is empty
    pub async fn basic_get(&self, queue: &str, no_ack: bool) -> Result<Option<Message>, Error> {
        let method = Method::BasicGet(basic::Get {
            reserved_1: 0,
            queue: queue.into(),
            no_ack,
        });
        match self.rpc(method).await? {
            SyncReply::Content(message) => Ok(Some(*message)),
            SyncReply::Method(Method::BasicGetEmpty(_)) => Ok(None),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Starts a consumer and returns its delivery stream
    pub async fn basic_consume(
        &self,
        queue: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<Consumer, Error> {
        let (deliveries_tx, deliveries_rx) = mpsc::channel(self.stream_buffer_size);
        let method = Method::BasicConsume(basic::Consume {
            reserved_1: 0,
            queue: queue.into(),
            consumer_tag: options.consumer_tag.clone(),
            no_local: options.no_local,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            no_wait: false,
            arguments,
        });
        match self
            .rpc_with_deliveries(method, Some(deliveries_tx))
            .await?
        {
            SyncReply::Method(Method::BasicConsumeOk(ok)) => {
                trace!(channel = self.id, tag = %ok.consumer_tag, "consumer started");
                Ok(Consumer::new(
                    ok.consumer_tag,
                    deliveries_rx,
                    self.clone(),
                    options.no_ack,
                    options.auto_ack,
                ))
            }
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Acknowledges a delivery
    pub async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), Error> {
        self.send(Method::BasicAck(basic::Ack {
            delivery_tag,
            multiple,
        }))
        .await
    }

    /// Rejects a delivery
    pub async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.send(Method::BasicReject(basic::Reject {
            delivery_tag,
            requeue,
        }))
        .await
    }

    /// Rejects one or more deliveries (broker extension)
    pub async fn basic_nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), Error> {
        self.send(Method::BasicNack(basic::Nack {
            delivery_tag,
            multiple,
            requeue,
        }))
        .await
    }

    /// Sets the prefetch window
    pub async fn basic_qos(
        &self,
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    ) -> Result<(), Error> {
        let method = Method::BasicQos(basic::Qos {
            prefetch_size,
            prefetch_count,
            global,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::BasicQosOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Asks the server to redeliver all unacknowledged messages
    pub async fn basic_recover(&self, requeue: bool) -> Result<(), Error> {
        let method = Method::BasicRecover(basic::Recover { requeue });
        match self.rpc(method).await? {
            SyncReply::Method(Method::BasicRecoverOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Puts the channel into transactional mode
    pub async fn tx_select(&self) -> Result<(), Error> {
        match self.rpc(Method::TxSelect(tx::Select)).await? {
            SyncReply::Method(Method::TxSelectOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Commits the current transaction
    pub async fn tx_commit(&self) -> Result<(), Error> {
        match self.rpc(Method::TxCommit(tx::Commit)).await? {
            SyncReply::Method(Method::TxCommitOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Abandons the current transaction
    pub async fn tx_rollback(&self) -> Result<(), Error> {
        match self.rpc(Method::TxRollback(tx::Rollback)).await? {
            SyncReply::Method(Method::TxRollbackOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    /// Registers a stream of `Basic.Return` messages, replacing any
    /// previous listener. While a listener is registered, returns flow to
    /// it instead of surfacing on mandatory publishes.
    pub fn take_return_stream(&self) -> mpsc::Receiver<ReturnedMessage> {
        let (tx, rx) = mpsc::channel(self.stream_buffer_size);
        self.returns.lock().listener = Some(tx);
        rx
    }

    /// Closes the channel with `Channel.Close` and waits for the
    /// confirmation
    pub async fn close(self, reply_code: u16, reply_text: &str) -> Result<(), Error> {
        let method = Method::ChannelClose(channel::Close {
            reply_code,
            reply_text: reply_text.into(),
            class_id: 0,
            method_id: 0,
        });
        match self.rpc(method).await? {
            SyncReply::Method(Method::ChannelCloseOk(_)) => Ok(()),
            other => Err(self.unexpected_reply(&other)),
        }
    }

    pub(crate) fn control(&self) -> &mpsc::Sender<ChannelControl> {
        &self.control
    }
}
