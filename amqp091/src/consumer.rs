//! The consumer delivery stream
//!
//! Returned by [`Channel::basic_consume`](crate::Channel::basic_consume).
//! Deliveries arrive through a bounded queue (`stream_buffer_size` deep);
//! when it saturates, the channel engine pauses the server with
//! `Channel.Flow` until the consumer catches up.

use std::pin::Pin;
use std::task::{Context, Poll};

use amqp091_types::methods::basic;
use amqp091_types::Method;
use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::trace;

use crate::channel::{Channel, Error};
use crate::control::{ChannelControl, SyncReply};
use crate::message::Message;

/// An active consumer on a queue.
///
/// Dropping the consumer sends a best-effort `Basic.Cancel` with `nowait`;
/// call [`cancel`](Consumer::cancel) for a confirmed teardown.
#[derive(Debug)]
pub struct Consumer {
    tag: String,
    deliveries: mpsc::Receiver<Message>,
    channel: Channel,
    no_ack: bool,
    auto_ack: bool,
    unacked: Option<u64>,
    cancelled: bool,
}

impl Consumer {
    pub(crate) fn new(
        tag: String,
        deliveries: mpsc::Receiver<Message>,
        channel: Channel,
        no_ack: bool,
        auto_ack: bool,
    ) -> Self {
        Self {
            tag,
            deliveries,
            channel,
            no_ack,
            auto_ack,
            unacked: None,
            cancelled: false,
        }
    }

    /// The authoritative consumer tag from `Basic.ConsumeOk`
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Receives the next delivery.
    ///
    /// Returns `Ok(None)` once the stream ended after a cancel; a peer
    /// close surfaces as the recorded close reason instead.
    ///
    /// When the consume was started with `auto_ack` (and without `no_ack`),
    /// the previous delivery is acknowledged here before the next one is
    /// awaited: a message handed out earlier was observed without the
    /// caller bailing out, which is this stream's definition of "processed".
    pub async fn recv(&mut self) -> Result<Option<Message>, Error> {
        if self.auto_ack && !self.no_ack {
            if let Some(delivery_tag) = self.unacked.take() {
                self.channel.basic_ack(delivery_tag, false).await?;
            }
        }

        match self.deliveries.recv().await {
            Some(message) => {
                self.unacked = Some(message.delivery_tag);
                Ok(Some(message))
            }
            None if self.cancelled => Ok(None),
            None => match self.channel.is_open() {
                // the server cancelled us (consumer-cancel-notify)
                true => {
                    self.cancelled = true;
                    Ok(None)
                }
                // replay the recorded close reason, not a bare end-of-stream
                false => Err(self.channel.closed_error()),
            },
        }
    }

    /// Acknowledges a delivery received from this consumer
    pub async fn ack(&self, message: &Message) -> Result<(), Error> {
        self.channel.basic_ack(message.delivery_tag, false).await
    }

    /// Rejects a delivery received from this consumer
    pub async fn nack(&self, message: &Message, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_nack(message.delivery_tag, false, requeue)
            .await
    }

    /// Sends `Basic.Cancel`, waits for `Basic.CancelOk`, and drains any
    /// deliveries that were already buffered
    pub async fn cancel(mut self) -> Result<(), Error> {
        if self.auto_ack && !self.no_ack {
            if let Some(delivery_tag) = self.unacked.take() {
                self.channel.basic_ack(delivery_tag, false).await?;
            }
        }

        self.cancelled = true;
        let method = Method::BasicCancel(basic::Cancel {
            consumer_tag: self.tag.clone(),
            no_wait: false,
        });
        let (responder, reply) = tokio::sync::oneshot::channel();
        self.channel
            .control()
            .send(ChannelControl::Rpc {
                method,
                responder,
                deliveries: None,
            })
            .await
            .map_err(|_| Error::Closed)?;
        match reply.await {
            Ok(Ok(SyncReply::Method(Method::BasicCancelOk(_)))) => {}
            Ok(Ok(other)) => return Err(Error::State(format!("unexpected reply {other:?}"))),
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(Error::Closed),
        }

        // the engine dropped its sender on CancelOk; drain what was queued
        while self.deliveries.recv().await.is_some() {
            trace!(tag = %self.tag, "discarding buffered delivery after cancel");
        }
        Ok(())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        if !self.cancelled {
            let cancel = Method::BasicCancel(basic::Cancel {
                consumer_tag: self.tag.clone(),
                no_wait: true,
            });
            let _ = self
                .channel
                .control()
                .try_send(ChannelControl::Send(cancel));
        }
    }
}

/// Yields deliveries without any ack handling; combine with
/// [`Consumer::ack`] or channel-level acks.
impl Stream for Consumer {
    type Item = Message;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().deliveries.poll_recv(cx)
    }
}
