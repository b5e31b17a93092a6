//! The per-channel engine task
//!
//! The connection dispatcher hands every frame for a channel to that
//! channel's engine through an unbounded handoff, so one slow channel never
//! stalls the others. The engine pairs synchronous replies with pending
//! requests in FIFO order, assembles `method + header + body` sequences
//! into messages, answers `Channel.Flow`, and propagates peer closes to
//! every waiter.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use amqp091_types::definitions::{reply_code, CloseInfo, FRAME_OVERHEAD, REPLY_SUCCESS};
use amqp091_types::methods::{basic, channel};
use amqp091_types::{ContentHeader, Method};
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use crate::control::{ChannelControl, ConnectionControl, SyncReply};
use crate::frames::{Frame, FramePayload};
use crate::message::{Message, ReturnedMessage};
use crate::util::Running;

use super::{ChannelState, Error, ReturnState};

struct PendingRpc {
    responder: oneshot::Sender<Result<SyncReply, Error>>,
    deliveries: Option<mpsc::Sender<Message>>,
}

enum ContentTarget {
    Deliver(basic::Deliver),
    Get(basic::GetOk),
    Return(basic::Return),
}

struct PartialContent {
    target: ContentTarget,
    header: Option<ContentHeader>,
    body: BytesMut,
}

enum InnerError {
    /// The peer broke the channel protocol; fatal to the connection
    Violation(String),
    /// The connection engine is gone
    ConnectionGone,
}

pub(crate) struct ChannelEngine {
    id: u16,
    incoming: mpsc::UnboundedReceiver<FramePayload>,
    control: mpsc::Receiver<ChannelControl>,
    outgoing: mpsc::Sender<Frame>,
    conn_control: mpsc::Sender<ConnectionControl>,
    pending: VecDeque<PendingRpc>,
    assembly: Option<PartialContent>,
    consumers: HashMap<String, mpsc::Sender<Message>>,
    returns: Arc<Mutex<ReturnState>>,
    flow: watch::Sender<bool>,
    close_info: Arc<Mutex<Option<CloseInfo>>>,
    fault: Arc<Mutex<Option<Error>>>,
    state: ChannelState,
    client_flow_stopped: bool,
    frame_max: u32,
}

impl ChannelEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u16,
        incoming: mpsc::UnboundedReceiver<FramePayload>,
        control: mpsc::Receiver<ChannelControl>,
        outgoing: mpsc::Sender<Frame>,
        conn_control: mpsc::Sender<ConnectionControl>,
        flow: watch::Sender<bool>,
        close_info: Arc<Mutex<Option<CloseInfo>>>,
        returns: Arc<Mutex<ReturnState>>,
        fault: Arc<Mutex<Option<Error>>>,
        frame_max: u32,
    ) -> Self {
        Self {
            id,
            incoming,
            control,
            outgoing,
            conn_control,
            pending: VecDeque::new(),
            assembly: None,
            consumers: HashMap::new(),
            returns,
            flow,
            close_info,
            fault,
            state: ChannelState::Opening,
            client_flow_stopped: false,
            frame_max,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.event_loop())
    }

    /// The reason waiters observe once the channel is unusable
    fn close_reason(&self) -> Error {
        if let Some(info) = self.close_info.lock().clone() {
            return Error::UnexpectedClose(info);
        }
        if let Some(reason) = self.fault.lock().clone() {
            return reason;
        }
        Error::Closed
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), InnerError> {
        self.outgoing
            .send(frame)
            .await
            .map_err(|_| InnerError::ConnectionGone)
    }

    fn complete_rpc(&mut self, result: Result<SyncReply, Error>) {
        match self.pending.pop_front() {
            Some(rpc) => {
                // a dead responder means the caller gave up; the reply is
                // still consumed here so FIFO pairing stays intact
                if rpc.responder.send(result).is_err() {
                    trace!(channel = self.id, "reply for an abandoned request");
                }
            }
            None => warn!(channel = self.id, "reply with no outstanding request"),
        }
    }

    fn shutdown(&mut self, reason: Error) {
        self.state = ChannelState::Closed;
        while let Some(rpc) = self.pending.pop_front() {
            let _ = rpc.responder.send(Err(reason.clone()));
        }
        self.consumers.clear();
        self.assembly = None;
        self.returns.lock().listener = None;
        // wake publishers parked on the flow gate so they observe the close
        self.flow.send_replace(true);
    }

    #[instrument(name = "RECV", skip_all, fields(channel = self.id))]
    async fn on_incoming(&mut self, payload: FramePayload) -> Result<Running, InnerError> {
        match payload {
            FramePayload::Method(method) => {
                trace!(frame = ?method);
                if self.assembly.is_some() && !matches!(method, Method::ChannelClose(_)) {
                    return Err(InnerError::Violation(
                        "method frame interleaved with content".into(),
                    ));
                }
                self.on_method(method).await
            }
            FramePayload::Header(header) => {
                trace!(body_size = header.body_size, "content header");
                let complete = match self.assembly.as_mut() {
                    Some(partial) if partial.header.is_none() => {
                        let empty = header.body_size == 0;
                        partial.header = Some(header);
                        empty
                    }
                    _ => {
                        return Err(InnerError::Violation("unexpected content header".into()))
                    }
                };
                if complete {
                    self.finish_assembly().await?;
                }
                Ok(Running::Continue)
            }
            FramePayload::Body(chunk) => {
                let complete = match self.assembly.as_mut() {
                    Some(partial) => match &partial.header {
                        Some(header) => {
                            partial.body.extend_from_slice(&chunk);
                            let received = partial.body.len() as u64;
                            if received > header.body_size {
                                return Err(InnerError::Violation(
                                    "content body longer than declared".into(),
                                ));
                            }
                            received == header.body_size
                        }
                        None => {
                            return Err(InnerError::Violation(
                                "content body before content header".into(),
                            ))
                        }
                    },
                    None => {
                        return Err(InnerError::Violation("unexpected content body".into()))
                    }
                };
                if complete {
                    self.finish_assembly().await?;
                }
                Ok(Running::Continue)
            }
            FramePayload::Heartbeat => {
                Err(InnerError::Violation("heartbeat on a channel".into()))
            }
        }
    }

    async fn on_method(&mut self, method: Method) -> Result<Running, InnerError> {
        match method {
            Method::ChannelOpenOk(_) => {
                self.state = ChannelState::Open;
                self.complete_rpc(Ok(SyncReply::Method(method)));
                Ok(Running::Continue)
            }
            Method::ChannelCloseOk(_) => {
                // no pending entry exists when the close came from the
                // last handle being dropped
                if !self.pending.is_empty() {
                    self.complete_rpc(Ok(SyncReply::Method(method)));
                }
                self.shutdown(Error::Closed);
                Ok(Running::Stop)
            }
            Method::ChannelClose(close) => {
                let info = CloseInfo {
                    reply_code: close.reply_code,
                    reply_text: close.reply_text,
                    class_id: close.class_id,
                    method_id: close.method_id,
                };
                debug!(channel = self.id, close = %info, "peer closed channel");
                *self.close_info.lock() = Some(info.clone());
                let close_ok =
                    Frame::method(self.id, Method::ChannelCloseOk(channel::CloseOk));
                let _ = self.outgoing.send(close_ok).await;
                self.shutdown(Error::UnexpectedClose(info));
                Ok(Running::Stop)
            }
            Method::ChannelFlow(flow) => {
                debug!(channel = self.id, active = flow.active, "server flow");
                self.flow.send_replace(flow.active);
                let flow_ok = Frame::method(
                    self.id,
                    Method::ChannelFlowOk(channel::FlowOk {
                        active: flow.active,
                    }),
                );
                self.send_frame(flow_ok).await?;
                Ok(Running::Continue)
            }
            // only this engine emits Channel.Flow, so FlowOk never pairs
            // with a user request
            Method::ChannelFlowOk(_) => Ok(Running::Continue),
            Method::BasicDeliver(deliver) => {
                self.assembly = Some(PartialContent {
                    target: ContentTarget::Deliver(deliver),
                    header: None,
                    body: BytesMut::new(),
                });
                Ok(Running::Continue)
            }
            Method::BasicGetOk(get_ok) => {
                self.assembly = Some(PartialContent {
                    target: ContentTarget::Get(get_ok),
                    header: None,
                    body: BytesMut::new(),
                });
                Ok(Running::Continue)
            }
            Method::BasicReturn(ret) => {
                self.assembly = Some(PartialContent {
                    target: ContentTarget::Return(ret),
                    header: None,
                    body: BytesMut::new(),
                });
                Ok(Running::Continue)
            }
            Method::BasicConsumeOk(ref ok) => {
                match self.pending.pop_front() {
                    Some(mut rpc) => {
                        if let Some(deliveries) = rpc.deliveries.take() {
                            self.consumers.insert(ok.consumer_tag.clone(), deliveries);
                        }
                        let _ = rpc.responder.send(Ok(SyncReply::Method(method)));
                    }
                    None => warn!(channel = self.id, "consume-ok with no outstanding request"),
                }
                Ok(Running::Continue)
            }
            Method::BasicCancelOk(ref ok) => {
                self.consumers.remove(&ok.consumer_tag);
                self.complete_rpc(Ok(SyncReply::Method(method)));
                Ok(Running::Continue)
            }
            Method::BasicCancel(cancel) => {
                // consumer-cancel-notify from the server
                warn!(channel = self.id, tag = %cancel.consumer_tag, "server cancelled consumer");
                self.consumers.remove(&cancel.consumer_tag);
                if !cancel.no_wait {
                    let cancel_ok = Frame::method(
                        self.id,
                        Method::BasicCancelOk(basic::CancelOk {
                            consumer_tag: cancel.consumer_tag,
                        }),
                    );
                    self.send_frame(cancel_ok).await?;
                }
                Ok(Running::Continue)
            }
            Method::BasicGetEmpty(_)
            | Method::QueueDeclareOk(_)
            | Method::QueueBindOk(_)
            | Method::QueueUnbindOk(_)
            | Method::QueuePurgeOk(_)
            | Method::QueueDeleteOk(_)
            | Method::ExchangeDeclareOk(_)
            | Method::ExchangeDeleteOk(_)
            | Method::ExchangeBindOk(_)
            | Method::ExchangeUnbindOk(_)
            | Method::BasicQosOk(_)
            | Method::BasicRecoverOk(_)
            | Method::TxSelectOk(_)
            | Method::TxCommitOk(_)
            | Method::TxRollbackOk(_) => {
                self.complete_rpc(Ok(SyncReply::Method(method)));
                Ok(Running::Continue)
            }
            other => {
                warn!(channel = self.id, frame = ?other, "unhandled method");
                Ok(Running::Continue)
            }
        }
    }

    async fn finish_assembly(&mut self) -> Result<(), InnerError> {
        let Some(partial) = self.assembly.take() else {
            return Ok(());
        };
        let Some(header) = partial.header else {
            return Ok(());
        };
        let properties = header.properties;
        let body = partial.body.freeze();

        match partial.target {
            ContentTarget::Deliver(deliver) => {
                let message = Message {
                    delivery_tag: deliver.delivery_tag,
                    redelivered: deliver.redelivered,
                    exchange: deliver.exchange,
                    routing_key: deliver.routing_key,
                    consumer_tag: Some(deliver.consumer_tag.clone()),
                    message_count: None,
                    properties,
                    body,
                };
                self.dispatch_delivery(deliver.consumer_tag, message).await
            }
            ContentTarget::Get(get_ok) => {
                let message = Message {
                    delivery_tag: get_ok.delivery_tag,
                    redelivered: get_ok.redelivered,
                    exchange: get_ok.exchange,
                    routing_key: get_ok.routing_key,
                    consumer_tag: None,
                    message_count: Some(get_ok.message_count),
                    properties,
                    body,
                };
                self.complete_rpc(Ok(SyncReply::Content(Box::new(message))));
                Ok(())
            }
            ContentTarget::Return(ret) => {
                let returned = ReturnedMessage {
                    reply_code: ret.reply_code,
                    reply_text: ret.reply_text,
                    exchange: ret.exchange,
                    routing_key: ret.routing_key,
                    properties,
                    body,
                };
                warn!(
                    channel = self.id,
                    reply_code = returned.reply_code,
                    "message returned by server"
                );
                let listener = self.returns.lock().listener.clone();
                match listener {
                    Some(tx) => {
                        if tx.send(returned).await.is_err() {
                            self.returns.lock().listener = None;
                        }
                    }
                    None => self.returns.lock().latest = Some(returned),
                }
                Ok(())
            }
        }
    }

    /// Pushes a delivery into the consumer's bounded queue. When the queue
    /// is saturated, asks the server to pause the channel with
    /// `Channel.Flow(false)` and resumes once the queue has drained.
    async fn dispatch_delivery(
        &mut self,
        consumer_tag: String,
        message: Message,
    ) -> Result<(), InnerError> {
        let Some(tx) = self.consumers.get(&consumer_tag) else {
            warn!(channel = self.id, tag = %consumer_tag, "delivery for unknown consumer");
            return Ok(());
        };
        let tx = tx.clone();

        match tx.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(message)) => {
                if !self.client_flow_stopped {
                    self.client_flow_stopped = true;
                    let stop = Frame::method(
                        self.id,
                        Method::ChannelFlow(channel::Flow { active: false }),
                    );
                    self.send_frame(stop).await?;
                }
                if tx.send(message).await.is_err() {
                    self.consumers.remove(&consumer_tag);
                }
            }
            Err(TrySendError::Closed(_)) => {
                self.consumers.remove(&consumer_tag);
                return Ok(());
            }
        }

        if self.client_flow_stopped && tx.capacity() * 2 >= tx.max_capacity() {
            self.resume_server_flow().await?;
        }
        Ok(())
    }

    async fn resume_server_flow(&mut self) -> Result<(), InnerError> {
        self.client_flow_stopped = false;
        let resume = Frame::method(self.id, Method::ChannelFlow(channel::Flow { active: true }));
        self.send_frame(resume).await
    }

    #[instrument(name = "SEND", skip_all, fields(channel = self.id))]
    async fn on_control(&mut self, control: ChannelControl) -> Result<Running, InnerError> {
        match control {
            ChannelControl::Rpc {
                method,
                responder,
                deliveries,
            } => {
                let allowed = match self.state {
                    ChannelState::Opening => matches!(method, Method::ChannelOpen(_)),
                    ChannelState::Open => true,
                    ChannelState::Closing | ChannelState::Closed => false,
                };
                if !allowed {
                    let _ = responder.send(Err(self.close_reason()));
                    return Ok(Running::Continue);
                }
                if matches!(method, Method::ChannelClose(_)) {
                    self.state = ChannelState::Closing;
                }
                trace!(frame = ?method);
                match self.outgoing.send(Frame::method(self.id, method)).await {
                    Ok(()) => {
                        self.pending.push_back(PendingRpc {
                            responder,
                            deliveries,
                        });
                        Ok(Running::Continue)
                    }
                    Err(_) => {
                        let _ = responder.send(Err(self.close_reason()));
                        Err(InnerError::ConnectionGone)
                    }
                }
            }
            ChannelControl::Send(method) => {
                if !matches!(self.state, ChannelState::Open) {
                    return Ok(Running::Continue);
                }
                // a nowait cancel ends its consumer stream immediately
                if let Method::BasicCancel(cancel) = &method {
                    self.consumers.remove(&cancel.consumer_tag);
                }
                trace!(frame = ?method);
                self.send_frame(Frame::method(self.id, method)).await?;
                Ok(Running::Continue)
            }
            ChannelControl::Publish {
                method,
                header,
                body,
            } => {
                if !matches!(self.state, ChannelState::Open) {
                    return Ok(Running::Continue);
                }
                trace!(frame = ?method, body_len = body.len());
                self.send_frame(Frame::method(self.id, Method::BasicPublish(method)))
                    .await?;
                self.send_frame(Frame::header(self.id, header)).await?;

                let chunk_size = self.frame_max as usize - FRAME_OVERHEAD;
                let mut body = body;
                while !body.is_empty() {
                    let take = body.len().min(chunk_size);
                    let chunk = body.split_to(take);
                    self.send_frame(Frame::body(self.id, chunk)).await?;
                }
                Ok(Running::Continue)
            }
        }
    }

    /// Cooperative close when the last handle is dropped
    async fn close_on_handle_drop(&mut self) -> Result<Running, InnerError> {
        match self.state {
            ChannelState::Open => {
                let close = Frame::method(
                    self.id,
                    Method::ChannelClose(channel::Close {
                        reply_code: REPLY_SUCCESS,
                        reply_text: String::new(),
                        class_id: 0,
                        method_id: 0,
                    }),
                );
                self.send_frame(close).await?;
                self.state = ChannelState::Closing;
                Ok(Running::Continue)
            }
            ChannelState::Closing => Ok(Running::Continue),
            _ => Ok(Running::Stop),
        }
    }

    #[instrument(name = "Channel::event_loop", skip(self), fields(channel = self.id))]
    async fn event_loop(mut self) {
        let mut handles_dropped = false;
        loop {
            // once the inbound backlog is worked off, let the server flow
            // again even if no further dispatch re-checks the queue
            if self.client_flow_stopped
                && self.assembly.is_none()
                && self.incoming.is_empty()
                && matches!(self.state, ChannelState::Open)
                && self.resume_server_flow().await.is_err()
            {
                let reason = self.fault.lock().clone().unwrap_or(Error::Closed);
                self.shutdown(reason);
                break;
            }

            let result = tokio::select! {
                incoming = self.incoming.recv() => {
                    match incoming {
                        Some(payload) => self.on_incoming(payload).await,
                        None => {
                            // the connection engine is gone; replay its fault
                            let reason = self
                                .fault
                                .lock()
                                .clone()
                                .unwrap_or(Error::Closed);
                            self.shutdown(reason);
                            Ok(Running::Stop)
                        }
                    }
                }
                control = self.control.recv(), if !handles_dropped => {
                    match control {
                        Some(control) => self.on_control(control).await,
                        None => {
                            handles_dropped = true;
                            self.close_on_handle_drop().await
                        }
                    }
                }
            };

            let running = match result {
                Ok(running) => running,
                Err(InnerError::Violation(text)) => {
                    error!(channel = self.id, %text, "channel protocol violation");
                    let _ = self
                        .conn_control
                        .send(ConnectionControl::Fault {
                            reply_code: reply_code::UNEXPECTED_FRAME,
                            reply_text: text.clone(),
                        })
                        .await;
                    self.shutdown(Error::State(text));
                    Running::Stop
                }
                Err(InnerError::ConnectionGone) => {
                    let reason = self.fault.lock().clone().unwrap_or(Error::Closed);
                    self.shutdown(reason);
                    Running::Stop
                }
            };

            match running {
                Running::Continue => {}
                Running::Stop => break,
            }
        }

        let _ = self
            .conn_control
            .send(ConnectionControl::DeallocateChannel(self.id))
            .await;
        debug!(channel = self.id, "Stopped");
    }
}
