//! The connection engine: handshake, tuning, and the dispatcher loop
//!
//! One engine task owns the transport for the connection's whole life. It
//! finishes the handshake before spawning, then multiplexes: inbound frames
//! are routed by channel id to the per-channel engines, outbound frames
//! from every channel drain through a single queue, and heartbeats tick in
//! between.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use amqp091_types::definitions::{reply_code, CloseInfo, MAJOR, MINOR, REPLY_SUCCESS};
use amqp091_types::methods::connection;
use amqp091_types::{FieldTable, Method};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use slab::Slab;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace, warn};

use crate::channel;
use crate::control::ConnectionControl;
use crate::frames::{Frame, FramePayload};
use crate::transport::Transport;
use crate::util::Running;

use super::builder::Builder;
use super::heartbeat::HeartBeat;
use super::{ConnectionState, Error, NegotiatedLimits, OpenError};

pub(crate) const ERROR_CLOSE_WAIT_SECS: u64 = 10;

pub(crate) struct ConnectionEngine<Io> {
    transport: Transport<Io>,
    control: mpsc::Receiver<ConnectionControl>,
    outgoing: mpsc::Receiver<Frame>,
    // slab key + 1 = channel id, so the lowest free id is reused first
    channels: Slab<mpsc::UnboundedSender<FramePayload>>,
    state: ConnectionState,
    limits: NegotiatedLimits,
    heartbeat: HeartBeat,
    server_properties: FieldTable,
    close_info: Option<CloseInfo>,
    fault: Arc<Mutex<Option<channel::Error>>>,
    blocked: bool,
}

fn negotiate_u16(server: u16, client: u16) -> u16 {
    match (server, client) {
        (0, 0) => u16::MAX,
        (0, client) => client,
        (server, 0) => server,
        (server, client) => server.min(client),
    }
}

fn negotiate_u32(server: u32, client: u32) -> u32 {
    match (server, client) {
        (0, 0) => u32::MAX,
        (0, client) => client,
        (server, 0) => server,
        (server, client) => server.min(client),
    }
}

fn negotiate_heartbeat(server: u16, client: u16) -> u16 {
    if server == 0 || client == 0 {
        return 0;
    }
    server.min(client)
}

impl<Io> ConnectionEngine<Io>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Drives the handshake, `Init` through `Open`, without starting the
    /// event loop
    pub(crate) async fn open(
        transport: Transport<Io>,
        builder: &Builder,
        control: mpsc::Receiver<ConnectionControl>,
        outgoing: mpsc::Receiver<Frame>,
        fault: Arc<Mutex<Option<channel::Error>>>,
    ) -> Result<Self, OpenError> {
        let mut engine = Self {
            transport,
            control,
            outgoing,
            channels: Slab::new(),
            state: ConnectionState::Init,
            limits: NegotiatedLimits {
                channel_max: builder.desired_channel_max,
                frame_max: builder.desired_frame_max,
                heartbeat: builder.desired_heartbeat,
            },
            heartbeat: HeartBeat::never(),
            server_properties: FieldTable::new(),
            close_info: None,
            fault,
            blocked: false,
        };

        let profile = &builder.sasl_profile;

        // Connection.Start
        let start = match engine.recv_method().await? {
            Method::ConnectionStart(start) => start,
            Method::ConnectionClose(close) => {
                return Err(engine.close_during_handshake(close).await)
            }
            other => {
                return Err(OpenError::UnexpectedFrame(format!(
                    "expected Connection.Start, got {other:?}"
                )))
            }
        };
        if start.version_major != MAJOR || start.version_minor != MINOR {
            return Err(OpenError::UnexpectedFrame(format!(
                "server negotiates protocol {}.{}",
                start.version_major, start.version_minor
            )));
        }
        if !profile.is_offered(&start.mechanisms) {
            return Err(OpenError::Authentication(format!(
                "server does not offer {}",
                profile.mechanism()
            )));
        }
        engine.server_properties = start.server_properties;
        engine.state = ConnectionState::Started;

        let response = profile
            .response()
            .map_err(|err| OpenError::Frame(err.into()))?;
        engine
            .send_method(Method::ConnectionStartOk(connection::StartOk {
                client_properties: builder.amended_client_properties(),
                mechanism: profile.mechanism().into(),
                response,
                locale: builder.locale.clone(),
            }))
            .await?;

        // zero or more Connection.Secure challenges, then Connection.Tune
        let tune = loop {
            match engine.recv_method().await? {
                Method::ConnectionSecure(_) => {
                    let response = profile
                        .response()
                        .map_err(|err| OpenError::Frame(err.into()))?;
                    engine
                        .send_method(Method::ConnectionSecureOk(connection::SecureOk {
                            response,
                        }))
                        .await?;
                }
                Method::ConnectionTune(tune) => break tune,
                Method::ConnectionClose(close) => {
                    return Err(engine.close_during_handshake(close).await)
                }
                other => {
                    return Err(OpenError::UnexpectedFrame(format!(
                        "expected Connection.Tune, got {other:?}"
                    )))
                }
            }
        };

        engine.limits = NegotiatedLimits {
            channel_max: negotiate_u16(tune.channel_max, builder.desired_channel_max),
            frame_max: negotiate_u32(tune.frame_max, builder.desired_frame_max),
            heartbeat: negotiate_heartbeat(tune.heartbeat, builder.desired_heartbeat),
        };
        engine.state = ConnectionState::Tuned;
        engine
            .send_method(Method::ConnectionTuneOk(connection::TuneOk {
                channel_max: engine.limits.channel_max,
                frame_max: engine.limits.frame_max,
                heartbeat: engine.limits.heartbeat,
            }))
            .await?;

        engine
            .transport
            .set_max_frame_size(engine.limits.frame_max as usize);
        if engine.limits.heartbeat > 0 {
            // outbound tick at half the period, dead peer at twice of it
            let period = Duration::from_millis(u64::from(engine.limits.heartbeat) * 500);
            engine.heartbeat = HeartBeat::new(period);
            engine
                .transport
                .set_idle_timeout(Duration::from_secs(u64::from(engine.limits.heartbeat) * 2));
        }

        // Connection.Open
        engine
            .send_method(Method::ConnectionOpen(connection::Open {
                virtual_host: builder.virtual_host.clone(),
                reserved_1: String::new(),
                reserved_2: false,
            }))
            .await?;
        match engine.recv_method().await? {
            Method::ConnectionOpenOk(_) => engine.state = ConnectionState::Open,
            Method::ConnectionClose(close) => {
                return Err(engine.close_during_handshake(close).await)
            }
            other => {
                return Err(OpenError::UnexpectedFrame(format!(
                    "expected Connection.OpenOk, got {other:?}"
                )))
            }
        }

        debug!(
            channel_max = engine.limits.channel_max,
            frame_max = engine.limits.frame_max,
            heartbeat = engine.limits.heartbeat,
            "connection opened"
        );
        Ok(engine)
    }

    pub(crate) fn limits(&self) -> NegotiatedLimits {
        self.limits
    }

    pub(crate) fn server_properties(&self) -> FieldTable {
        self.server_properties.clone()
    }

    pub(crate) fn spawn(self) -> JoinHandle<Result<(), Error>> {
        tokio::spawn(self.event_loop())
    }

    async fn recv_method(&mut self) -> Result<Method, OpenError> {
        loop {
            let frame = match self.transport.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(err)) => return Err(err.into()),
                None => {
                    return Err(OpenError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport closed during handshake",
                    )))
                }
            };
            if frame.channel != 0 {
                return Err(OpenError::UnexpectedFrame(format!(
                    "handshake frame on channel {}",
                    frame.channel
                )));
            }
            match frame.payload {
                FramePayload::Method(method) => {
                    trace!(frame = ?method, "RECV");
                    return Ok(method);
                }
                FramePayload::Heartbeat => continue,
                other => {
                    return Err(OpenError::UnexpectedFrame(format!(
                        "content frame during handshake: {other:?}"
                    )))
                }
            }
        }
    }

    async fn send_method(&mut self, method: Method) -> Result<(), OpenError> {
        trace!(frame = ?method, "SEND");
        self.transport
            .send(Frame::method(0, method))
            .await
            .map_err(Into::into)
    }

    async fn close_during_handshake(&mut self, close: connection::Close) -> OpenError {
        let info = CloseInfo {
            reply_code: close.reply_code,
            reply_text: close.reply_text,
            class_id: close.class_id,
            method_id: close.method_id,
        };
        let _ = self
            .transport
            .send(Frame::method(
                0,
                Method::ConnectionCloseOk(connection::CloseOk),
            ))
            .await;
        self.state = ConnectionState::Closed;
        if info.reply_code == reply_code::ACCESS_REFUSED {
            OpenError::Authentication(info.reply_text)
        } else {
            OpenError::RemoteClosed(info)
        }
    }
}

impl<Io> ConnectionEngine<Io>
where
    Io: AsyncRead + AsyncWrite + Send + Unpin,
{
    fn route_to_channel(&mut self, frame: Frame) -> Result<(), Error> {
        let key = frame.channel as usize - 1;
        match self.channels.get(key) {
            Some(tx) => {
                if tx.send(frame.payload).is_err() {
                    trace!(channel = frame.channel, "frame for a stopped channel");
                }
                Ok(())
            }
            None => Err(Error::UnexpectedFrame(format!(
                "frame for unknown channel {}",
                frame.channel
            ))),
        }
    }

    #[instrument(name = "RECV", skip_all)]
    async fn on_incoming(
        &mut self,
        incoming: Result<Frame, crate::transport::Error>,
    ) -> Result<Running, Error> {
        let frame = incoming?;

        if let FramePayload::Heartbeat = frame.payload {
            if frame.channel != 0 {
                return Err(Error::UnexpectedFrame(format!(
                    "heartbeat on channel {}",
                    frame.channel
                )));
            }
            return Ok(Running::Continue);
        }

        if frame.channel != 0 {
            self.route_to_channel(frame)?;
            return Ok(Running::Continue);
        }

        let method = match frame.payload {
            FramePayload::Method(method) => method,
            other => {
                return Err(Error::UnexpectedFrame(format!(
                    "content frame on channel 0: {other:?}"
                )))
            }
        };
        trace!(channel = 0, frame = ?method);

        match method {
            Method::ConnectionClose(close) => {
                let info = CloseInfo {
                    reply_code: close.reply_code,
                    reply_text: close.reply_text,
                    class_id: close.class_id,
                    method_id: close.method_id,
                };
                let _ = self
                    .transport
                    .send(Frame::method(
                        0,
                        Method::ConnectionCloseOk(connection::CloseOk),
                    ))
                    .await;
                self.state = ConnectionState::Closed;
                if info.is_error() {
                    Err(Error::RemoteClosed(info))
                } else {
                    self.close_info = Some(info);
                    Ok(Running::Stop)
                }
            }
            Method::ConnectionCloseOk(_) => match self.state {
                ConnectionState::Closing => {
                    self.state = ConnectionState::Closed;
                    Ok(Running::Stop)
                }
                _ => Err(Error::UnexpectedFrame("unsolicited Connection.CloseOk".into())),
            },
            Method::ConnectionBlocked(blocked) => {
                warn!(reason = %blocked.reason, "connection blocked by server");
                self.blocked = true;
                Ok(Running::Continue)
            }
            Method::ConnectionUnblocked(_) => {
                debug!("connection unblocked by server");
                self.blocked = false;
                Ok(Running::Continue)
            }
            other => Err(Error::UnexpectedFrame(format!("{other:?} on channel 0"))),
        }
    }

    #[instrument(skip_all)]
    async fn on_control(&mut self, control: ConnectionControl) -> Result<Running, Error> {
        debug!(?control);
        match control {
            ConnectionControl::Close {
                reply_code,
                reply_text,
            } => {
                if !matches!(self.state, ConnectionState::Open) {
                    return Ok(Running::Stop);
                }
                self.graceful_close(reply_code, reply_text).await;
                Ok(Running::Stop)
            }
            ConnectionControl::AllocateChannel {
                incoming,
                responder,
            } => {
                let result = self.allocate_channel(incoming);
                let _ = responder.send(result);
                Ok(Running::Continue)
            }
            ConnectionControl::DeallocateChannel(id) => {
                let key = id as usize - 1;
                if self.channels.contains(key) {
                    self.channels.remove(key);
                }
                Ok(Running::Continue)
            }
            ConnectionControl::Fault {
                reply_code: _,
                reply_text,
            } => Err(Error::UnexpectedFrame(reply_text)),
        }
    }

    fn allocate_channel(
        &mut self,
        incoming: mpsc::UnboundedSender<FramePayload>,
    ) -> Result<u16, super::error::AllocChannelError> {
        use super::error::AllocChannelError;

        if !matches!(self.state, ConnectionState::Open) {
            return Err(AllocChannelError::IllegalState);
        }
        let entry = self.channels.vacant_entry();
        let id = entry.key() + 1;
        if id > self.limits.channel_max as usize {
            return Err(AllocChannelError::ChannelMaxReached);
        }
        entry.insert(incoming);
        Ok(id as u16)
    }

    #[instrument(name = "SEND", skip_all)]
    async fn on_outgoing(&mut self, frame: Frame) -> Result<Running, Error> {
        match self.state {
            ConnectionState::Open | ConnectionState::Closing => {
                self.transport.send(frame).await?;
                Ok(Running::Continue)
            }
            _ => {
                trace!(channel = frame.channel, "dropping outbound frame, connection not open");
                Ok(Running::Continue)
            }
        }
    }

    async fn on_heartbeat(&mut self) -> Result<Running, Error> {
        if matches!(self.state, ConnectionState::Open) {
            self.transport.send(Frame::heartbeat()).await?;
        }
        Ok(Running::Continue)
    }

    /// Best-effort `Channel.Close` on every live channel, then
    /// `Connection.Close`, then drain until the reply or the timeout
    async fn graceful_close(&mut self, reply_code: u16, reply_text: String) {
        let ids: Vec<u16> = self.channels.iter().map(|(key, _)| key as u16 + 1).collect();
        for id in ids {
            let close = Frame::method(
                id,
                Method::ChannelClose(amqp091_types::methods::channel::Close {
                    reply_code: REPLY_SUCCESS,
                    reply_text: String::new(),
                    class_id: 0,
                    method_id: 0,
                }),
            );
            if self.transport.send(close).await.is_err() {
                break;
            }
        }

        let close = Frame::method(
            0,
            Method::ConnectionClose(connection::Close {
                reply_code,
                reply_text,
                class_id: 0,
                method_id: 0,
            }),
        );
        self.state = ConnectionState::Closing;
        if self.transport.send(close).await.is_ok() {
            let _ = self.drain_until_close_ok().await;
        }
        self.state = ConnectionState::Closed;
    }

    async fn send_close_and_drain(&mut self, reply_code: u16, reply_text: &str) {
        let close = Frame::method(
            0,
            Method::ConnectionClose(connection::Close {
                reply_code,
                reply_text: reply_text.into(),
                class_id: 0,
                method_id: 0,
            }),
        );
        self.state = ConnectionState::Closing;
        if self.transport.send(close).await.is_ok() {
            let _ = self.drain_until_close_ok().await;
        }
        self.state = ConnectionState::Closed;
    }

    async fn drain_until_close_ok(&mut self) -> Result<(), tokio::time::error::Elapsed> {
        tokio::time::timeout(Duration::from_secs(ERROR_CLOSE_WAIT_SECS), async {
            loop {
                match self.transport.next().await {
                    Some(Ok(frame)) => {
                        if let FramePayload::Method(Method::ConnectionCloseOk(_)) = frame.payload {
                            break;
                        }
                        // keep routing so channel engines can settle their
                        // own close handshakes meanwhile
                        if frame.channel != 0 {
                            let _ = self.route_to_channel(frame);
                        }
                    }
                    Some(Err(_)) | None => break,
                }
            }
        })
        .await
    }

    async fn on_error(&mut self, error: &Error) -> Running {
        match error {
            Error::Io(_)
            | Error::HeartbeatTimeout
            | Error::RemoteClosed(_)
            | Error::Closed
            | Error::ChannelMaxReached
            | Error::IllegalState
            | Error::JoinError(_) => Running::Stop,
            Error::Frame(crate::frames::Error::NotImplemented { .. }) => {
                self.send_close_and_drain(reply_code::NOT_IMPLEMENTED, "NOT_IMPLEMENTED")
                    .await;
                Running::Stop
            }
            Error::Frame(_) => {
                self.send_close_and_drain(reply_code::FRAME_ERROR, "FRAME_ERROR")
                    .await;
                Running::Stop
            }
            Error::UnexpectedFrame(_) => {
                self.send_close_and_drain(reply_code::UNEXPECTED_FRAME, "UNEXPECTED_FRAME")
                    .await;
                Running::Stop
            }
        }
    }

    #[instrument(name = "Connection::event_loop", skip(self))]
    async fn event_loop(mut self) -> Result<(), Error> {
        let mut outcome = Ok(());
        loop {
            let result = tokio::select! {
                _ = self.heartbeat.next() => self.on_heartbeat().await,
                incoming = self.transport.next() => {
                    match incoming {
                        Some(incoming) => self.on_incoming(incoming).await,
                        None => {
                            match self.state {
                                ConnectionState::Closed => Ok(Running::Stop),
                                _ => Err(Error::Io(io::Error::new(
                                    io::ErrorKind::UnexpectedEof,
                                    "transport closed before connection close",
                                ))),
                            }
                        }
                    }
                },
                control = self.control.recv() => {
                    match control {
                        Some(control) => self.on_control(control).await,
                        None => {
                            // every handle is gone; shut the connection down
                            let close = ConnectionControl::Close {
                                reply_code: REPLY_SUCCESS,
                                reply_text: "client shutdown".into(),
                            };
                            let _ = self.on_control(close).await;
                            Ok(Running::Stop)
                        }
                    }
                },
                frame = self.outgoing.recv() => {
                    match frame {
                        Some(frame) => self.on_outgoing(frame).await,
                        None => Ok(Running::Stop),
                    }
                }
            };

            let running = match result {
                Ok(running) => running,
                Err(err) => {
                    error!("{:?}", err);
                    let running = self.on_error(&err).await;
                    outcome = Err(err);
                    running
                }
            };

            match running {
                Running::Continue => {}
                Running::Stop => break,
            }
        }

        // fault every channel with the recorded reason before dropping
        // their handoffs, so waiters observe the cause rather than a bare
        // end-of-stream
        let reason = match &outcome {
            Ok(()) => match &self.close_info {
                Some(info) if info.is_error() => {
                    channel::Error::UnexpectedClose(info.clone())
                }
                _ => channel::Error::Closed,
            },
            Err(err) => err.as_channel_fault(),
        };
        *self.fault.lock() = Some(reason);
        self.channels.clear();

        self.control.close();
        self.outgoing.close();
        debug!("Stopped");

        outcome
    }
}
