//! Implements low level transport framing
//!
//! The transport owns both halves of the byte stream: a [`FramedWrite`]
//! and a [`FramedRead`] sharing the [`FrameCodec`], plus an optional read
//! side idle timeout that detects a dead peer when heartbeats are
//! negotiated. It is a [`Stream`] of inbound frames and a [`Sink`] of
//! outbound frames.

use std::task::Poll;
use std::time::Duration;

use futures_util::{Future, Sink, Stream};
use pin_project_lite::pin_project;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::frames::{Frame, FrameCodec};
use crate::util::IdleTimeout;

mod error;
pub use error::Error;
pub mod protocol_header;

use protocol_header::ProtocolHeader;

pin_project! {
    /// Frame transport over an ordered byte stream
    #[derive(Debug)]
    pub struct Transport<Io> {
        #[pin]
        framed_write: FramedWrite<WriteHalf<Io>, FrameCodec>,

        #[pin]
        framed_read: FramedRead<ReadHalf<Io>, FrameCodec>,

        #[pin]
        idle_timeout: Option<IdleTimeout>,
    }
}

impl<Io> Transport<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    /// Binds to an IO without writing anything
    pub fn bind(io: Io, max_frame_size: usize, idle_timeout: Option<Duration>) -> Self {
        let (reader, writer) = tokio::io::split(io);
        let framed_write = FramedWrite::new(writer, FrameCodec::new(max_frame_size));
        let framed_read = FramedRead::new(reader, FrameCodec::new(max_frame_size));

        let idle_timeout = match idle_timeout {
            Some(duration) if !duration.is_zero() => Some(IdleTimeout::new(duration)),
            _ => None,
        };

        Self {
            framed_write,
            framed_read,
            idle_timeout,
        }
    }

    /// Writes the 8-byte protocol prelude and binds the frame codec.
    ///
    /// The server never acknowledges the prelude; a version mismatch shows
    /// up as the first "frame" being the server's own header, which the
    /// decoder surfaces as
    /// [`ProtocolHeaderReceived`](crate::frames::Error::ProtocolHeaderReceived).
    pub async fn negotiate(mut io: Io, max_frame_size: usize) -> Result<Self, Error> {
        let prelude: [u8; 8] = ProtocolHeader::amqp091().into();
        tracing::trace!(prelude = ?prelude, "SEND protocol header");
        io.write_all(&prelude).await?;
        io.flush().await?;
        Ok(Self::bind(io, max_frame_size, None))
    }

    /// Changes the enforced frame-max on both directions after tuning
    pub fn set_max_frame_size(&mut self, max_frame_size: usize) -> &mut Self {
        self.framed_write
            .encoder_mut()
            .set_max_frame_size(max_frame_size);
        self.framed_read
            .decoder_mut()
            .set_max_frame_size(max_frame_size);
        self
    }

    /// Sets the read side idle timeout; zero disables it
    pub fn set_idle_timeout(&mut self, duration: Duration) -> &mut Self {
        self.idle_timeout = match duration.is_zero() {
            true => None,
            false => Some(IdleTimeout::new(duration)),
        };
        self
    }
}

impl<Io> Sink<Frame> for Transport<Io>
where
    Io: AsyncWrite + Unpin,
{
    type Error = Error;

    fn poll_ready(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed_write.poll_ready(cx).map_err(Into::into)
    }

    fn start_send(self: std::pin::Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        let this = self.project();
        this.framed_write.start_send(item).map_err(Into::into)
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed_write.poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Result<(), Self::Error>> {
        let this = self.project();
        this.framed_write.poll_close(cx).map_err(Into::into)
    }
}

impl<Io> Stream for Transport<Io>
where
    Io: AsyncRead + Unpin,
{
    type Item = Result<Frame, Error>;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        let this = self.project();

        match this.framed_read.poll_next(cx) {
            Poll::Ready(next) => {
                // any inbound traffic counts as a liveness signal
                if let Some(mut delay) = this.idle_timeout.as_pin_mut() {
                    delay.reset();
                }
                Poll::Ready(next.map(|item| item.map_err(Into::into)))
            }
            Poll::Pending => {
                if let Some(delay) = this.idle_timeout.as_pin_mut() {
                    match delay.poll(cx) {
                        Poll::Ready(_elapsed) => {
                            return Poll::Ready(Some(Err(Error::IdleTimeoutElapsed)))
                        }
                        Poll::Pending => return Poll::Pending,
                    }
                }
                Poll::Pending
            }
        }
    }
}
