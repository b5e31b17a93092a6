use crate::frames;

/// Error associated with the framed transport
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error
    #[error("IO Error {0:?}")]
    Io(#[from] std::io::Error),

    /// Frame encode/decode error
    #[error(transparent)]
    Frame(frames::Error),

    /// No inbound traffic arrived within the heartbeat grace window
    #[error("Idle timeout elapsed, peer presumed dead")]
    IdleTimeoutElapsed,
}

impl From<frames::Error> for Error {
    fn from(err: frames::Error) -> Self {
        match err {
            frames::Error::Io(err) => Self::Io(err),
            other => Self::Frame(other),
        }
    }
}
