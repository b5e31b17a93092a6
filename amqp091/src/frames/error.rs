use amqp091_types::methods::MethodError;
use amqp091_types::CodecError;

/// Error associated with encoding or decoding frames
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error from the underlying codec machinery
    #[error("IO Error {0:?}")]
    Io(#[from] std::io::Error),

    /// The octet after the payload was not `0xCE`
    #[error("Bad frame terminator {found:#04x}")]
    BadTerminator {
        /// The octet found in place of `0xCE`
        found: u8,
    },

    /// The stream ended in the middle of a frame
    #[error("Stream ended in the middle of a frame")]
    Truncated,

    /// The frame is larger than the negotiated maximum
    #[error("Frame of {size} bytes exceeds the maximum of {max}")]
    Oversized {
        /// Size of the offending frame including overhead
        size: usize,
        /// Negotiated frame-max
        max: usize,
    },

    /// Unknown frame type octet
    #[error("Unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// The peer answered the protocol prelude with its own header, meaning
    /// it does not speak our protocol version
    #[error("Peer answered with protocol header {0:02x?}")]
    ProtocolHeaderReceived([u8; 8]),

    /// The `(class-id, method-id)` pair is not in the registry
    #[error("Method not implemented: class {class_id}, method {method_id}")]
    NotImplemented {
        /// Class id read from the payload
        class_id: u16,
        /// Method id read from the payload
        method_id: u16,
    },

    /// The frame payload was malformed
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<MethodError> for Error {
    fn from(err: MethodError) -> Self {
        match err {
            MethodError::Codec(err) => Self::Codec(err),
            MethodError::Unknown {
                class_id,
                method_id,
            } => Self::NotImplemented {
                class_id,
                method_id,
            },
        }
    }
}
