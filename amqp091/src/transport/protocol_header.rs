//! Implements the protocol header prelude

use amqp091_types::definitions::{MAJOR, MINOR, REVISION};

const PROTOCOL_HEADER_PREFIX: &[u8; 4] = b"AMQP";

/// The 8-byte prelude the client writes before any frames.
///
/// For AMQP 0-9-1 the wire form is `AMQP\x00\x00\x09\x01`. A server that
/// does not speak the proposed version answers with its own header and
/// closes the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolHeader {
    /// Protocol id octet, 0 for plain AMQP
    pub protocol_id: u8,

    /// Major number
    pub major: u8,

    /// Minor number
    pub minor: u8,

    /// Revision number
    pub revision: u8,
}

impl Default for ProtocolHeader {
    fn default() -> Self {
        Self {
            protocol_id: 0,
            major: MAJOR,
            minor: MINOR,
            revision: REVISION,
        }
    }
}

impl ProtocolHeader {
    /// The header for the protocol version this crate speaks
    pub fn amqp091() -> Self {
        Self::default()
    }
}

impl From<ProtocolHeader> for [u8; 8] {
    fn from(value: ProtocolHeader) -> Self {
        [
            PROTOCOL_HEADER_PREFIX[0],
            PROTOCOL_HEADER_PREFIX[1],
            PROTOCOL_HEADER_PREFIX[2],
            PROTOCOL_HEADER_PREFIX[3],
            value.protocol_id,
            value.major,
            value.minor,
            value.revision,
        ]
    }
}

impl TryFrom<[u8; 8]> for ProtocolHeader {
    type Error = [u8; 8];

    fn try_from(v: [u8; 8]) -> Result<Self, Self::Error> {
        if &v[..4] != PROTOCOL_HEADER_PREFIX {
            return Err(v);
        }
        Ok(Self {
            protocol_id: v[4],
            major: v[5],
            minor: v[6],
            revision: v[7],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prelude_bytes_match_the_spec() {
        let bytes: [u8; 8] = ProtocolHeader::amqp091().into();
        assert_eq!(&bytes, b"AMQP\x00\x00\x09\x01");
    }

    #[test]
    fn foreign_header_is_parsed_back() {
        let header = ProtocolHeader::try_from(*b"AMQP\x00\x00\x00\x09").unwrap();
        assert_eq!(header.minor, 0);
        assert_eq!(header.revision, 9);
        assert!(ProtocolHeader::try_from(*b"HTTP/1.1").is_err());
    }
}
