#![deny(missing_docs, missing_debug_implementations)]

//! Wire-level types for the AMQP 0-9-1 protocol.
//!
//! This crate implements the pieces of the protocol that are pure data:
//!
//! - [`codec`]: primitive encoding and decoding (integers, strings, bit
//!   runs) over [`bytes`] buffers
//! - [`value`]: the self-describing field-value / field-table model
//! - [`methods`]: one struct per `(class-id, method-id)` pair plus the
//!   closed [`Method`](methods::Method) sum type
//! - [`content`]: the content header and basic properties that precede a
//!   message body
//!
//! The frame layer, connection engine and channel state machine live in the
//! `amqp091` crate and are built on top of these types.

pub mod codec;
pub mod content;
pub mod definitions;
pub mod methods;
pub mod value;

pub use codec::CodecError;
pub use content::{BasicProperties, ContentHeader};
pub use definitions::CloseInfo;
pub use methods::Method;
pub use value::{FieldTable, FieldValue};
