//! Envelope model and wire framing for buxtehude.
//!
//! Every message on a byte transport is framed with:
//! - A 1-byte format tag (0 = JSON, 1 = MessagePack)
//! - A 4-byte little-endian payload length
//! - The encoded envelope payload
//!
//! The [`Stream`] reader turns partial socket reads into completed
//! messages through a declarative pipeline of expected fields, so the
//! endpoint layers never deal with buffer management.

pub mod codec;
pub mod envelope;
pub mod error;
pub mod stream;
pub mod writer;

pub use codec::{
    arm_message_pipeline, decode, encode, finish_message, DEFAULT_MAX_MSG_LENGTH, HEADER_SIZE,
};
pub use envelope::{Envelope, MessageFormat};
pub use error::{ReadError, WriteError};
pub use stream::{Field, Stream, StreamStatus};
pub use writer::write_envelope;
