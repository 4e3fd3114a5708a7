use std::io::Read;

use crate::envelope::{Envelope, MessageFormat};
use crate::error::{ReadError, WriteError};
use crate::stream::Stream;

/// Wire header: format tag (1) + payload length (4) = 5 bytes.
///
/// The length is fixed little-endian. (The first-generation protocol
/// wrote the host representation; this implementation standardises on
/// little-endian and documents the break.)
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload length accepted from a peer: 128 KiB.
pub const DEFAULT_MAX_MSG_LENGTH: u32 = 128 * 1024;

// Absolute positions of the pipeline fields armed below.
const FORMAT_FIELD: usize = 0;
const LENGTH_FIELD: usize = 1;
const PAYLOAD_FIELD: usize = 2;

/// Encode an envelope's structured form with the chosen codec.
pub fn encode(envelope: &Envelope, format: MessageFormat) -> Result<Vec<u8>, WriteError> {
    match format {
        MessageFormat::Json => serde_json::to_vec(envelope).map_err(|_| WriteError),
        MessageFormat::MsgPack => rmp_serde::to_vec_named(envelope).map_err(|_| WriteError),
    }
}

/// Decode a payload in its declared format.
pub fn decode(format: MessageFormat, payload: &[u8]) -> Result<Envelope, ReadError> {
    match format {
        MessageFormat::Json => {
            serde_json::from_slice(payload).map_err(|e| ReadError::Parse(e.to_string()))
        }
        MessageFormat::MsgPack => {
            rmp_serde::from_slice(payload).map_err(|e| ReadError::Parse(e.to_string()))
        }
    }
}

/// Arm the two-field message header pipeline on a stream.
///
/// The header continuation validates the format tag and length, then
/// awaits the payload as a third field. Malformed headers reset the
/// pipeline and record a failure for the owner to report. An oversize
/// length within twice the cap arms a discard field instead, so the
/// stream re-synchronises on the following message; beyond that the
/// reader resets immediately.
pub fn arm_message_pipeline<R: Read>(stream: &mut Stream<R>, max_msg_length: u32) {
    stream
        .await_bytes(1)
        .await_bytes(4)
        .then(move |s, _idx| {
            let format_code = s.field(FORMAT_FIELD as isize).as_u8();
            if MessageFormat::from_code(format_code).is_none() {
                s.reset();
                s.fail(format!("Invalid message format {format_code}"));
                return;
            }

            let length = s.field(LENGTH_FIELD as isize).as_u32_le();
            if length > max_msg_length {
                s.fail(format!(
                    "Message length {length} exceeds maximum {max_msg_length}"
                ));
                if length <= max_msg_length.saturating_mul(2) {
                    s.await_bytes(length as usize);
                    s.then(|s, idx| {
                        s.delete(idx);
                        s.reset();
                    });
                } else {
                    s.reset();
                }
                return;
            }

            s.await_bytes(length as usize);
        });
}

/// Extract the completed envelope from a message pipeline and re-arm it
/// for the next message.
///
/// Call after [`Stream::read`] returned true on a pipeline armed with
/// [`arm_message_pipeline`]. The payload field is recycled and the
/// cursor reset whether or not decoding succeeds.
pub fn finish_message<R: Read>(stream: &mut Stream<R>) -> Result<Envelope, ReadError> {
    let result = match MessageFormat::from_code(stream.field(FORMAT_FIELD as isize).as_u8()) {
        Some(format) => decode(format, stream.field(PAYLOAD_FIELD as isize).bytes()),
        None => Err(ReadError::Parse("unknown message format".into())),
    };
    stream.delete(PAYLOAD_FIELD);
    stream.reset();
    result
}
