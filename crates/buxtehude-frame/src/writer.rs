use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};
use tracing::trace;

use crate::codec::{encode, HEADER_SIZE};
use crate::envelope::{Envelope, MessageFormat};
use crate::error::{Result, WriteError};

/// Encode an envelope and write it to the transport, framed.
///
/// Writes the format tag, the little-endian payload length and the
/// payload in order, then flushes. Interrupted and would-block writes
/// are retried; a zero-length write means the peer has gone. On any
/// failure the caller is expected to close the connection.
pub fn write_envelope<W: Write>(
    writer: &mut W,
    envelope: &Envelope,
    format: MessageFormat,
) -> Result<()> {
    let payload = encode(envelope, format)?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u8(format.code());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);

    let mut offset = 0usize;
    while offset < buf.len() {
        match writer.write(&buf[offset..]) {
            Ok(0) => return Err(WriteError),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => {
                trace!(error = %err, "message write failed");
                return Err(WriteError);
            }
        }
    }

    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => {
                trace!(error = %err, "message flush failed");
                return Err(WriteError);
            }
        }
    }
}
