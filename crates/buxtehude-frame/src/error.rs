/// Errors that can occur while reading messages from a transport.
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The payload could not be decoded in its declared format.
    #[error("failed to parse message: {0}")]
    Parse(String),

    /// Not enough bytes have arrived to complete the current message.
    #[error("message not yet complete")]
    Incomplete,

    /// The transport reached end-of-stream or failed.
    #[error("connection closed")]
    Connection,
}

/// A message could not be encoded, written or flushed.
///
/// Deliberately opaque: the caller's only recourse is to close the
/// connection, and the failure detail is logged at the site.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode or write message")]
pub struct WriteError;

pub type Result<T> = std::result::Result<T, WriteError>;
