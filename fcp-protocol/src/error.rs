//! Protocol error types.

use thiserror::Error;

/// Errors raised while framing or parsing FCP messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message header is empty")]
    EmptyHeader,

    #[error("field {0:?} contains a newline")]
    FieldContainsNewline(String),

    #[error("field line without '=': {0:?}")]
    MalformedField(String),

    #[error("Data terminator without a DataLength field")]
    MissingDataLength,

    #[error("DataLength is not a decimal byte count: {0:?}")]
    InvalidDataLength(String),

    #[error("payload is {actual} bytes but DataLength says {declared}")]
    PayloadLengthMismatch { declared: u64, actual: usize },

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("unknown server message: {0}")]
    UnknownServerMessage(String),
}
