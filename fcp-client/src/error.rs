//! Client error types.

use fcp_protocol::{ProtocolError, ServerMessage};
use thiserror::Error;

/// Client errors.
///
/// Session-fatal variants tear the whole connection down; the rest concern a
/// single request and leave the session healthy.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("session is down: {0}")]
    SessionDown(String),

    #[error("request timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("identifier already in use: {0}")]
    DuplicateIdentifier(String),

    #[error("bad argument: {0}")]
    BadArgument(String),

    #[error("unexpected response shape: {0}")]
    BadResponseShape(String),

    #[error("node error: {header}: {description}")]
    NodeError {
        /// Wire header of the terminal error message.
        header: String,
        /// The node's `Code` field, when parseable.
        code: Option<i32>,
        /// The node's description fields, best effort.
        description: String,
    },
}

impl ClientError {
    /// Builds a `NodeError` from a terminal error message.
    pub(crate) fn from_node_message(message: &ServerMessage) -> Self {
        let m = &message.message;
        let description = m
            .field("CodeDescription")
            .or_else(|| m.field("ExtraDescription"))
            .or_else(|| m.field("ShortCodeDescription"))
            .unwrap_or_default()
            .to_string();
        ClientError::NodeError {
            header: message.kind.wire_name().to_string(),
            code: m.field("Code").and_then(|c| c.parse().ok()),
            description,
        }
    }

    /// Whether this error takes the whole session down, as opposed to a
    /// single job.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_)
                | ClientError::Protocol(_)
                | ClientError::ConnectionClosed
                | ClientError::SessionDown(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fcp_protocol::Message;

    #[test]
    fn test_node_error_from_message() {
        let m = Message::new("ProtocolError")
            .with_field("Code", "7")
            .with_field("CodeDescription", "Invalid message");
        let err = ClientError::from_node_message(&ServerMessage::classify(m).unwrap());
        match &err {
            ClientError::NodeError {
                header,
                code,
                description,
            } => {
                assert_eq!(header, "ProtocolError");
                assert_eq!(*code, Some(7));
                assert_eq!(description, "Invalid message");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_session_fatal());
        assert!(err.to_string().contains("Invalid message"));
    }

    #[test]
    fn test_fatality_split() {
        assert!(ClientError::ConnectionClosed.is_session_fatal());
        assert!(ClientError::Protocol(ProtocolError::EmptyHeader).is_session_fatal());
        assert!(!ClientError::Timeout.is_session_fatal());
        assert!(!ClientError::DuplicateIdentifier("x".into()).is_session_fatal());
        assert!(!ClientError::BadArgument("x".into()).is_session_fatal());
    }
}
