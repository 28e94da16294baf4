//! Error types for muxwire.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::protocol::GoAwayCode;

/// Main error type for all session and stream operations.
///
/// The type is `Clone` so the reason a session closed can be handed to
/// every task waiting on it.
#[derive(Debug, Clone, Error)]
pub enum MuxError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// Header carried a protocol version other than ours.
    #[error("invalid protocol version: {0}")]
    InvalidVersion(u8),

    /// Header carried an unknown frame type.
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    /// A Data frame announced a payload larger than any receive window.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),

    /// A flag arrived that the stream's current state cannot accept.
    #[error("unexpected flag")]
    UnexpectedFlag,

    /// The remote side sent a normal go-away; no new streams may be opened.
    #[error("remote end is not accepting connections")]
    RemoteGoAway,

    /// The session has been closed.
    #[error("session shutdown")]
    SessionShutdown,

    /// The stream ID space for this role is used up.
    #[error("streams exhausted")]
    StreamsExhausted,

    /// The remote opened a stream ID that is already in use.
    #[error("duplicate stream initiated")]
    DuplicateStream,

    /// The remote sent more data than the advertised receive window.
    #[error("recv window exceeded")]
    RecvWindowExceeded,

    /// Operation on a stream that was closed.
    #[error("stream closed")]
    StreamClosed,

    /// Operation on a stream that was reset by the remote.
    #[error("connection reset")]
    ConnectionReset,

    /// A write could not complete within the configured write timeout.
    #[error("connection write timeout")]
    ConnectionWriteTimeout,

    /// A ping was not answered within the configured write timeout.
    #[error("keepalive timeout")]
    KeepAliveTimeout,

    /// Remote closed the session citing a protocol error on our side.
    #[error("remote protocol error")]
    RemoteProtocolError,

    /// Remote closed the session citing an internal failure.
    #[error("remote internal error")]
    RemoteInternalError,

    /// Remote sent a go-away with an unknown reason code.
    #[error("unexpected go away received: {0}")]
    UnexpectedGoAway(u32),

    /// Configuration rejected by [`Config::verify`](crate::Config::verify).
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl MuxError {
    /// Go-away reason announced to the remote when the session closes
    /// because of this error.
    pub fn go_away_code(&self) -> GoAwayCode {
        match self {
            MuxError::InvalidVersion(_)
            | MuxError::InvalidMessageType(_)
            | MuxError::FrameTooLarge(_)
            | MuxError::DuplicateStream => GoAwayCode::ProtocolError,
            MuxError::Io(_) | MuxError::ConnectionWriteTimeout => GoAwayCode::InternalError,
            _ => GoAwayCode::Normal,
        }
    }

    /// Whether this error is confined to one stream.
    pub fn is_stream_local(&self) -> bool {
        matches!(
            self,
            MuxError::StreamClosed
                | MuxError::ConnectionReset
                | MuxError::RecvWindowExceeded
                | MuxError::UnexpectedFlag
                | MuxError::ConnectionWriteTimeout
        )
    }
}

impl From<io::Error> for MuxError {
    fn from(err: io::Error) -> Self {
        MuxError::Io(Arc::new(err))
    }
}

impl From<MuxError> for io::Error {
    fn from(err: MuxError) -> Self {
        let kind = match &err {
            MuxError::Io(inner) => inner.kind(),
            MuxError::StreamClosed => io::ErrorKind::BrokenPipe,
            MuxError::ConnectionReset => io::ErrorKind::ConnectionReset,
            MuxError::ConnectionWriteTimeout | MuxError::KeepAliveTimeout => {
                io::ErrorKind::TimedOut
            }
            MuxError::SessionShutdown => io::ErrorKind::NotConnected,
            MuxError::RemoteGoAway => io::ErrorKind::ConnectionRefused,
            MuxError::RecvWindowExceeded
            | MuxError::UnexpectedFlag
            | MuxError::InvalidVersion(_)
            | MuxError::InvalidMessageType(_)
            | MuxError::FrameTooLarge(_)
            | MuxError::DuplicateStream => io::ErrorKind::InvalidData,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type alias using MuxError.
pub type Result<T> = std::result::Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_wire_vocabulary() {
        assert_eq!(
            MuxError::RemoteGoAway.to_string(),
            "remote end is not accepting connections"
        );
        assert_eq!(MuxError::SessionShutdown.to_string(), "session shutdown");
        assert_eq!(MuxError::KeepAliveTimeout.to_string(), "keepalive timeout");
        assert_eq!(MuxError::StreamClosed.to_string(), "stream closed");
        assert_eq!(MuxError::ConnectionReset.to_string(), "connection reset");
    }

    #[test]
    fn test_go_away_codes() {
        assert_eq!(
            MuxError::InvalidVersion(1).go_away_code(),
            GoAwayCode::ProtocolError
        );
        assert_eq!(
            MuxError::FrameTooLarge(1 << 20).go_away_code(),
            GoAwayCode::ProtocolError
        );
        assert_eq!(
            MuxError::DuplicateStream.go_away_code(),
            GoAwayCode::ProtocolError
        );
        assert_eq!(
            MuxError::KeepAliveTimeout.go_away_code(),
            GoAwayCode::Normal
        );
        let io_err: MuxError = io::Error::new(io::ErrorKind::BrokenPipe, "gone").into();
        assert_eq!(io_err.go_away_code(), GoAwayCode::InternalError);
    }

    #[test]
    fn test_into_io_error_keeps_message() {
        let err: io::Error = MuxError::ConnectionReset.into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(err.to_string(), "connection reset");

        let inner = err.into_inner().unwrap().downcast::<MuxError>().unwrap();
        assert!(matches!(*inner, MuxError::ConnectionReset));
    }

    #[test]
    fn test_stream_local_classification() {
        assert!(MuxError::RecvWindowExceeded.is_stream_local());
        assert!(MuxError::StreamClosed.is_stream_local());
        assert!(!MuxError::KeepAliveTimeout.is_stream_local());
        assert!(!MuxError::InvalidVersion(3).is_stream_local());
    }
}
