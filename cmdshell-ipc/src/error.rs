use std::io;
use thiserror::Error;

/// Failures of the local IPC primitive.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nobody is listening on the endpoint; the server is not running.
    #[error("connection refused by {endpoint}")]
    ConnectRefused { endpoint: String },
    /// The peer went away mid-exchange (crash or restart).
    #[error("broken pipe: {0}")]
    BrokenPipe(#[source] io::Error),
    /// No complete frame arrived before the deadline.
    #[error("timed out waiting for data")]
    Timeout,
    /// The peer closed the connection cleanly.
    #[error("connection closed")]
    Closed,
    #[error("IO error: {0}")]
    Io(#[source] io::Error),
}

impl TransportError {
    /// Classify an IO error raised while reading or writing an established connection.
    pub fn from_stream(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => TransportError::BrokenPipe(err),
            _ => TransportError::Io(err),
        }
    }

    /// Classify an IO error raised while opening a connection.
    pub fn from_connect(err: io::Error, endpoint: impl Into<String>) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => {
                TransportError::ConnectRefused {
                    endpoint: endpoint.into(),
                }
            }
            _ => TransportError::from_stream(err),
        }
    }

    /// Whether the server side is gone and a reconnect is the only way forward.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectRefused { .. }
                | TransportError::BrokenPipe(_)
                | TransportError::Closed
        )
    }
}

/// Frames that could not be understood.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed {what} frame: {raw:?}")]
    Malformed { what: &'static str, raw: String },
    #[error("unrecognized state change: [{0}]")]
    UnrecognizedTag(String),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

/// Failure of a command exchange on the session channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl ChannelError {
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ChannelError::Transport(e) if e.is_disconnect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_refused_classification() {
        let err = TransportError::from_connect(
            io::Error::from(io::ErrorKind::ConnectionRefused),
            "/tmp/srv.sock",
        );
        assert!(matches!(err, TransportError::ConnectRefused { .. }));
        assert!(err.is_disconnect());

        let err = TransportError::from_connect(io::Error::from(io::ErrorKind::NotFound), "x");
        assert!(matches!(err, TransportError::ConnectRefused { .. }));
    }

    #[test]
    fn test_stream_error_classification() {
        let err = TransportError::from_stream(io::Error::from(io::ErrorKind::ConnectionReset));
        assert!(matches!(err, TransportError::BrokenPipe(_)));

        let err = TransportError::from_stream(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, TransportError::Io(_)));
        assert!(!err.is_disconnect());
        assert!(!TransportError::Timeout.is_disconnect());
    }
}
